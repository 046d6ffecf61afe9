//! HTTP download manager that writes into a local directory.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{
    ConflictAction, DownloadDelta, DownloadItem, DownloadManager, ItemState, ManagerError, ManagerEvent,
    StartRequest, interrupt,
};
use crate::filename::{resolve_unique_path, sanitize_filename};

/// Minimum spacing between byte-count change events for one download.
const PROGRESS_EVENT_INTERVAL: Duration = Duration::from_millis(200);

const EVENT_CAPACITY: usize = 256;

/// Finished items kept for [`DownloadManager::query`]; older ones are forgotten.
const FINISHED_RETENTION: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Cancel,
}

#[derive(Debug)]
struct Entry {
    item: DownloadItem,
    control: watch::Sender<Control>,
}

/// Running transfers plus a bounded tail of finished items.
#[derive(Debug, Default)]
struct Entries {
    running: HashMap<String, Entry>,
    finished: VecDeque<DownloadItem>,
}

impl Entries {
    fn item(&self, id: &str) -> Option<&DownloadItem> {
        self.running
            .get(id)
            .map(|entry| &entry.item)
            .or_else(|| self.finished.iter().find(|item| item.id == id))
    }

    /// Drops the transfer's control channel and keeps only its item.
    fn retire(&mut self, id: &str) -> Option<DownloadItem> {
        let entry = self.running.remove(id)?;
        if self.finished.len() >= FINISHED_RETENTION {
            self.finished.pop_front();
        }
        self.finished.push_back(entry.item.clone());
        Some(entry.item)
    }
}

#[derive(Debug)]
struct Inner {
    client: Client,
    output_dir: PathBuf,
    entries: Mutex<Entries>,
    events: broadcast::Sender<ManagerEvent>,
    next_id: AtomicU64,
}

/// Ids continue from the wall clock so they do not collide with records
/// persisted by an earlier process.
fn id_seed() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).map_or(1, |millis| millis.saturating_mul(1000))
}

/// [`DownloadManager`] that streams HTTP(S) bodies into `output_dir`.
///
/// Each download runs on its own task. Pause suspends reading the body;
/// cancel aborts the transfer and deletes the partial file.
#[derive(Debug, Clone)]
pub struct LocalDownloadManager {
    inner: Arc<Inner>,
}

impl LocalDownloadManager {
    /// Creates a manager writing into `output_dir`.
    #[must_use]
    pub fn new(client: Client, output_dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                client,
                output_dir: output_dir.into(),
                entries: Mutex::new(Entries::default()),
                events,
                next_id: AtomicU64::new(id_seed()),
            }),
        }
    }

    /// Directory downloads are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.inner.output_dir
    }

    async fn set_control(&self, id: &str, operation: &'static str, next: Control) -> Result<(), ManagerError> {
        let mut entries = self.inner.entries.lock().await;
        if entries.item(id).is_some_and(|item| item.state != ItemState::InProgress) {
            return Err(ManagerError::rejected(operation, id, "Download must be in progress"));
        }
        let entry = entries.running.get_mut(id).ok_or_else(|| ManagerError::not_found(id))?;

        match next {
            Control::Pause if entry.item.paused => return Ok(()),
            Control::Run if !entry.item.paused => {
                return Err(ManagerError::rejected(operation, id, "Download is not paused"));
            }
            _ => {}
        }

        entry
            .control
            .send(next)
            .map_err(|_| ManagerError::rejected(operation, id, "Transfer task is gone"))?;

        if next != Control::Cancel {
            entry.item.paused = next == Control::Pause;
            let mut delta = DownloadDelta::new(id);
            delta.paused = Some(entry.item.paused);
            self.inner.emit(ManagerEvent::Changed(delta));
        }
        debug!(download_id = %id, operation, "control applied");
        Ok(())
    }
}

impl Inner {
    fn emit(&self, event: ManagerEvent) {
        if self.events.send(event).is_err() {
            trace!("no manager event subscribers");
        }
    }

    async fn record_bytes(&self, id: &str, bytes_received: u64) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.running.get_mut(id) {
            entry.item.bytes_received = bytes_received;
            let mut delta = DownloadDelta::new(id);
            delta.bytes_received = Some(bytes_received);
            self.emit(ManagerEvent::Changed(delta));
        }
    }

    async fn record_total(&self, id: &str, total_bytes: u64) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.running.get_mut(id) {
            entry.item.total_bytes = total_bytes;
            let mut delta = DownloadDelta::new(id);
            delta.total_bytes = Some(total_bytes);
            self.emit(ManagerEvent::Changed(delta));
        }
    }

    async fn finish(&self, id: &str, state: ItemState, error: Option<&'static str>) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.running.get_mut(id) {
            entry.item.state = state;
            entry.item.paused = false;
            entry.item.can_resume = false;
            entry.item.error = error.map(str::to_string);
        }
        if let Some(item) = entries.retire(id) {
            let mut delta = DownloadDelta::new(id);
            delta.state = Some(state);
            delta.bytes_received = Some(item.bytes_received);
            delta.error = item.error;
            self.emit(ManagerEvent::Changed(delta));
        }
    }
}

#[async_trait]
impl DownloadManager for LocalDownloadManager {
    #[tracing::instrument(skip(self, request), fields(url = %request.url))]
    async fn start(&self, request: StartRequest) -> Result<String, ManagerError> {
        let parsed = Url::parse(&request.url)
            .map_err(|_| ManagerError::rejected("start", &request.url, "Invalid URL"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ManagerError::rejected("start", &request.url, "Download not permitted"));
        }

        tokio::fs::create_dir_all(&self.inner.output_dir)
            .await
            .map_err(|e| ManagerError::rejected("start", &request.url, e.to_string()))?;

        // The target file is created while the entry lock is held so that
        // concurrent starts with the same name cannot pick the same path.
        let mut entries = self.inner.entries.lock().await;
        let path = match request.conflict {
            ConflictAction::Uniquify => resolve_unique_path(&self.inner.output_dir, &request.filename),
            ConflictAction::Overwrite => self.inner.output_dir.join(sanitize_filename(&request.filename)),
        };
        let file = File::create(&path)
            .await
            .map_err(|e| ManagerError::rejected("start", &request.url, e.to_string()))?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.filename.clone());
        let item = DownloadItem {
            id: id.clone(),
            url: request.url.clone(),
            filename,
            state: ItemState::InProgress,
            bytes_received: 0,
            total_bytes: 0,
            can_resume: true,
            paused: false,
            error: None,
        };
        let (control, control_rx) = watch::channel(Control::Run);
        entries.running.insert(
            id.clone(),
            Entry {
                item: item.clone(),
                control,
            },
        );
        drop(entries);

        self.inner.emit(ManagerEvent::Created(item));
        info!(download_id = %id, path = %path.display(), "download started");

        tokio::spawn(run_transfer(
            Arc::clone(&self.inner),
            id.clone(),
            request.url,
            path,
            file,
            control_rx,
        ));
        Ok(id)
    }

    async fn pause(&self, id: &str) -> Result<(), ManagerError> {
        self.set_control(id, "pause", Control::Pause).await
    }

    async fn resume(&self, id: &str) -> Result<(), ManagerError> {
        self.set_control(id, "resume", Control::Run).await
    }

    async fn cancel(&self, id: &str) -> Result<(), ManagerError> {
        self.set_control(id, "cancel", Control::Cancel).await
    }

    async fn query(&self, id: &str) -> Result<Option<DownloadItem>, ManagerError> {
        Ok(self.inner.entries.lock().await.item(id).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }
}

async fn run_transfer(
    inner: Arc<Inner>,
    id: String,
    url: String,
    path: PathBuf,
    mut file: File,
    mut control: watch::Receiver<Control>,
) {
    let outcome = transfer_body(&inner, &id, &url, &mut file, &mut control).await;
    drop(file);

    match outcome {
        Ok(bytes) => {
            info!(download_id = %id, bytes, "download complete");
            inner.finish(&id, ItemState::Complete, None).await;
        }
        Err(reason) => {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(download_id = %id, error = %e, "partial file not removed");
            }
            if reason == interrupt::USER_CANCELED {
                info!(download_id = %id, "download canceled");
            } else {
                warn!(download_id = %id, reason, "download interrupted");
            }
            inner.finish(&id, ItemState::Interrupted, Some(reason)).await;
        }
    }
}

async fn transfer_body(
    inner: &Inner,
    id: &str,
    url: &str,
    file: &mut File,
    control: &mut watch::Receiver<Control>,
) -> Result<u64, &'static str> {
    let response = tokio::select! {
        response = inner.client.get(url).send() => response.map_err(|e| {
            debug!(download_id = %id, error = %e, "request failed");
            interrupt::NETWORK_FAILED
        })?,
        () = wait_for_cancel(control) => return Err(interrupt::USER_CANCELED),
    };

    let status = response.status();
    if !status.is_success() {
        debug!(download_id = %id, status = status.as_u16(), "non-success response");
        return Err(match status.as_u16() {
            401 | 403 => interrupt::SERVER_FORBIDDEN,
            404 | 410 => interrupt::SERVER_BAD_CONTENT,
            _ => interrupt::SERVER_FAILED,
        });
    }
    if let Some(total) = response.content_length() {
        inner.record_total(id, total).await;
    }

    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    let mut last_event: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = control.changed() => {
                if changed.is_err() {
                    return Err(interrupt::USER_CANCELED);
                }
                wait_for_running(control).await?;
            }
            next = stream.next() => {
                let Some(chunk) = next else { break };
                let chunk = chunk.map_err(|_| interrupt::NETWORK_FAILED)?;
                file.write_all(&chunk).await.map_err(|_| interrupt::FILE_FAILED)?;
                received += chunk.len() as u64;

                if last_event.is_none_or(|at| at.elapsed() >= PROGRESS_EVENT_INTERVAL) {
                    inner.record_bytes(id, received).await;
                    last_event = Some(Instant::now());
                }
            }
        }
    }

    file.flush().await.map_err(|_| interrupt::FILE_FAILED)?;
    inner.record_bytes(id, received).await;
    Ok(received)
}

/// Blocks while paused. Returns the cancel code if a cancel arrives.
async fn wait_for_running(control: &mut watch::Receiver<Control>) -> Result<(), &'static str> {
    loop {
        let state = *control.borrow_and_update();
        match state {
            Control::Run => return Ok(()),
            Control::Cancel => return Err(interrupt::USER_CANCELED),
            Control::Pause => {
                control
                    .changed()
                    .await
                    .map_err(|_| interrupt::USER_CANCELED)?;
            }
        }
    }
}

async fn wait_for_cancel(control: &mut watch::Receiver<Control>) {
    loop {
        let state = *control.borrow_and_update();
        if state == Control::Cancel || control.changed().await.is_err() {
            return;
        }
    }
}
