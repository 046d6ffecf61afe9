//! Download lifecycle tracker.
//!
//! The tracker owns the canonical state of every download: an *active* and a
//! *completed* collection, disjoint by id. It reconciles change events from
//! the [`DownloadManager`] with that state, derives speed and ETA, persists
//! both collections after every mutation and re-broadcasts every update.
//!
//! ```text
//! pending --(manager confirms start)--> downloading --(tick)--> downloading
//! downloading --(pause, pausable)--> paused --(resume)--> downloading
//! downloading/paused --(cancel)--> canceled
//! downloading --(complete)--> completed
//! downloading --(interrupted)--> error
//! ```
//!
//! Pause, resume and cancel are forwarded to the manager first; local state
//! only changes once the manager acknowledges. The state lock is released
//! while the manager is called and the record is re-checked afterwards.
//! In-page captures never reach the manager: they are canceled through the
//! [`CancelHandle`] registered by [`DownloadTracker::register_capture`].
//! Storage errors are logged and swallowed.

mod error;
mod progress;

pub use error::TrackerError;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use self::progress::{SampleEffect, apply_elapsed_estimate, apply_sample};
use crate::acquisition::{CancelHandle, CancelSignal, DelegateDownload, cancel_pair};
use crate::bus::{Broadcaster, Event, ProgressSnapshot};
use crate::classifier::{ResourceKind, classify};
use crate::manager::{
    DownloadDelta, DownloadItem, DownloadManager, ItemState, ManagerEvent, StartRequest, interrupt,
    user_facing_reason,
};
use crate::record::{Degradation, DownloadRecord, DownloadStatus};
use crate::store::{ACTIVE_DOWNLOADS_KEY, COMPLETED_DOWNLOADS_KEY, KeyValueStore, download_aux_key};

/// Metadata for a record created before the manager assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMeta {
    /// Display title.
    pub title: String,
    /// Original resource URL.
    pub source_url: String,
    /// Target filename.
    pub filename: String,
    /// Media duration, when known.
    pub duration_seconds: Option<f64>,
}

/// Details of a successful completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Final filename, if it differs from the planned one.
    pub filename: Option<String>,
    /// Final size, if known.
    pub bytes: Option<u64>,
    /// Set when the saved artifact is a degraded substitute.
    pub degraded: Option<Degradation>,
}

/// Terminal outcome passed to [`DownloadTracker::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Finished successfully.
    Completed(Completion),
    /// Failed with a human-readable reason.
    Error(String),
    /// Stopped by the user.
    Canceled,
}

/// Full view of both collections, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerSnapshot {
    /// In-flight records.
    pub active: Vec<DownloadRecord>,
    /// Terminal records.
    pub completed: Vec<DownloadRecord>,
}

/// Counts reported by [`DownloadTracker::restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Active records kept.
    pub active: usize,
    /// Completed records loaded.
    pub completed: usize,
    /// Active records dropped because the manager no longer has them.
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct Collections {
    active: HashMap<String, DownloadRecord>,
    completed: HashMap<String, DownloadRecord>,
    // Active captures not bound to a manager id.
    captures: HashMap<String, CancelHandle>,
}

impl Collections {
    fn stop_captures(&mut self) {
        for (id, capture) in self.captures.drain() {
            debug!(download_id = %id, "capture cancel signalled");
            capture.cancel();
        }
    }

    fn active_mut(&mut self, id: &str, action: &'static str) -> Result<&mut DownloadRecord, TrackerError> {
        if let Some(record) = self.completed.get(id) {
            return Err(TrackerError::invalid_transition(id, record.status, action));
        }
        self.active
            .get_mut(id)
            .ok_or_else(|| TrackerError::not_found(id))
    }
}

/// Owns download records and keeps them in sync with the download manager.
pub struct DownloadTracker {
    state: Mutex<Collections>,
    store: Arc<dyn KeyValueStore>,
    manager: Arc<dyn DownloadManager>,
    bus: Arc<dyn Broadcaster>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DownloadTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTracker").finish_non_exhaustive()
    }
}

impl DownloadTracker {
    /// Creates a tracker with empty collections. Call [`Self::init`] to
    /// restore persisted state and start following manager events.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        manager: Arc<dyn DownloadManager>,
        bus: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            state: Mutex::new(Collections::default()),
            store,
            manager,
            bus,
            event_loop: Mutex::new(None),
        }
    }

    // ==================== Lifecycle ====================

    /// Restores persisted state and spawns the manager event loop.
    ///
    /// The subscription is taken before restoring so no change event is lost
    /// in between.
    pub async fn init(self: &Arc<Self>) -> RestoreSummary {
        let events = self.manager.subscribe();
        let summary = self.restore().await;

        let handle = tokio::spawn(run_event_loop(Arc::downgrade(self), events));
        if let Some(previous) = self.event_loop.lock().await.replace(handle) {
            previous.abort();
        }
        info!(
            active = summary.active,
            completed = summary.completed,
            dropped = summary.dropped,
            "download tracker initialised"
        );
        summary
    }

    /// Stops the event loop and writes a final snapshot.
    pub async fn teardown(&self) {
        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }
        self.persist().await;
        debug!("download tracker torn down");
    }

    // ==================== Creation and binding ====================

    /// Creates a `pending` record and returns its ephemeral correlation key.
    pub async fn register_pending(&self, meta: PendingMeta) -> String {
        self.insert_pending(meta, None).await
    }

    /// Creates a `pending` record for an in-page acquisition.
    ///
    /// The returned signal fires when the record is canceled or cleared. It
    /// is disarmed once the record is bound to a manager id or finalized.
    pub async fn register_capture(&self, meta: PendingMeta) -> (String, CancelSignal) {
        let (handle, signal) = cancel_pair();
        let id = self.insert_pending(meta, Some(handle)).await;
        (id, signal)
    }

    async fn insert_pending(&self, meta: PendingMeta, cancel: Option<CancelHandle>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut record = DownloadRecord::pending(&id, meta.title, meta.source_url, meta.filename, Utc::now());
        record.duration_seconds = meta.duration_seconds;

        let mut state = self.state.lock().await;
        state.active.insert(id.clone(), record.clone());
        if let Some(handle) = cancel {
            state.captures.insert(id.clone(), handle);
        }
        self.persist_locked(&state).await;
        drop(state);

        debug!(download_id = %id, "pending download registered");
        self.bus.publish(Event::DownloadUpdate(ProgressSnapshot::from(&record)));
        id
    }

    /// Renames a pending record to its manager-assigned id.
    ///
    /// The rename happens under the state lock, so no reader ever sees both
    /// keys at once. All fields other than `id` are preserved.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`] if `pending_id` is not active, or
    /// [`TrackerError::IdConflict`] if `os_id` is already taken.
    pub async fn bind_os_id(&self, pending_id: &str, os_id: &str) -> Result<(), TrackerError> {
        let mut state = self.state.lock().await;
        if !state.active.contains_key(pending_id) {
            return Err(TrackerError::not_found(pending_id));
        }
        if pending_id == os_id {
            return Ok(());
        }
        if state.active.contains_key(os_id) || state.completed.contains_key(os_id) {
            return Err(TrackerError::IdConflict {
                pending_id: pending_id.to_string(),
                os_id: os_id.to_string(),
            });
        }

        if let Some(mut record) = state.active.remove(pending_id) {
            record.id = os_id.to_string();
            state.active.insert(os_id.to_string(), record);
        }
        state.captures.remove(pending_id);
        self.persist_locked(&state).await;
        debug!(pending_id, os_id, "download id bound");
        Ok(())
    }

    /// Moves a pending record to `downloading` once the manager reports it.
    ///
    /// Copies `pausable`, size and final filename from the manager item. A
    /// record already promoted by an earlier progress event only gets those
    /// fields refreshed, and `downloadStarted` is published once.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`] for unknown ids,
    /// [`TrackerError::InvalidTransition`] for terminal records.
    pub async fn confirm_started(&self, id: &str, item: &DownloadItem) -> Result<DownloadRecord, TrackerError> {
        let mut state = self.state.lock().await;
        let record = state.active_mut(id, "start")?;
        let newly_started = record.status == DownloadStatus::Pending;
        if newly_started {
            record.status = DownloadStatus::Downloading;
        }
        record.pausable = item.can_resume;
        record.bytes_total = item.total_bytes;
        if !item.filename.is_empty() {
            record.filename.clone_from(&item.filename);
        }
        record.refresh_percent();
        let record = record.clone();
        self.persist_locked(&state).await;
        drop(state);

        if !newly_started {
            return Ok(record);
        }
        info!(download_id = %id, filename = %record.filename, "download started");
        self.bus.publish(Event::DownloadStarted {
            id: record.id.clone(),
            title: record.title.clone(),
            filename: record.filename.clone(),
            url: record.source_url.clone(),
            total: record.bytes_total,
            pausable: record.pausable,
            start_time: record.started_at,
        });
        Ok(record)
    }

    // ==================== Progress ====================

    /// Applies a progress sample.
    ///
    /// Duplicate, stale, and decreasing samples leave the record unchanged.
    /// A `pending` record is promoted to `downloading`.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`] for unknown ids,
    /// [`TrackerError::InvalidTransition`] for terminal records.
    pub async fn apply_progress(
        &self,
        id: &str,
        bytes_downloaded: u64,
        bytes_total: u64,
        at: DateTime<Utc>,
    ) -> Result<DownloadRecord, TrackerError> {
        let mut state = self.state.lock().await;
        let record = state.active_mut(id, "update")?;
        if apply_sample(record, bytes_downloaded, bytes_total, at) == SampleEffect::Ignored {
            trace!(download_id = %id, bytes_downloaded, "duplicate or stale progress sample");
            return Ok(record.clone());
        }
        if record.status == DownloadStatus::Pending {
            record.status = DownloadStatus::Downloading;
        }
        let record = record.clone();
        self.persist_locked(&state).await;
        drop(state);

        self.bus.publish(Event::DownloadUpdate(ProgressSnapshot::from(&record)));
        Ok(record)
    }

    /// Applies stream-capture progress for a record without a known size.
    ///
    /// # Errors
    ///
    /// Same as [`Self::apply_progress`].
    pub async fn apply_capture_progress(
        &self,
        id: &str,
        total_bytes: u64,
        elapsed_secs: f64,
    ) -> Result<DownloadRecord, TrackerError> {
        let mut state = self.state.lock().await;
        let record = state.active_mut(id, "update")?;
        apply_sample(record, total_bytes, 0, Utc::now());
        apply_elapsed_estimate(record, elapsed_secs);
        if record.status == DownloadStatus::Pending {
            record.status = DownloadStatus::Downloading;
        }
        let record = record.clone();
        self.persist_locked(&state).await;
        drop(state);

        self.bus.publish(Event::DownloadUpdate(ProgressSnapshot::from(&record)));
        Ok(record)
    }

    // ==================== Finalization ====================

    /// Moves an active record to the completed collection.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`] for unknown ids,
    /// [`TrackerError::InvalidTransition`] if already terminal.
    pub async fn finalize(&self, id: &str, outcome: Outcome) -> Result<DownloadRecord, TrackerError> {
        let mut state = self.state.lock().await;
        let record = finalize_locked(&mut state, id, outcome)?;
        self.persist_locked(&state).await;
        drop(state);

        self.publish_terminal(&record);
        Ok(record)
    }

    fn publish_terminal(&self, record: &DownloadRecord) {
        match record.status {
            DownloadStatus::Completed => {
                info!(download_id = %record.id, degraded = record.degraded.is_some(), "download completed");
                self.bus.publish(Event::DownloadCompleted {
                    id: record.id.clone(),
                    degraded: record.degraded.is_some(),
                });
            }
            DownloadStatus::Error => {
                let error = record.error.clone().unwrap_or_else(|| "Download failed".to_string());
                warn!(download_id = %record.id, error = %error, "download failed");
                self.bus.publish(Event::DownloadError {
                    id: record.id.clone(),
                    error,
                    source_url: record.source_url.clone(),
                });
            }
            _ => {
                info!(download_id = %record.id, "download canceled");
                self.bus.publish(Event::DownloadUpdate(ProgressSnapshot::from(record)));
            }
        }
    }

    // ==================== Manager-backed control ====================

    /// Pauses a downloading record.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidTransition`] unless `downloading` and pausable;
    /// [`TrackerError::ManagerRejected`] if the manager refuses, in which
    /// case the record is unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn pause(&self, id: &str) -> Result<DownloadRecord, TrackerError> {
        {
            let mut state = self.state.lock().await;
            let record = state.active_mut(id, "pause")?;
            if record.status != DownloadStatus::Downloading || !record.pausable {
                return Err(TrackerError::invalid_transition(id, record.status, "pause"));
            }
        }
        self.manager
            .pause(id)
            .await
            .map_err(|e| TrackerError::manager_rejected(id, "pause", e.reason()))?;

        let mut state = self.state.lock().await;
        let record = state.active_mut(id, "pause")?;
        match record.status {
            DownloadStatus::Downloading => {}
            // The manager's change event got here first.
            DownloadStatus::Paused => return Ok(record.clone()),
            other => return Err(TrackerError::invalid_transition(id, other, "pause")),
        }
        record.status = DownloadStatus::Paused;
        record.speed_bytes_per_sec = 0;
        record.eta_millis = 0;
        let record = record.clone();
        self.persist_locked(&state).await;
        drop(state);

        self.bus.publish(Event::DownloadUpdate(ProgressSnapshot::from(&record)));
        Ok(record)
    }

    /// Resumes a paused record.
    ///
    /// # Errors
    ///
    /// As for [`Self::pause`].
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, id: &str) -> Result<DownloadRecord, TrackerError> {
        {
            let mut state = self.state.lock().await;
            let record = state.active_mut(id, "resume")?;
            if record.status != DownloadStatus::Paused {
                return Err(TrackerError::invalid_transition(id, record.status, "resume"));
            }
        }
        self.manager
            .resume(id)
            .await
            .map_err(|e| TrackerError::manager_rejected(id, "resume", e.reason()))?;

        let mut state = self.state.lock().await;
        let record = state.active_mut(id, "resume")?;
        match record.status {
            DownloadStatus::Paused => {}
            DownloadStatus::Downloading => return Ok(record.clone()),
            other => return Err(TrackerError::invalid_transition(id, other, "resume")),
        }
        record.status = DownloadStatus::Downloading;
        let record = record.clone();
        self.persist_locked(&state).await;
        drop(state);

        self.bus.publish(Event::DownloadUpdate(ProgressSnapshot::from(&record)));
        Ok(record)
    }

    /// Cancels a downloading or paused record.
    ///
    /// An in-page capture, pending or downloading, is stopped through its
    /// cancel signal and finalized at once; the manager is not involved.
    ///
    /// # Errors
    ///
    /// As for [`Self::pause`].
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<DownloadRecord, TrackerError> {
        let mut state = self.state.lock().await;
        let status = state.active_mut(id, "cancel")?.status;
        if let Some(capture) = state.captures.remove(id) {
            capture.cancel();
            let record = finalize_locked(&mut state, id, Outcome::Canceled)?;
            self.persist_locked(&state).await;
            drop(state);

            debug!(download_id = %id, "capture cancel signalled");
            self.publish_terminal(&record);
            return Ok(record);
        }
        if !matches!(status, DownloadStatus::Downloading | DownloadStatus::Paused) {
            return Err(TrackerError::invalid_transition(id, status, "cancel"));
        }
        drop(state);

        self.manager
            .cancel(id)
            .await
            .map_err(|e| TrackerError::manager_rejected(id, "cancel", e.reason()))?;

        let mut state = self.state.lock().await;
        if let Some(record) = state.completed.get(id)
            && record.status == DownloadStatus::Canceled
        {
            // The manager's interrupt event got here first.
            return Ok(record.clone());
        }
        let record = finalize_locked(&mut state, id, Outcome::Canceled)?;
        self.persist_locked(&state).await;
        drop(state);

        self.publish_terminal(&record);
        Ok(record)
    }

    // ==================== Clearing ====================

    /// Deletes one completed record.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidTransition`] for active records,
    /// [`TrackerError::NotFound`] for unknown ids.
    pub async fn remove(&self, id: &str) -> Result<DownloadRecord, TrackerError> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.active.get(id) {
            return Err(TrackerError::invalid_transition(id, record.status, "remove"));
        }
        let record = state
            .completed
            .remove(id)
            .ok_or_else(|| TrackerError::not_found(id))?;
        self.persist_locked(&state).await;
        drop(state);

        self.remove_aux_keys(&[id]).await;
        Ok(record)
    }

    /// Deletes every completed record and returns how many were removed.
    pub async fn clear_completed(&self) -> usize {
        let mut state = self.state.lock().await;
        let ids: Vec<String> = state.completed.drain().map(|(id, _)| id).collect();
        self.persist_locked(&state).await;
        drop(state);

        let keys: Vec<&str> = ids.iter().map(String::as_str).collect();
        self.remove_aux_keys(&keys).await;
        ids.len()
    }

    /// Stops every running capture, cancels every running manager download,
    /// then clears both collections. Manager failures are logged and do not
    /// stop the clear.
    pub async fn clear_all(&self) -> usize {
        let mut state = self.state.lock().await;
        state.stop_captures();
        let running: Vec<String> = state
            .active
            .values()
            .filter(|record| matches!(record.status, DownloadStatus::Downloading | DownloadStatus::Paused))
            .map(|record| record.id.clone())
            .collect();
        drop(state);

        for id in &running {
            if let Err(e) = self.manager.cancel(id).await {
                warn!(download_id = %id, error = %e, "cancel during clear failed");
            }
        }

        let mut state = self.state.lock().await;
        state.stop_captures();
        let collections = &mut *state;
        let ids: Vec<String> = collections
            .active
            .drain()
            .chain(collections.completed.drain())
            .map(|(id, _)| id)
            .collect();
        self.persist_locked(&state).await;
        drop(state);

        let keys: Vec<&str> = ids.iter().map(String::as_str).collect();
        self.remove_aux_keys(&keys).await;
        info!(removed = ids.len(), "all downloads cleared");
        ids.len()
    }

    /// Discards an active record that never reached the manager.
    pub async fn discard(&self, id: &str) -> Option<DownloadRecord> {
        let mut state = self.state.lock().await;
        state.captures.remove(id);
        let record = state.active.remove(id)?;
        self.persist_locked(&state).await;
        Some(record)
    }

    // ==================== Queries ====================

    /// Progress of every active record, for the polling fallback.
    pub async fn progress_snapshot(&self) -> Vec<ProgressSnapshot> {
        let state = self.state.lock().await;
        let mut records: Vec<&DownloadRecord> = state.active.values().collect();
        records.sort_by_key(|record| record.started_at);
        records.into_iter().map(ProgressSnapshot::from).collect()
    }

    /// Both collections, oldest first.
    pub async fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.lock().await;
        TrackerSnapshot {
            active: sorted(state.active.values()),
            completed: sorted(state.completed.values()),
        }
    }

    /// Looks up a record in either collection.
    pub async fn get(&self, id: &str) -> Option<DownloadRecord> {
        let state = self.state.lock().await;
        state
            .active
            .get(id)
            .or_else(|| state.completed.get(id))
            .cloned()
    }

    // ==================== Direct downloads ====================

    /// Starts a direct download for `url` and returns the manager-assigned id.
    ///
    /// A pending record is created first and bound to the manager id once the
    /// manager answers. If the manager refuses, the pending record is
    /// discarded and the refusal is returned with a user-facing reason.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotDirectlyDownloadable`] for `blob:` URLs,
    /// [`TrackerError::ManagerRejected`] if the manager refuses, and
    /// [`TrackerError::InvalidResponse`] if its answer fails validation.
    #[tracing::instrument(skip(self, meta), fields(url = %meta.source_url))]
    pub async fn start_direct(&self, meta: PendingMeta) -> Result<String, TrackerError> {
        refuse_blob(&meta.source_url)?;
        let pending_id = self.register_pending(meta).await;
        match self.start_pending(&pending_id).await {
            Ok(os_id) => Ok(os_id),
            Err(e) => {
                if self.discard(&pending_id).await.is_some() {
                    debug!(pending_id = %pending_id, "pending download discarded after failed start");
                }
                Err(e)
            }
        }
    }

    /// Hands an existing pending record to the download manager.
    ///
    /// On failure the record stays pending so the caller can finalize it.
    ///
    /// # Errors
    ///
    /// As for [`Self::start_direct`].
    pub async fn start_pending(&self, pending_id: &str) -> Result<String, TrackerError> {
        let (url, filename) = {
            let state = self.state.lock().await;
            let record = state
                .active
                .get(pending_id)
                .ok_or_else(|| TrackerError::not_found(pending_id))?;
            if record.status != DownloadStatus::Pending {
                return Err(TrackerError::invalid_transition(pending_id, record.status, "start"));
            }
            (record.source_url.clone(), record.filename.clone())
        };
        refuse_blob(&url)?;

        let os_id = self
            .manager
            .start(StartRequest::new(&url, filename))
            .await
            .map_err(|e| TrackerError::manager_rejected(pending_id, "start", user_facing_reason(e.reason())))?;
        self.bind_os_id(pending_id, &os_id).await?;

        let item = self
            .manager
            .query(&os_id)
            .await
            .map_err(|e| TrackerError::InvalidResponse {
                reason: e.to_string(),
            })?
            .ok_or_else(|| TrackerError::InvalidResponse {
                reason: format!("download manager lost download {os_id}"),
            })?;
        item.validate(&os_id).map_err(|e| TrackerError::InvalidResponse {
            reason: e.to_string(),
        })?;

        match self.confirm_started(&os_id, &item).await {
            Ok(_) => self.sync_item(&item).await,
            // Change events already finished it.
            Err(TrackerError::InvalidTransition { from, .. }) if from.is_terminal() => {}
            Err(e) => return Err(e),
        }
        Ok(os_id)
    }

    async fn sync_item(&self, item: &DownloadItem) {
        let mut delta = DownloadDelta::new(&item.id);
        delta.bytes_received = Some(item.bytes_received);
        delta.total_bytes = Some(item.total_bytes);
        if item.state != ItemState::InProgress {
            delta.state = Some(item.state);
            delta.error.clone_from(&item.error);
        }
        self.handle_manager_event(ManagerEvent::Changed(delta)).await;
    }

    // ==================== Manager events ====================

    /// Applies one manager notification. Events for unknown or already
    /// finalized ids are ignored.
    pub async fn handle_manager_event(&self, event: ManagerEvent) {
        let delta = match event {
            ManagerEvent::Created(item) => {
                trace!(download_id = %item.id, "manager created download");
                return;
            }
            ManagerEvent::Changed(delta) => delta,
        };
        let id = delta.id.clone();

        let current = {
            let state = self.state.lock().await;
            state.active.get(&id).cloned()
        };
        let Some(current) = current else {
            trace!(download_id = %id, "change for untracked download ignored");
            return;
        };

        if let Some(paused) = delta.paused {
            self.reflect_pause(&id, paused).await;
        }

        if delta.bytes_received.is_some() || delta.total_bytes.is_some() {
            let bytes = delta.bytes_received.unwrap_or(current.bytes_downloaded);
            let total = delta.total_bytes.unwrap_or(current.bytes_total);
            if let Err(e) = self.apply_progress(&id, bytes, total, Utc::now()).await {
                debug!(download_id = %id, error = %e, "progress not applied");
            }
        }

        let outcome = match delta.state {
            Some(ItemState::Complete) => Outcome::Completed(Completion::default()),
            Some(ItemState::Interrupted) => match delta.error.as_deref() {
                Some(interrupt::USER_CANCELED) => Outcome::Canceled,
                Some(code) => Outcome::Error(user_facing_reason(code)),
                None => Outcome::Error("Download interrupted".to_string()),
            },
            Some(ItemState::InProgress) | None => return,
        };
        if let Err(e) = self.finalize(&id, outcome).await {
            debug!(download_id = %id, error = %e, "terminal change not applied");
        }
    }

    async fn reflect_pause(&self, id: &str, paused: bool) {
        let mut state = self.state.lock().await;
        let Some(record) = state.active.get_mut(id) else {
            return;
        };
        let next = match (record.status, paused) {
            (DownloadStatus::Downloading, true) => DownloadStatus::Paused,
            (DownloadStatus::Paused, false) => DownloadStatus::Downloading,
            _ => return,
        };
        record.status = next;
        if paused {
            record.speed_bytes_per_sec = 0;
            record.eta_millis = 0;
        }
        let record = record.clone();
        self.persist_locked(&state).await;
        drop(state);
        self.bus.publish(Event::DownloadUpdate(ProgressSnapshot::from(&record)));
    }

    // ==================== Persistence ====================

    /// Writes both collections to the store. Failures are logged, not returned.
    pub async fn persist(&self) {
        let state = self.state.lock().await;
        self.persist_locked(&state).await;
    }

    async fn persist_locked(&self, state: &Collections) {
        let entries = match (
            serde_json::to_value(&state.active),
            serde_json::to_value(&state.completed),
        ) {
            (Ok(active), Ok(completed)) => HashMap::from([
                (ACTIVE_DOWNLOADS_KEY.to_string(), active),
                (COMPLETED_DOWNLOADS_KEY.to_string(), completed),
            ]),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to encode download state");
                return;
            }
        };
        if let Err(e) = self.store.set(entries).await {
            warn!(error = %e, "failed to persist download state");
        }
    }

    /// Reloads both collections and drops active records the manager no
    /// longer reports as in progress.
    ///
    /// A record found in both collections (possible after a crash between the
    /// two writes) keeps its completed copy.
    pub async fn restore(&self) -> RestoreSummary {
        let stored = match self
            .store
            .get(&[ACTIVE_DOWNLOADS_KEY, COMPLETED_DOWNLOADS_KEY])
            .await
        {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "failed to load download state");
                HashMap::new()
            }
        };
        let mut active = decode_collection(stored.get(ACTIVE_DOWNLOADS_KEY), ACTIVE_DOWNLOADS_KEY);
        let completed = decode_collection(stored.get(COMPLETED_DOWNLOADS_KEY), COMPLETED_DOWNLOADS_KEY);

        active.retain(|id, _| !completed.contains_key(id));

        let mut stale = Vec::new();
        for id in active.keys() {
            let live = match self.manager.query(id).await {
                Ok(Some(item)) => item.validate(id).is_ok() && item.state == ItemState::InProgress,
                Ok(None) => false,
                Err(e) => {
                    debug!(download_id = %id, error = %e, "manager query failed during restore");
                    false
                }
            };
            if !live {
                stale.push(id.clone());
            }
        }
        for id in &stale {
            active.remove(id);
            debug!(download_id = %id, "stale active download dropped");
        }

        let summary = RestoreSummary {
            active: active.len(),
            completed: completed.len(),
            dropped: stale.len(),
        };

        let mut state = self.state.lock().await;
        state.active = active;
        state.completed = completed;
        self.persist_locked(&state).await;
        drop(state);

        let keys: Vec<&str> = stale.iter().map(String::as_str).collect();
        self.remove_aux_keys(&keys).await;
        summary
    }

    async fn remove_aux_keys(&self, ids: &[&str]) {
        if ids.is_empty() {
            return;
        }
        let keys: Vec<String> = ids.iter().map(|id| download_aux_key(id)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        if let Err(e) = self.store.remove(&refs).await {
            warn!(error = %e, "failed to remove auxiliary download keys");
        }
    }
}

#[async_trait]
impl DelegateDownload for DownloadTracker {
    async fn delegate(&self, record_id: &str) -> Result<String, String> {
        self.start_pending(record_id)
            .await
            .map_err(|e| e.user_message())
    }
}

fn finalize_locked(state: &mut Collections, id: &str, outcome: Outcome) -> Result<DownloadRecord, TrackerError> {
    if let Some(record) = state.completed.get(id) {
        return Err(TrackerError::invalid_transition(id, record.status, "finalize"));
    }
    let mut record = state
        .active
        .remove(id)
        .ok_or_else(|| TrackerError::not_found(id))?;
    state.captures.remove(id);

    record.ended_at = Some(Utc::now());
    record.speed_bytes_per_sec = 0;
    record.eta_millis = 0;
    match outcome {
        Outcome::Completed(completion) => {
            record.status = DownloadStatus::Completed;
            if let Some(filename) = completion.filename {
                record.filename = filename;
            }
            if let Some(bytes) = completion.bytes {
                record.bytes_downloaded = record.bytes_downloaded.max(bytes);
            }
            record.bytes_total = record.bytes_total.max(record.bytes_downloaded);
            record.degraded = completion.degraded;
            record.progress_percent = 100.0;
        }
        Outcome::Error(reason) => {
            record.status = DownloadStatus::Error;
            record.error = Some(reason);
        }
        Outcome::Canceled => record.status = DownloadStatus::Canceled,
    }
    state.completed.insert(id.to_string(), record.clone());
    Ok(record)
}

fn refuse_blob(url: &str) -> Result<(), TrackerError> {
    if classify(url).kind == ResourceKind::Blob {
        return Err(TrackerError::NotDirectlyDownloadable {
            url: url.to_string(),
            reason: "Blob URLs must be captured from the page".to_string(),
        });
    }
    Ok(())
}

fn decode_collection(value: Option<&Value>, key: &str) -> HashMap<String, DownloadRecord> {
    let Some(value) = value else {
        return HashMap::new();
    };
    match serde_json::from_value::<HashMap<String, DownloadRecord>>(value.clone()) {
        Ok(mut records) => {
            for (id, record) in &mut records {
                record.id.clone_from(id);
            }
            records
        }
        Err(e) => {
            warn!(key, error = %e, "stored download collection is unreadable; starting empty");
            HashMap::new()
        }
    }
}

fn sorted<'a>(records: impl Iterator<Item = &'a DownloadRecord>) -> Vec<DownloadRecord> {
    let mut out: Vec<DownloadRecord> = records.cloned().collect();
    out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
    out
}

async fn run_event_loop(tracker: Weak<DownloadTracker>, mut events: broadcast::Receiver<ManagerEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "manager events dropped; polling will catch up");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(tracker) = tracker.upgrade() else {
            break;
        };
        tracker.handle_manager_event(event).await;
    }
    debug!("manager event loop stopped");
}
