//! Shared fixtures for integration tests: a scriptable download manager and
//! a tracker wired to in-memory storage.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use video_downloader_core::bus::{Broadcaster, Event, EventBus};
use video_downloader_core::manager::{
    DownloadItem, DownloadManager, ItemState, ManagerError, ManagerEvent, StartRequest,
};
use video_downloader_core::store::{KeyValueStore, MemoryStore};
use video_downloader_core::tracker::{DownloadTracker, PendingMeta};

/// Size reported for every download the fake starts.
pub const FAKE_TOTAL: u64 = 2_000_000;

/// In-memory [`DownloadManager`] with scriptable refusals.
pub struct FakeManager {
    pub(crate) items: Mutex<HashMap<String, DownloadItem>>,
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) next_id: AtomicU64,
    pub(crate) events: broadcast::Sender<ManagerEvent>,
    /// Reason returned by `start`, when set.
    pub reject_start: Option<String>,
    /// Reason returned by pause/resume/cancel, when set.
    pub reject_control: Option<String>,
    /// `can_resume` for started downloads.
    pub can_resume: bool,
}

impl Default for FakeManager {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            items: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(100),
            events,
            reject_start: None,
            reject_control: None,
            can_resume: true,
        }
    }
}

impl FakeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an item as if the manager had started it earlier.
    pub fn insert(&self, item: DownloadItem) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }

    /// Operations received so far, as `op:id`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Publishes a change notification to subscribers.
    pub fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    fn control(&self, op: &'static str, id: &str, update: impl FnOnce(&mut DownloadItem)) -> Result<(), ManagerError> {
        self.calls.lock().unwrap().push(format!("{op}:{id}"));
        if let Some(reason) = &self.reject_control {
            return Err(ManagerError::rejected(op, id, reason.clone()));
        }
        let mut items = self.items.lock().unwrap();
        let item = items.get_mut(id).ok_or_else(|| ManagerError::not_found(id))?;
        update(item);
        Ok(())
    }
}

#[async_trait]
impl DownloadManager for FakeManager {
    async fn start(&self, request: StartRequest) -> Result<String, ManagerError> {
        self.calls.lock().unwrap().push(format!("start:{}", request.url));
        if let Some(reason) = &self.reject_start {
            return Err(ManagerError::rejected("start", &request.url, reason.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let item = DownloadItem {
            id: id.clone(),
            url: request.url,
            filename: request.filename,
            state: ItemState::InProgress,
            bytes_received: 0,
            total_bytes: FAKE_TOTAL,
            can_resume: self.can_resume,
            paused: false,
            error: None,
        };
        self.insert(item.clone());
        self.emit(ManagerEvent::Created(item));
        Ok(id)
    }

    async fn pause(&self, id: &str) -> Result<(), ManagerError> {
        self.control("pause", id, |item| item.paused = true)
    }

    async fn resume(&self, id: &str) -> Result<(), ManagerError> {
        self.control("resume", id, |item| item.paused = false)
    }

    async fn cancel(&self, id: &str) -> Result<(), ManagerError> {
        self.control("cancel", id, |item| {
            item.state = ItemState::Interrupted;
            item.paused = false;
            item.error = Some("USER_CANCELED".to_string());
        })
    }

    async fn query(&self, id: &str) -> Result<Option<DownloadItem>, ManagerError> {
        Ok(self.items.lock().unwrap().get(id).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }
}

/// A tracker with its collaborators kept accessible.
pub struct Harness {
    pub tracker: Arc<DownloadTracker>,
    pub manager: Arc<FakeManager>,
    pub store: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
}

impl Harness {
    pub fn new(manager: FakeManager) -> Self {
        Self::with_store(manager, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(manager: FakeManager, store: Arc<MemoryStore>) -> Self {
        let manager = Arc::new(manager);
        let bus = Arc::new(EventBus::default());
        let kv: Arc<dyn KeyValueStore> = store.clone();
        let dm: Arc<dyn DownloadManager> = manager.clone();
        let broadcaster: Arc<dyn Broadcaster> = bus.clone();
        let tracker = Arc::new(DownloadTracker::new(kv, dm, broadcaster));
        Self {
            tracker,
            manager,
            store,
            bus,
        }
    }
}

/// Metadata for a direct MP4 download.
pub fn clip_meta(url: &str) -> PendingMeta {
    PendingMeta {
        title: "Clip".to_string(),
        source_url: url.to_string(),
        filename: "clip.mp4".to_string(),
        duration_seconds: None,
    }
}

/// Drains every event currently queued on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
