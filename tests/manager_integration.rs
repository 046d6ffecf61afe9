//! Integration tests for the local download manager, alone and driven by
//! the tracker.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use video_downloader_core::bus::{Broadcaster, Event, EventBus};
use video_downloader_core::http::{HttpSettings, build_client};
use video_downloader_core::manager::{
    DownloadItem, DownloadManager, ItemState, LocalDownloadManager, ManagerEvent, StartRequest,
};
use video_downloader_core::record::DownloadStatus;
use video_downloader_core::store::{KeyValueStore, MemoryStore};
use video_downloader_core::tracker::{DownloadTracker, PendingMeta};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(10);

async fn serve(route: &str, template: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(&server)
        .await;
    server
}

fn local_manager(dir: &TempDir) -> LocalDownloadManager {
    LocalDownloadManager::new(build_client(HttpSettings::default()).unwrap(), dir.path())
}

/// Waits for the manager to report a terminal item for `id`.
async fn wait_terminal(rx: &mut broadcast::Receiver<ManagerEvent>, manager: &LocalDownloadManager, id: &str) -> DownloadItem {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(item) = manager.query(id).await.unwrap()
                && item.state != ItemState::InProgress
            {
                return item;
            }
            let _ = rx.recv().await;
        }
    })
    .await
    .expect("download did not finish in time")
}

fn meta(url: String) -> PendingMeta {
    PendingMeta {
        title: "Lecture".to_string(),
        source_url: url,
        filename: "lecture.mp4".to_string(),
        duration_seconds: None,
    }
}

// ==================== Manager alone ====================

#[tokio::test]
async fn test_local_manager_writes_body_and_completes() {
    let body = vec![7_u8; 64 * 1024];
    let server = serve("/v/lecture.mp4", ResponseTemplate::new(200).set_body_bytes(body.clone())).await;
    let dir = TempDir::new().unwrap();
    let manager = local_manager(&dir);
    let mut rx = manager.subscribe();

    let id = manager
        .start(StartRequest::new(format!("{}/v/lecture.mp4", server.uri()), "lecture.mp4"))
        .await
        .unwrap();
    let item = wait_terminal(&mut rx, &manager, &id).await;

    assert_eq!(item.state, ItemState::Complete);
    assert_eq!(item.bytes_received, body.len() as u64);
    assert_eq!(item.filename, "lecture.mp4");
    assert_eq!(std::fs::read(dir.path().join("lecture.mp4")).unwrap(), body);
}

#[tokio::test]
async fn test_local_manager_uniquifies_existing_names() {
    let server = serve("/v/a.mp4", ResponseTemplate::new(200).set_body_bytes(b"new".to_vec())).await;
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.mp4"), b"old").unwrap();
    let manager = local_manager(&dir);
    let mut rx = manager.subscribe();

    let id = manager
        .start(StartRequest::new(format!("{}/v/a.mp4", server.uri()), "a.mp4"))
        .await
        .unwrap();
    let item = wait_terminal(&mut rx, &manager, &id).await;

    assert_ne!(item.filename, "a.mp4");
    assert_eq!(std::fs::read(dir.path().join("a.mp4")).unwrap(), b"old");
    assert_eq!(std::fs::read(dir.path().join(&item.filename)).unwrap(), b"new");
}

#[tokio::test]
async fn test_local_manager_maps_not_found() {
    let server = serve("/gone.mp4", ResponseTemplate::new(404)).await;
    let dir = TempDir::new().unwrap();
    let manager = local_manager(&dir);
    let mut rx = manager.subscribe();

    let id = manager
        .start(StartRequest::new(format!("{}/gone.mp4", server.uri()), "gone.mp4"))
        .await
        .unwrap();
    let item = wait_terminal(&mut rx, &manager, &id).await;

    assert_eq!(item.state, ItemState::Interrupted);
    assert_eq!(item.error.as_deref(), Some("SERVER_BAD_CONTENT"));
    assert!(!dir.path().join("gone.mp4").exists(), "partial file must be removed");
}

#[tokio::test]
async fn test_finished_download_stays_queryable_but_uncontrollable() {
    let server = serve("/v/short.mp4", ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec())).await;
    let dir = TempDir::new().unwrap();
    let manager = local_manager(&dir);
    let mut rx = manager.subscribe();

    let id = manager
        .start(StartRequest::new(format!("{}/v/short.mp4", server.uri()), "short.mp4"))
        .await
        .unwrap();
    wait_terminal(&mut rx, &manager, &id).await;

    let item = manager.query(&id).await.unwrap().unwrap();
    assert_eq!(item.state, ItemState::Complete);
    assert!(!item.can_resume);
    for err in [
        manager.pause(&id).await.unwrap_err(),
        manager.cancel(&id).await.unwrap_err(),
    ] {
        assert_eq!(err.reason(), "Download must be in progress");
    }
}

// ==================== Tracker over the local manager ====================

struct Stack {
    tracker: Arc<DownloadTracker>,
    bus: Arc<EventBus>,
    _dir: TempDir,
}

async fn stack() -> Stack {
    let dir = TempDir::new().unwrap();
    let manager: Arc<dyn DownloadManager> = Arc::new(local_manager(&dir));
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());
    let broadcaster: Arc<dyn Broadcaster> = bus.clone();
    let tracker = Arc::new(DownloadTracker::new(store, manager, broadcaster));
    tracker.init().await;
    Stack { tracker, bus, _dir: dir }
}

#[tokio::test]
async fn test_tracker_follows_local_download_to_completion() {
    let body = b"0123456789".repeat(1000);
    let server = serve("/v/lecture.mp4", ResponseTemplate::new(200).set_body_bytes(body.clone())).await;
    let s = stack().await;
    let mut rx = s.bus.subscribe();

    let id = s
        .tracker
        .start_direct(meta(format!("{}/v/lecture.mp4", server.uri())))
        .await
        .unwrap();

    let completed = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(record) = s.tracker.get(&id).await
                && record.status.is_terminal()
            {
                return record;
            }
            let _ = rx.recv().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(completed.status, DownloadStatus::Completed);
    assert_eq!(completed.bytes_downloaded, body.len() as u64);
    assert!((completed.progress_percent - 100.0).abs() < f64::EPSILON);
    s.tracker.teardown().await;
}

#[tokio::test]
async fn test_tracker_cancel_stops_local_transfer() {
    let server = serve(
        "/v/slow.mp4",
        ResponseTemplate::new(200)
            .set_body_bytes(b"late".to_vec())
            .set_delay(Duration::from_secs(30)),
    )
    .await;
    let s = stack().await;
    let mut rx = s.bus.subscribe();

    let id = s
        .tracker
        .start_direct(meta(format!("{}/v/slow.mp4", server.uri())))
        .await
        .unwrap();
    let record = s.tracker.cancel(&id).await.unwrap();
    assert_eq!(record.status, DownloadStatus::Canceled);

    // A late interrupt from the manager must not change the outcome.
    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        while let Ok(event) = rx.recv().await {
            if matches!(event, Event::DownloadError { .. }) {
                break;
            }
        }
    })
    .await;
    assert_eq!(s.tracker.get(&id).await.unwrap().status, DownloadStatus::Canceled);
    s.tracker.teardown().await;
}
