//! Integration tests for the acquisition chain and its HTTP strategies.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use video_downloader_core::acquisition::{
    AcquireContext, AcquireError, Acquisition, AcquisitionChain, AcquisitionStrategy, CancelHandle, CancelSignal,
    CapturePolicy, DelegateDownload, DirectRefetch, DirectorySink, SavedArtifact, StrategyError, build_default_chain,
    cancel_pair,
};
use video_downloader_core::bus::EventBus;
use video_downloader_core::http::{HttpSettings, build_client};
use video_downloader_core::record::{DetectedVideo, VideoType};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Strategy with a fixed answer that counts its invocations.
struct Scripted {
    name: &'static str,
    calls: Arc<AtomicUsize>,
    answer: Result<Acquisition, StrategyError>,
    delay: Option<Duration>,
}

impl Scripted {
    fn new(name: &'static str, answer: Result<Acquisition, StrategyError>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = Self {
            name,
            calls: Arc::clone(&calls),
            answer,
            delay: None,
        };
        (strategy, calls)
    }
}

#[async_trait]
impl AcquisitionStrategy for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn acquire(&self, _video: &DetectedVideo, _ctx: &AcquireContext) -> Result<Acquisition, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer.clone()
    }
}

/// Strategy that cancels the run while it is in progress, as a user would.
struct CancelsMidway(CancelHandle);

#[async_trait]
impl AcquisitionStrategy for CancelsMidway {
    fn name(&self) -> &str {
        "cancels_midway"
    }

    async fn acquire(&self, _video: &DetectedVideo, _ctx: &AcquireContext) -> Result<Acquisition, StrategyError> {
        self.0.cancel();
        Err(StrategyError::NoDataCaptured)
    }
}

struct FixedDelegate(Result<String, String>);

#[async_trait]
impl DelegateDownload for FixedDelegate {
    async fn delegate(&self, _record_id: &str) -> Result<String, String> {
        self.0.clone()
    }
}

fn ctx() -> AcquireContext {
    AcquireContext {
        record_id: "rec-1".to_string(),
        bus: Arc::new(EventBus::default()),
        observer: None,
        cancel: CancelSignal::never(),
    }
}

fn saved(name: &str) -> Acquisition {
    Acquisition::Saved(SavedArtifact {
        path: name.into(),
        filename: name.to_string(),
        bytes: 3,
        mime: None,
        degraded: None,
    })
}

fn video(url: &str) -> DetectedVideo {
    DetectedVideo::new(url, VideoType::Html5).with_title("Lecture")
}

// ==================== Chain ordering ====================

#[tokio::test]
async fn test_chain_stops_at_first_success() {
    let (first, first_calls) = Scripted::new("first", Err(StrategyError::NoDataCaptured));
    let (second, second_calls) = Scripted::new("second", Ok(saved("clip.webm")));
    let (third, third_calls) = Scripted::new("third", Ok(saved("never.webm")));
    let mut chain = AcquisitionChain::new(Duration::from_secs(60));
    chain.register(Box::new(first));
    chain.register(Box::new(second));
    chain.register(Box::new(third));

    let result = chain.acquire(&video("blob:https://site.example/1"), &ctx()).await.unwrap();

    assert_eq!(result, saved("clip.webm"));
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    assert_eq!(third_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chain_reports_every_failure_in_order() {
    let (first, _) = Scripted::new("first", Err(StrategyError::unsupported("page media access")));
    let (second, _) = Scripted::new(
        "second",
        Err(StrategyError::HttpStatus {
            url: "https://x/a.mp4".to_string(),
            status: 403,
        }),
    );
    let mut chain = AcquisitionChain::new(Duration::from_secs(60));
    chain.register(Box::new(first));
    chain.register(Box::new(second));

    let err = chain.acquire(&video("https://x/a.mp4"), &ctx()).await.unwrap_err();

    let names: Vec<&str> = err.failures().iter().map(|f| f.strategy.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);
    assert!(err.user_message().contains("second: HTTP 403"));
    assert!(!err.user_message().contains("page media access"));
}

#[tokio::test]
async fn test_empty_chain_has_no_method() {
    let chain = AcquisitionChain::new(Duration::from_secs(1));
    let err = chain.acquire(&video("https://x/a.mp4"), &ctx()).await.unwrap_err();
    assert_eq!(err.user_message(), "No acquisition method is available for this video");
}

#[tokio::test(start_paused = true)]
async fn test_chain_budget_times_out() {
    let (mut slow, _) = Scripted::new("slow", Ok(saved("late.webm")));
    slow.delay = Some(Duration::from_secs(3600));
    let mut chain = AcquisitionChain::new(Duration::from_secs(5));
    chain.register(Box::new(slow));

    let err = chain.acquire(&video("https://x/a.mp4"), &ctx()).await.unwrap_err();

    assert!(matches!(err, AcquireError::Timeout { .. }));
    assert_eq!(err.user_message(), "Acquisition timed out after 5 seconds");
}

#[tokio::test]
async fn test_cancel_stops_chain_before_next_strategy() {
    let (handle, cancel) = cancel_pair();
    let (after, after_calls) = Scripted::new("after", Ok(saved("never.webm")));
    let mut chain = AcquisitionChain::new(Duration::from_secs(60));
    chain.register(Box::new(CancelsMidway(handle)));
    chain.register(Box::new(after));

    let ctx = AcquireContext { cancel, ..ctx() };
    let err = chain.acquire(&video("blob:https://site.example/1"), &ctx).await.unwrap_err();

    assert!(matches!(err, AcquireError::Canceled { .. }), "got {err:?}");
    assert_eq!(err.user_message(), "Download canceled");
    assert_eq!(err.failures().len(), 1);
    assert_eq!(after_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_strategy_reported_cancel_ends_chain() {
    let (first, _) = Scripted::new("first", Err(StrategyError::Canceled));
    let (second, second_calls) = Scripted::new("second", Ok(saved("never.webm")));
    let mut chain = AcquisitionChain::new(Duration::from_secs(60));
    chain.register(Box::new(first));
    chain.register(Box::new(second));

    let err = chain.acquire(&video("https://x/a.mp4"), &ctx()).await.unwrap_err();

    assert!(matches!(err, AcquireError::Canceled { .. }));
    assert!(err.failures().is_empty());
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

// ==================== Direct re-fetch ====================

#[tokio::test]
async fn test_refetch_saves_body_with_content_type_extension() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream/lecture"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"webm-bytes".to_vec(), "video/webm"),
        )
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let client = build_client(HttpSettings::default()).unwrap();
    let strategy = DirectRefetch::new(client, Arc::new(DirectorySink::new(dir.path())));

    let url = format!("{}/stream/lecture", server.uri());
    let result = strategy.acquire(&video(&url), &ctx()).await.unwrap();

    let Acquisition::Saved(artifact) = result else {
        panic!("expected a saved artifact");
    };
    assert!(artifact.filename.ends_with(".webm"), "got {}", artifact.filename);
    assert_eq!(artifact.bytes, 10);
    assert_eq!(artifact.mime.as_deref(), Some("video/webm"));
    assert_eq!(std::fs::read(&artifact.path).unwrap(), b"webm-bytes");
}

#[tokio::test]
async fn test_refetch_reports_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private.mp4"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let client = build_client(HttpSettings::default()).unwrap();
    let strategy = DirectRefetch::new(client, Arc::new(DirectorySink::new(dir.path())));

    let url = format!("{}/private.mp4", server.uri());
    let err = strategy.acquire(&video(&url), &ctx()).await.unwrap_err();

    assert_eq!(err, StrategyError::HttpStatus { url, status: 403 });
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_refetch_streams_large_body() {
    let body: Vec<u8> = (0..3_000_000u32).map(|i| u8::try_from(i % 251).unwrap()).collect();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/long.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "video/mp4"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let strategy = DirectRefetch::new(
        build_client(HttpSettings::default()).unwrap(),
        Arc::new(DirectorySink::new(dir.path())),
    );

    let url = format!("{}/long.mp4", server.uri());
    let Acquisition::Saved(artifact) = strategy.acquire(&video(&url), &ctx()).await.unwrap() else {
        panic!("expected a saved artifact");
    };

    assert_eq!(artifact.bytes, 3_000_000);
    assert_eq!(std::fs::read(&artifact.path).unwrap(), body);
}

#[tokio::test]
async fn test_refetch_empty_body_leaves_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(Vec::new(), "video/mp4"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let strategy = DirectRefetch::new(
        build_client(HttpSettings::default()).unwrap(),
        Arc::new(DirectorySink::new(dir.path())),
    );

    let url = format!("{}/empty.mp4", server.uri());
    let err = strategy.acquire(&video(&url), &ctx()).await.unwrap_err();

    assert_eq!(err, StrategyError::network(url, "empty response body"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_canceled_refetch_removes_partial_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8; 4096], "video/mp4"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let strategy = DirectRefetch::new(
        build_client(HttpSettings::default()).unwrap(),
        Arc::new(DirectorySink::new(dir.path())),
    );
    let (handle, cancel) = cancel_pair();
    handle.cancel();

    let url = format!("{}/clip.mp4", server.uri());
    let err = strategy
        .acquire(&video(&url), &AcquireContext { cancel, ..ctx() })
        .await
        .unwrap_err();

    assert_eq!(err, StrategyError::Canceled);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_refetch_refuses_blob_urls() {
    let dir = TempDir::new().unwrap();
    let client = build_client(HttpSettings::default()).unwrap();
    let strategy = DirectRefetch::new(client, Arc::new(DirectorySink::new(dir.path())));

    let err = strategy
        .acquire(&video("blob:https://site.example/1"), &ctx())
        .await
        .unwrap_err();
    assert!(err.is_capability_gap());
}

// ==================== Default chain ====================

#[tokio::test]
async fn test_default_chain_delegates_after_forbidden_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let chain = build_default_chain(
        build_client(HttpSettings::default()).unwrap(),
        Arc::new(DirectorySink::new(dir.path())),
        None,
        Arc::new(FixedDelegate(Ok("42".to_string()))),
        CapturePolicy::default(),
        Duration::from_secs(30),
    );

    let url = format!("{}/embed/video.m3u8", server.uri());
    let result = chain.acquire(&video(&url), &ctx()).await.unwrap();

    assert_eq!(
        result,
        Acquisition::Delegated {
            download_id: "42".to_string()
        }
    );
}

#[tokio::test]
async fn test_default_chain_blob_without_page_is_exhausted() {
    let dir = TempDir::new().unwrap();
    let chain = build_default_chain(
        build_client(HttpSettings::default()).unwrap(),
        Arc::new(DirectorySink::new(dir.path())),
        None,
        Arc::new(FixedDelegate(Err("Blob URLs must be captured from the page".to_string()))),
        CapturePolicy::default(),
        Duration::from_secs(30),
    );

    let err = chain
        .acquire(&video("blob:https://site.example/1"), &ctx())
        .await
        .unwrap_err();

    assert_eq!(err.failures().len(), 4);
    assert!(
        err.user_message()
            .contains("background_delegate: background download failed: Blob URLs must be captured from the page")
    );
}
