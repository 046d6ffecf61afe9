//! Real-time capture of a playing media element.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::media::{MediaElement, MediaHost, RecorderBackend, RecorderConfig};
use super::{
    AcquireContext, Acquisition, AcquisitionStrategy, CapturePolicy, Recorder, RecorderEvent, SaveSink,
    SavedArtifact, StrategyError,
};
use crate::bus::Event;
use crate::filename::generate_capture_filename;
use crate::record::DetectedVideo;

/// Container types tried in order; the first one the recorder supports wins.
pub const MIME_PREFERENCES: [&str; 5] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=h264,opus",
    "video/webm",
    "video/mp4",
];

const FALLBACK_VIDEO_BITRATE: u32 = 2_500_000;
const FALLBACK_AUDIO_BITRATE: u32 = 128_000;

/// Returns the first entry of [`MIME_PREFERENCES`] that `element` can record.
pub fn negotiate_mime_type(element: &dyn MediaElement) -> Option<&'static str> {
    MIME_PREFERENCES
        .into_iter()
        .find(|mime| element.is_type_supported(mime))
}

/// Recorder configurations in the order they are attempted.
///
/// The negotiated type first (if any), then a bitrate-only configuration,
/// then the runtime defaults.
#[must_use]
pub fn recorder_configs(mime_type: Option<&str>) -> Vec<RecorderConfig> {
    let mut configs = Vec::with_capacity(3);
    if let Some(mime) = mime_type {
        configs.push(RecorderConfig {
            mime_type: Some(mime.to_string()),
            ..RecorderConfig::default()
        });
    }
    configs.push(RecorderConfig {
        mime_type: None,
        video_bits_per_second: Some(FALLBACK_VIDEO_BITRATE),
        audio_bits_per_second: Some(FALLBACK_AUDIO_BITRATE),
    });
    configs.push(RecorderConfig::default());
    configs
}

/// Records the element playing the video for up to its duration.
pub struct StreamCapture {
    host: Option<Arc<dyn MediaHost>>,
    sink: Arc<dyn SaveSink>,
    policy: CapturePolicy,
}

impl StreamCapture {
    /// Creates the strategy. Without a `host` it always reports an
    /// unsupported capability.
    #[must_use]
    pub fn new(host: Option<Arc<dyn MediaHost>>, sink: Arc<dyn SaveSink>, policy: CapturePolicy) -> Self {
        Self { host, sink, policy }
    }

    async fn open_recorder(&self, element: &dyn MediaElement) -> Result<Box<dyn RecorderBackend>, StrategyError> {
        let negotiated = negotiate_mime_type(element);
        debug!(mime = ?negotiated, "negotiated recorder type");

        let mut last_error = String::from("no recorder configuration available");
        for config in recorder_configs(negotiated) {
            match element.open_recorder(&config).await {
                Ok(backend) => return Ok(backend),
                Err(e) => {
                    debug!(?config, error = %e, "recorder configuration rejected");
                    last_error = e;
                }
            }
        }
        Err(StrategyError::Recording { reason: last_error })
    }
}

#[async_trait]
impl AcquisitionStrategy for StreamCapture {
    fn name(&self) -> &'static str {
        "stream_capture"
    }

    async fn acquire(&self, video: &DetectedVideo, ctx: &AcquireContext) -> Result<Acquisition, StrategyError> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| StrategyError::unsupported("page media access"))?;
        let element = host
            .find_element(&video.url)
            .await
            .ok_or_else(|| StrategyError::skipped("no media element is playing this URL"))?;

        if !element.supports_stream_capture() {
            return Err(StrategyError::unsupported("media stream capture"));
        }
        if !element.recorder_available() {
            return Err(StrategyError::unsupported("media recorder"));
        }

        let info = element.info();
        if info.paused
            && let Err(e) = element.play().await
        {
            warn!(url = %video.url, error = %e, "could not start playback; recording anyway");
        }

        let duration = info.known_duration().or(video.duration_seconds);
        let backend = self.open_recorder(element.as_ref()).await?;
        let mut recorder = Recorder::new(backend, self.policy, duration).with_cancel(ctx.cancel.clone());
        recorder.start().await?;
        info!(
            url = %video.url,
            limit_secs = recorder.limit().as_secs(),
            "stream capture started"
        );

        loop {
            match recorder.next_event().await? {
                RecorderEvent::Progress(progress) => {
                    ctx.bus.publish(Event::StreamRecordingProgress {
                        elapsed_secs: progress.elapsed.as_secs_f64(),
                        total_bytes: progress.total_bytes,
                        chunk_size: progress.chunk_size,
                        url: video.url.clone(),
                    });
                    if let Some(observer) = &ctx.observer {
                        observer.on_progress(&progress).await;
                    }
                }
                RecorderEvent::Finished(reason) => {
                    debug!(?reason, "stream capture finished");
                    break;
                }
            }
        }

        let output = recorder.stop().await?;
        let extension = if output.mime_type.contains("mp4") { "mp4" } else { "webm" };
        let filename = generate_capture_filename(&video.title, "captured", extension, Utc::now());
        let path = self.sink.save(&filename, &output.data).await?;
        info!(
            path = %path.display(),
            bytes = output.data.len(),
            chunks = output.chunk_count,
            "stream capture saved"
        );

        let filename = path
            .file_name()
            .map_or(filename, |name| name.to_string_lossy().into_owned());
        Ok(Acquisition::Saved(SavedArtifact {
            path,
            filename,
            bytes: output.data.len() as u64,
            mime: Some(output.mime_type),
            degraded: None,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use tempfile::TempDir;

    use super::super::{CancelSignal, DirectorySink, cancel_pair};
    use super::super::media::testing::{FakeElement, FakeHost};
    use super::*;
    use crate::bus::EventBus;
    use crate::record::VideoType;

    fn setup(element: Option<FakeElement>) -> (StreamCapture, Option<Arc<FakeElement>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let element = element.map(Arc::new);
        let host = FakeHost {
            element: element.clone(),
        };
        let strategy = StreamCapture::new(
            Some(Arc::new(host)),
            Arc::new(DirectorySink::new(dir.path())),
            CapturePolicy::default(),
        );
        (strategy, element, dir)
    }

    fn ctx(bus: Arc<EventBus>) -> AcquireContext {
        AcquireContext {
            record_id: "rec-1".to_string(),
            bus,
            observer: None,
            cancel: CancelSignal::never(),
        }
    }

    fn video() -> DetectedVideo {
        DetectedVideo::new("blob:https://site.example/abc", VideoType::Html5)
            .with_title("Clip")
            .with_duration(20.0)
    }

    // ==================== Configuration ====================

    #[test]
    fn test_recorder_configs_order() {
        let configs = recorder_configs(Some("video/webm"));
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].mime_type.as_deref(), Some("video/webm"));
        assert_eq!(configs[1].video_bits_per_second, Some(2_500_000));
        assert_eq!(configs[1].audio_bits_per_second, Some(128_000));
        assert_eq!(configs[2], RecorderConfig::default());
        assert_eq!(recorder_configs(None).len(), 2);
    }

    #[test]
    fn test_negotiate_prefers_earliest_supported() {
        let element = FakeElement::playing("blob:x", Some(5.0));
        assert_eq!(negotiate_mime_type(&element), Some("video/webm;codecs=vp8,opus"));

        let mut none = FakeElement::playing("blob:x", Some(5.0));
        none.supported_types.clear();
        assert_eq!(negotiate_mime_type(&none), None);
    }

    // ==================== Capture ====================

    #[tokio::test]
    async fn test_capture_saves_concatenated_chunks() {
        let (strategy, _element, dir) = setup(Some(FakeElement::playing("blob:x", Some(20.0)).with_chunks(&[b"abc", b"def"])));
        let bus = Arc::new(EventBus::default());

        let result = strategy.acquire(&video(), &ctx(bus)).await.unwrap();
        let Acquisition::Saved(artifact) = result else {
            panic!("expected saved artifact");
        };
        assert!(artifact.filename.starts_with("Clip_captured_"));
        assert!(artifact.filename.ends_with(".webm"));
        assert_eq!(artifact.bytes, 6);
        assert_eq!(artifact.degraded, None);
        assert_eq!(std::fs::read(dir.path().join(&artifact.filename)).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_zero_chunks_reports_no_data() {
        let (strategy, _element, _dir) = setup(Some(FakeElement::playing("blob:x", Some(20.0))));
        let err = strategy
            .acquire(&video(), &ctx(Arc::new(EventBus::default())))
            .await
            .unwrap_err();
        assert_eq!(err, StrategyError::NoDataCaptured);
        assert_eq!(err.to_string(), "no data captured");
    }

    #[tokio::test]
    async fn test_falls_back_to_bitrate_config() {
        let mut element = FakeElement::playing("blob:x", Some(20.0)).with_chunks(&[b"x"]);
        element.failing_opens = 1;
        let (strategy, element, _dir) = setup(Some(element));

        strategy
            .acquire(&video(), &ctx(Arc::new(EventBus::default())))
            .await
            .unwrap();
        let opened = element.unwrap().opened.lock().unwrap().clone();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[1].video_bits_per_second, Some(2_500_000));
    }

    #[tokio::test]
    async fn test_mp4_container_gets_mp4_extension() {
        let mut element = FakeElement::playing("blob:x", Some(20.0)).with_chunks(&[b"x"]);
        element.supported_types = vec!["video/mp4"];
        let (strategy, _element, _dir) = setup(Some(element));

        let Acquisition::Saved(artifact) = strategy
            .acquire(&video(), &ctx(Arc::new(EventBus::default())))
            .await
            .unwrap()
        else {
            panic!("expected saved artifact");
        };
        assert!(artifact.filename.ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_paused_element_is_played() {
        let mut element = FakeElement::playing("blob:x", Some(20.0)).with_chunks(&[b"x"]);
        element.info.paused = true;
        let (strategy, element, _dir) = setup(Some(element));

        strategy
            .acquire(&video(), &ctx(Arc::new(EventBus::default())))
            .await
            .unwrap();
        assert!(element.unwrap().played.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_large_chunk_publishes_recording_progress() {
        let big = vec![1u8; 1_200_000];
        let (strategy, _element, _dir) = setup(Some(FakeElement::playing("blob:x", Some(20.0)).with_chunks(&[&big])));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();

        strategy.acquire(&video(), &ctx(Arc::clone(&bus))).await.unwrap();
        match rx.try_recv().unwrap() {
            Event::StreamRecordingProgress { total_bytes, url, .. } => {
                assert_eq!(total_bytes, 1_200_000);
                assert_eq!(url, "blob:https://site.example/abc");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_canceled_capture_saves_nothing() {
        let (strategy, _element, dir) = setup(Some(FakeElement::playing("blob:x", Some(20.0)).with_chunks(&[b"abc"])));
        let (handle, cancel) = cancel_pair();
        handle.cancel();
        let ctx = AcquireContext {
            cancel,
            ..ctx(Arc::new(EventBus::default()))
        };

        let err = strategy.acquire(&video(), &ctx).await.unwrap_err();
        assert_eq!(err, StrategyError::Canceled);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    // ==================== Capability gaps ====================

    #[tokio::test]
    async fn test_without_host_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let strategy = StreamCapture::new(None, Arc::new(DirectorySink::new(dir.path())), CapturePolicy::default());
        let err = strategy
            .acquire(&video(), &ctx(Arc::new(EventBus::default())))
            .await
            .unwrap_err();
        assert!(err.is_capability_gap());
    }

    #[tokio::test]
    async fn test_missing_element_is_skipped() {
        let (strategy, _element, _dir) = setup(None);
        let err = strategy
            .acquire(&video(), &ctx(Arc::new(EventBus::default())))
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_no_recorder_is_unsupported() {
        let mut element = FakeElement::playing("blob:x", Some(20.0));
        element.recorder = false;
        let (strategy, _element, _dir) = setup(Some(element));
        let err = strategy
            .acquire(&video(), &ctx(Arc::new(EventBus::default())))
            .await
            .unwrap_err();
        assert_eq!(err, StrategyError::unsupported("media recorder"));
    }
}
