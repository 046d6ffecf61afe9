//! Single-frame fallback for very short media.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::media::MediaHost;
use super::{AcquireContext, Acquisition, AcquisitionStrategy, SaveSink, SavedArtifact, StrategyError};
use crate::filename::generate_capture_filename;
use crate::record::{Degradation, DetectedVideo};

/// Media at or above this duration are never reduced to a still frame.
pub const FRAME_CAPTURE_MAX_DURATION: Duration = Duration::from_secs(10);

/// Saves the currently displayed frame as a PNG.
///
/// Only applies to media with a known duration under
/// [`FRAME_CAPTURE_MAX_DURATION`]. The result is marked
/// [`Degradation::FrameOnly`] since it is an image, not the video.
pub struct FrameCapture {
    host: Option<Arc<dyn MediaHost>>,
    sink: Arc<dyn SaveSink>,
}

impl FrameCapture {
    /// Creates the strategy.
    #[must_use]
    pub fn new(host: Option<Arc<dyn MediaHost>>, sink: Arc<dyn SaveSink>) -> Self {
        Self { host, sink }
    }
}

#[async_trait]
impl AcquisitionStrategy for FrameCapture {
    fn name(&self) -> &'static str {
        "frame_capture"
    }

    async fn acquire(&self, video: &DetectedVideo, _ctx: &AcquireContext) -> Result<Acquisition, StrategyError> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| StrategyError::unsupported("page media access"))?;
        let element = host
            .find_element(&video.url)
            .await
            .ok_or_else(|| StrategyError::skipped("no media element is playing this URL"))?;

        let info = element.info();
        let Some(duration) = info.known_duration().or(video.duration_seconds) else {
            return Err(StrategyError::skipped("media duration unknown"));
        };
        if duration >= FRAME_CAPTURE_MAX_DURATION.as_secs_f64() {
            return Err(StrategyError::skipped(format!(
                "media longer than {}s",
                FRAME_CAPTURE_MAX_DURATION.as_secs()
            )));
        }
        if !info.has_frame() {
            return Err(StrategyError::unsupported("decoded video frame"));
        }

        let png = element
            .capture_frame()
            .await
            .map_err(|reason| StrategyError::Recording { reason })?;
        if png.is_empty() {
            return Err(StrategyError::NoDataCaptured);
        }

        let filename = generate_capture_filename(&video.title, "frame", "png", Utc::now());
        let path = self.sink.save(&filename, &png).await?;
        info!(path = %path.display(), "saved single frame in place of video");

        let filename = path
            .file_name()
            .map_or(filename, |name| name.to_string_lossy().into_owned());
        Ok(Acquisition::Saved(SavedArtifact {
            path,
            filename,
            bytes: png.len() as u64,
            mime: Some("image/png".to_string()),
            degraded: Some(Degradation::FrameOnly),
        }))
    }
}
