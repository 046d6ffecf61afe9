//! Access to live media elements in the host page.
//!
//! The capture strategies do not render media themselves; they drive an
//! element owned by the page through these traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Media element readiness at which the current frame is decodable.
pub const HAVE_CURRENT_DATA: u8 = 2;

/// Point-in-time view of a media element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementInfo {
    /// Source currently playing.
    pub current_src: String,
    /// Duration in seconds; `None` for live or unknown streams.
    pub duration_seconds: Option<f64>,
    /// Ready state, `0..=4`.
    pub ready_state: u8,
    /// Intrinsic width in pixels.
    pub video_width: u32,
    /// Intrinsic height in pixels.
    pub video_height: u32,
    /// True while playback is paused.
    pub paused: bool,
}

impl ElementInfo {
    /// Returns true when a frame can be drawn from the element.
    #[must_use]
    pub fn has_frame(&self) -> bool {
        self.ready_state >= HAVE_CURRENT_DATA && self.video_width > 0 && self.video_height > 0
    }

    /// Duration if it is finite and positive.
    #[must_use]
    pub fn known_duration(&self) -> Option<f64> {
        self.duration_seconds
            .filter(|duration| duration.is_finite() && *duration > 0.0)
    }
}

/// Recorder construction options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Container/codec string; `None` lets the runtime choose.
    pub mime_type: Option<String>,
    /// Video bitrate hint.
    pub video_bits_per_second: Option<u32>,
    /// Audio bitrate hint.
    pub audio_bits_per_second: Option<u32>,
}

/// What a running recorder reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderSignal {
    /// A chunk of encoded data.
    Chunk(Vec<u8>),
    /// Playback reached its natural end.
    MediaEnded,
    /// The captured stream's track ended.
    TrackEnded,
    /// The recorder has flushed its last chunk after a stop request.
    Stopped,
    /// The recorder failed.
    Error(String),
}

/// A media recorder attached to an element's captured stream.
#[async_trait]
pub trait RecorderBackend: Send {
    /// Container type actually in use.
    fn mime_type(&self) -> String;

    /// Starts recording, asking for a chunk every `timeslice`.
    async fn start(&mut self, timeslice: Duration) -> Result<(), String>;

    /// Waits for the next signal; `None` once the recorder is gone.
    async fn next_signal(&mut self) -> Option<RecorderSignal>;

    /// Requests a stop. Remaining chunks and [`RecorderSignal::Stopped`]
    /// follow on [`Self::next_signal`].
    async fn stop(&mut self) -> Result<(), String>;
}

/// A media element in the page.
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Current element state.
    fn info(&self) -> ElementInfo;

    /// True if the element can expose its output as a live stream.
    fn supports_stream_capture(&self) -> bool;

    /// True if a recorder facility exists at all.
    fn recorder_available(&self) -> bool;

    /// True if the recorder supports `mime_type`.
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Starts playback.
    async fn play(&self) -> Result<(), String>;

    /// Creates a recorder for the element's captured stream.
    async fn open_recorder(&self, config: &RecorderConfig) -> Result<Box<dyn RecorderBackend>, String>;

    /// Encodes the currently displayed frame as PNG.
    async fn capture_frame(&self) -> Result<Vec<u8>, String>;
}

/// Finds media elements in the page.
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Returns the element currently playing `url`, if any.
    async fn find_element(&self, url: &str) -> Option<Arc<dyn MediaElement>>;
}
