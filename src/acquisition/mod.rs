//! Acquisition strategy chain for protected video resources.
//!
//! Resources that cannot be handed to the download manager (blob-backed,
//! platform-embedded, manifest-based) are acquired by trying an ordered list
//! of strategies until one succeeds:
//!
//! 1. [`DirectRefetch`] - HTTP GET with the session's cookies
//! 2. [`StreamCapture`] - record a live media element in real time
//! 3. [`FrameCapture`] - save a single still frame of very short media
//! 4. [`BackgroundDelegate`] - hand the URL to the download manager
//!
//! Strategy failures are recovered locally and collected into a trail; only
//! when every strategy fails does the chain report
//! [`AcquireError::AllStrategiesExhausted`]. A fired [`CancelSignal`] ends
//! the run with [`AcquireError::Canceled`] instead.

mod cancel;
mod chain;
mod delegate;
mod error;
mod frame;
pub mod media;
mod recorder;
mod refetch;
mod sink;
mod stream;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use chain::{AcquisitionChain, DEFAULT_ACQUISITION_BUDGET};
pub use delegate::BackgroundDelegate;
pub use error::{AcquireError, StrategyError, StrategyFailure};
pub use frame::{FRAME_CAPTURE_MAX_DURATION, FrameCapture};
pub use recorder::{
    CaptureOutput, CapturePolicy, CaptureProgress, Recorder, RecorderEvent, RecorderState, StopReason, chunk_interval,
};
pub use refetch::DirectRefetch;
pub use sink::{DirectorySink, PartialArtifact, SaveSink};
pub use stream::{MIME_PREFERENCES, StreamCapture, negotiate_mime_type, recorder_configs};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::bus::Broadcaster;
use crate::record::{Degradation, DetectedVideo};

use self::media::MediaHost;

/// A file written by an in-process strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    /// Where the bytes were written.
    pub path: PathBuf,
    /// Final filename.
    pub filename: String,
    /// Size in bytes.
    pub bytes: u64,
    /// MIME type of the saved content, when known.
    pub mime: Option<String>,
    /// Set when the artifact is not the requested video.
    pub degraded: Option<Degradation>,
}

/// Successful result of a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Bytes were obtained and saved.
    Saved(SavedArtifact),
    /// A download manager took over under this id.
    Delegated {
        /// Manager-assigned download id.
        download_id: String,
    },
}

/// Receives capture progress for the record being acquired.
#[async_trait]
pub trait CaptureObserver: Send + Sync {
    /// Called on every throttled progress tick.
    async fn on_progress(&self, progress: &CaptureProgress);
}

/// Hands a tracked record to the background download manager.
#[async_trait]
pub trait DelegateDownload: Send + Sync {
    /// Starts a manager download for `record_id` and returns the manager id,
    /// or a user-facing reason.
    async fn delegate(&self, record_id: &str) -> Result<String, String>;
}

/// Per-run context shared by all strategies.
#[derive(Clone)]
pub struct AcquireContext {
    /// Tracker record this acquisition belongs to.
    pub record_id: String,
    /// Bus for side-channel capture progress.
    pub bus: Arc<dyn Broadcaster>,
    /// Optional progress observer, usually the tracker.
    pub observer: Option<Arc<dyn CaptureObserver>>,
    /// Fires when the user cancels the record.
    pub cancel: CancelSignal,
}

impl std::fmt::Debug for AcquireContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquireContext")
            .field("record_id", &self.record_id)
            .field("observer", &self.observer.is_some())
            .field("canceled", &self.cancel.is_canceled())
            .finish_non_exhaustive()
    }
}

/// Trait that all acquisition strategies implement.
///
/// Uses `async_trait` so strategies can be stored as `Box<dyn AcquisitionStrategy>`.
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    /// Short stable name used in logs and failure trails.
    fn name(&self) -> &str;

    /// Attempts to obtain the video.
    async fn acquire(&self, video: &DetectedVideo, ctx: &AcquireContext) -> Result<Acquisition, StrategyError>;
}

/// Builds the standard four-strategy chain.
///
/// `host` is the page media access; `None` when running outside a page, in
/// which case the capture strategies report an unsupported capability and
/// the chain falls through to delegation.
#[must_use]
pub fn build_default_chain(
    client: Client,
    sink: Arc<dyn SaveSink>,
    host: Option<Arc<dyn MediaHost>>,
    delegate: Arc<dyn DelegateDownload>,
    policy: CapturePolicy,
    budget: Duration,
) -> AcquisitionChain {
    let mut chain = AcquisitionChain::new(budget);
    chain.register(Box::new(DirectRefetch::new(client, Arc::clone(&sink))));
    chain.register(Box::new(StreamCapture::new(host.clone(), Arc::clone(&sink), policy)));
    chain.register(Box::new(FrameCapture::new(host, sink)));
    chain.register(Box::new(BackgroundDelegate::new(delegate)));
    chain
}
