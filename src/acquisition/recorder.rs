//! Stream recorder state machine.
//!
//! ```text
//! Idle --start()--> Recording --next_event() stop condition--> Stopping --stop()--> Stopped
//! ```
//!
//! A fired [`CancelSignal`] is a stop condition too, but `stop()` then
//! discards the chunks and returns [`StrategyError::Canceled`].
//!
//! The [`Recorder`] is the single owner of the capture counters. Each
//! transition is an `async` method the caller awaits; progress ticks are
//! returned from [`Recorder::next_event`] instead of being pushed through
//! callbacks.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::media::{RecorderBackend, RecorderSignal};
use super::{CancelSignal, StrategyError};

/// Upper bound on any capture.
pub const DEFAULT_MAX_CAPTURE: Duration = Duration::from_secs(600);

/// Duration assumed when the element does not report one.
pub const DEFAULT_UNKNOWN_DURATION_SECS: f64 = 300.0;

/// Minimum spacing between progress ticks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Chunks larger than this are reported immediately.
pub const DEFAULT_LARGE_CHUNK_BYTES: u64 = 1_000_000;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Recorder lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Created, not started.
    Idle,
    /// Receiving chunks.
    Recording,
    /// A stop condition fired; waiting for [`Recorder::stop`].
    Stopping,
    /// Finished; output has been assembled.
    Stopped,
}

/// Why recording ended. The first condition to fire wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Playback reached its natural end.
    MediaEnded,
    /// Elapsed time reached the capture limit.
    CapReached,
    /// The captured stream's track ended.
    TrackEnded,
    /// The recorder stopped on its own.
    RecorderClosed,
    /// The user canceled the capture.
    Canceled,
}

/// Throttled progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProgress {
    /// Time since recording started.
    pub elapsed: Duration,
    /// Bytes captured so far.
    pub total_bytes: u64,
    /// Size of the chunk that triggered the report.
    pub chunk_size: u64,
}

/// Result of one [`Recorder::next_event`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderEvent {
    /// Recording continues.
    Progress(CaptureProgress),
    /// A stop condition fired; call [`Recorder::stop`].
    Finished(StopReason),
}

/// Assembled capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutput {
    /// All chunks concatenated.
    pub data: Vec<u8>,
    /// Number of non-empty chunks received.
    pub chunk_count: usize,
    /// Recording time.
    pub elapsed: Duration,
    /// Stop condition.
    pub stop_reason: StopReason,
    /// Container type.
    pub mime_type: String,
}

/// Capture limits and progress throttling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturePolicy {
    /// Hard cap on recording time.
    pub max_capture: Duration,
    /// Duration assumed when unknown, in seconds.
    pub unknown_duration_secs: f64,
    /// Minimum spacing between progress ticks.
    pub progress_interval: Duration,
    /// Chunk size that forces an immediate tick.
    pub large_chunk_bytes: u64,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            max_capture: DEFAULT_MAX_CAPTURE,
            unknown_duration_secs: DEFAULT_UNKNOWN_DURATION_SECS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            large_chunk_bytes: DEFAULT_LARGE_CHUNK_BYTES,
        }
    }
}

impl CapturePolicy {
    /// Recording time limit: `min(duration, max_capture)`.
    #[must_use]
    pub fn capture_limit(&self, duration_secs: Option<f64>) -> Duration {
        let duration = duration_secs.unwrap_or(self.unknown_duration_secs);
        Duration::try_from_secs_f64(duration)
            .map_or(self.max_capture, |duration| duration.min(self.max_capture))
    }

    /// Chunk interval for media of the given duration.
    #[must_use]
    pub fn timeslice(&self, duration_secs: Option<f64>) -> Duration {
        chunk_interval(duration_secs.unwrap_or(self.unknown_duration_secs))
    }
}

/// Chunk request interval: 1s for media over a minute, 2s over 30s, else 3s.
///
/// Long media get frequent small chunks to bound memory; short media get
/// fewer callbacks.
#[must_use]
pub fn chunk_interval(duration_secs: f64) -> Duration {
    if duration_secs > 60.0 {
        Duration::from_millis(1000)
    } else if duration_secs > 30.0 {
        Duration::from_millis(2000)
    } else {
        Duration::from_millis(3000)
    }
}

/// Drives one [`RecorderBackend`] through a capture.
pub struct Recorder {
    backend: Box<dyn RecorderBackend>,
    state: RecorderState,
    policy: CapturePolicy,
    limit: Duration,
    timeslice: Duration,
    chunks: Vec<Vec<u8>>,
    total_bytes: u64,
    started_at: Option<Instant>,
    last_progress: Option<Instant>,
    stop_reason: Option<StopReason>,
    cancel: CancelSignal,
}

impl Recorder {
    /// Creates an idle recorder for media of `duration_secs`.
    #[must_use]
    pub fn new(backend: Box<dyn RecorderBackend>, policy: CapturePolicy, duration_secs: Option<f64>) -> Self {
        Self {
            backend,
            state: RecorderState::Idle,
            policy,
            limit: policy.capture_limit(duration_secs),
            timeslice: policy.timeslice(duration_secs),
            chunks: Vec::new(),
            total_bytes: 0,
            started_at: None,
            last_progress: None,
            stop_reason: None,
            cancel: CancelSignal::never(),
        }
    }

    /// Stops recording when `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Recording time limit in effect.
    #[must_use]
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Chunk interval in effect.
    #[must_use]
    pub fn timeslice(&self) -> Duration {
        self.timeslice
    }

    /// Bytes captured so far.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// `Idle -> Recording`.
    ///
    /// # Errors
    ///
    /// [`StrategyError::Recording`] if not idle or the backend fails to start.
    pub async fn start(&mut self) -> Result<(), StrategyError> {
        if self.state != RecorderState::Idle {
            return Err(recording_error(format!("cannot start from {:?}", self.state)));
        }
        self.backend.start(self.timeslice).await.map_err(recording_error)?;
        let now = Instant::now();
        self.started_at = Some(now);
        self.last_progress = Some(now);
        self.state = RecorderState::Recording;
        debug!(
            limit_secs = self.limit.as_secs(),
            timeslice_ms = self.timeslice.as_millis(),
            mime = %self.backend.mime_type(),
            "recording started"
        );
        Ok(())
    }

    /// Waits for the next progress tick or stop condition.
    ///
    /// Moves to `Stopping` when a stop condition fires. Page visibility is
    /// not a stop condition.
    ///
    /// # Errors
    ///
    /// [`StrategyError::Recording`] if called outside `Recording` or if the
    /// backend reports an error.
    pub async fn next_event(&mut self) -> Result<RecorderEvent, StrategyError> {
        if self.state != RecorderState::Recording {
            return Err(recording_error(format!("no events in {:?}", self.state)));
        }
        let started_at = self.started_at.unwrap_or_else(Instant::now);
        let deadline = started_at + self.limit;

        loop {
            let signal = tokio::select! {
                biased;
                () = self.cancel.canceled() => {
                    return Ok(self.begin_stop(StopReason::Canceled));
                }
                () = tokio::time::sleep_until(deadline) => {
                    return Ok(self.begin_stop(StopReason::CapReached));
                }
                signal = self.backend.next_signal() => signal,
            };

            match signal {
                Some(RecorderSignal::Chunk(data)) => {
                    if data.is_empty() {
                        continue;
                    }
                    let chunk_size = data.len() as u64;
                    self.total_bytes += chunk_size;
                    self.chunks.push(data);
                    trace!(chunk_size, total_bytes = self.total_bytes, "chunk captured");

                    if self.progress_due(chunk_size) {
                        self.last_progress = Some(Instant::now());
                        return Ok(RecorderEvent::Progress(CaptureProgress {
                            elapsed: started_at.elapsed(),
                            total_bytes: self.total_bytes,
                            chunk_size,
                        }));
                    }
                }
                Some(RecorderSignal::MediaEnded) => return Ok(self.begin_stop(StopReason::MediaEnded)),
                Some(RecorderSignal::TrackEnded) => return Ok(self.begin_stop(StopReason::TrackEnded)),
                Some(RecorderSignal::Stopped) | None => {
                    return Ok(self.begin_stop(StopReason::RecorderClosed));
                }
                Some(RecorderSignal::Error(reason)) => {
                    self.state = RecorderState::Stopped;
                    return Err(recording_error(reason));
                }
            }
        }
    }

    fn progress_due(&self, chunk_size: u64) -> bool {
        chunk_size > self.policy.large_chunk_bytes
            || self
                .last_progress
                .is_none_or(|at| at.elapsed() >= self.policy.progress_interval)
    }

    fn begin_stop(&mut self, reason: StopReason) -> RecorderEvent {
        debug!(?reason, total_bytes = self.total_bytes, "stop condition reached");
        self.stop_reason = Some(reason);
        self.state = RecorderState::Stopping;
        RecorderEvent::Finished(reason)
    }

    /// `Recording|Stopping -> Stopped`: flushes the backend and assembles
    /// the output.
    ///
    /// # Errors
    ///
    /// [`StrategyError::NoDataCaptured`] if no chunk arrived, or
    /// [`StrategyError::Recording`] if the backend fails while stopping.
    pub async fn stop(mut self) -> Result<CaptureOutput, StrategyError> {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Stopping) {
            return Err(recording_error(format!("cannot stop from {:?}", self.state)));
        }
        let reason = self.stop_reason.unwrap_or(StopReason::RecorderClosed);
        self.state = RecorderState::Stopping;

        if reason == StopReason::Canceled {
            if let Err(e) = self.backend.stop().await {
                debug!(error = %e, "recorder stop failed after cancel");
            }
            self.state = RecorderState::Stopped;
            debug!(discarded_bytes = self.total_bytes, "capture canceled");
            return Err(StrategyError::Canceled);
        }

        if reason != StopReason::RecorderClosed {
            self.backend.stop().await.map_err(recording_error)?;
            self.drain().await?;
        }
        self.state = RecorderState::Stopped;

        if self.chunks.is_empty() {
            return Err(StrategyError::NoDataCaptured);
        }
        let elapsed = self.started_at.map_or(Duration::ZERO, |at| at.elapsed());
        let chunk_count = self.chunks.len();
        Ok(CaptureOutput {
            data: self.chunks.concat(),
            chunk_count,
            elapsed,
            stop_reason: reason,
            mime_type: self.backend.mime_type(),
        })
    }

    async fn drain(&mut self) -> Result<(), StrategyError> {
        let flush = async {
            while let Some(signal) = self.backend.next_signal().await {
                match signal {
                    RecorderSignal::Chunk(data) if !data.is_empty() => {
                        self.total_bytes += data.len() as u64;
                        self.chunks.push(data);
                    }
                    RecorderSignal::Stopped => break,
                    RecorderSignal::Error(reason) => return Err(recording_error(reason)),
                    _ => {}
                }
            }
            Ok(())
        };
        match tokio::time::timeout(STOP_GRACE, flush).await {
            Ok(result) => result,
            Err(_) => {
                debug!("recorder did not confirm stop; using chunks received so far");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("state", &self.state)
            .field("chunks", &self.chunks.len())
            .field("total_bytes", &self.total_bytes)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

fn recording_error(reason: impl Into<String>) -> StrategyError {
    StrategyError::Recording {
        reason: reason.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;

    /// Backend replaying a scripted list of `(delay, signal)` pairs. After the
    /// script runs out it stays silent until stopped.
    struct ScriptedBackend {
        script: VecDeque<(Duration, RecorderSignal)>,
        stopped: bool,
        tail: Vec<RecorderSignal>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<(u64, RecorderSignal)>) -> Self {
            Self {
                script: script
                    .into_iter()
                    .map(|(ms, signal)| (Duration::from_millis(ms), signal))
                    .collect(),
                stopped: false,
                tail: Vec::new(),
            }
        }

        fn with_tail(mut self, tail: Vec<RecorderSignal>) -> Self {
            self.tail = tail;
            self
        }
    }

    #[async_trait]
    impl RecorderBackend for ScriptedBackend {
        fn mime_type(&self) -> String {
            "video/webm;codecs=vp9,opus".to_string()
        }

        async fn start(&mut self, _timeslice: Duration) -> Result<(), String> {
            Ok(())
        }

        async fn next_signal(&mut self) -> Option<RecorderSignal> {
            if self.stopped {
                if self.tail.is_empty() {
                    return Some(RecorderSignal::Stopped);
                }
                return Some(self.tail.remove(0));
            }
            match self.script.pop_front() {
                Some((delay, signal)) => {
                    tokio::time::sleep(delay).await;
                    Some(signal)
                }
                None => std::future::pending().await,
            }
        }

        async fn stop(&mut self) -> Result<(), String> {
            self.stopped = true;
            Ok(())
        }
    }

    fn chunk(size: usize) -> RecorderSignal {
        RecorderSignal::Chunk(vec![7; size])
    }

    // ==================== Policy ====================

    #[test]
    fn test_chunk_interval_tiers() {
        assert_eq!(chunk_interval(120.0), Duration::from_secs(1));
        assert_eq!(chunk_interval(45.0), Duration::from_secs(2));
        assert_eq!(chunk_interval(30.0), Duration::from_secs(3));
        assert_eq!(chunk_interval(5.0), Duration::from_secs(3));
    }

    #[test]
    fn test_capture_limit() {
        let policy = CapturePolicy::default();
        assert_eq!(policy.capture_limit(Some(42.0)), Duration::from_secs(42));
        assert_eq!(policy.capture_limit(Some(3600.0)), Duration::from_secs(600));
        assert_eq!(policy.capture_limit(None), Duration::from_secs(300));
        assert_eq!(policy.timeslice(None), Duration::from_secs(1));
    }

    // ==================== State machine ====================

    #[tokio::test(start_paused = true)]
    async fn test_media_end_stops_and_concatenates() {
        let backend = ScriptedBackend::new(vec![
            (500, chunk(10)),
            (500, chunk(20)),
            (100, RecorderSignal::MediaEnded),
        ])
        .with_tail(vec![chunk(5)]);
        let mut recorder = Recorder::new(Box::new(backend), CapturePolicy::default(), Some(20.0));
        assert_eq!(recorder.state(), RecorderState::Idle);

        recorder.start().await.unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);

        let event = recorder.next_event().await.unwrap();
        assert_eq!(event, RecorderEvent::Finished(StopReason::MediaEnded));
        assert_eq!(recorder.state(), RecorderState::Stopping);

        let output = recorder.stop().await.unwrap();
        assert_eq!(output.data.len(), 35);
        assert_eq!(output.chunk_count, 3);
        assert_eq!(output.stop_reason, StopReason::MediaEnded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_reached_for_silent_stream() {
        let backend = ScriptedBackend::new(vec![(100, chunk(4))]);
        let policy = CapturePolicy {
            max_capture: Duration::from_secs(5),
            ..CapturePolicy::default()
        };
        let mut recorder = Recorder::new(Box::new(backend), policy, Some(3600.0));
        recorder.start().await.unwrap();

        let event = recorder.next_event().await.unwrap();
        assert_eq!(event, RecorderEvent::Finished(StopReason::CapReached));
        let output = recorder.stop().await.unwrap();
        assert_eq!(output.data, vec![7; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_throttled() {
        let backend = ScriptedBackend::new(vec![
            (1000, chunk(100)),
            (1000, chunk(100)),
            (1000, chunk(100)),
            (100, RecorderSignal::TrackEnded),
        ]);
        let mut recorder = Recorder::new(Box::new(backend), CapturePolicy::default(), Some(120.0));
        recorder.start().await.unwrap();

        match recorder.next_event().await.unwrap() {
            RecorderEvent::Progress(progress) => {
                assert_eq!(progress.total_bytes, 200);
                assert_eq!(progress.chunk_size, 100);
            }
            other => panic!("expected progress, got {other:?}"),
        }
        assert_eq!(
            recorder.next_event().await.unwrap(),
            RecorderEvent::Finished(StopReason::TrackEnded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_chunk_reports_immediately() {
        let backend = ScriptedBackend::new(vec![(100, chunk(1_500_000))]);
        let mut recorder = Recorder::new(Box::new(backend), CapturePolicy::default(), Some(120.0));
        recorder.start().await.unwrap();

        let event = recorder.next_event().await.unwrap();
        assert!(matches!(
            event,
            RecorderEvent::Progress(CaptureProgress { chunk_size: 1_500_000, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_chunks_is_no_data_captured() {
        let backend = ScriptedBackend::new(vec![(100, RecorderSignal::MediaEnded)]);
        let mut recorder = Recorder::new(Box::new(backend), CapturePolicy::default(), Some(10.0));
        recorder.start().await.unwrap();
        recorder.next_event().await.unwrap();
        let err = recorder.stop().await.unwrap_err();
        assert_eq!(err, StrategyError::NoDataCaptured);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let backend = ScriptedBackend::new(vec![]);
        let mut recorder = Recorder::new(Box::new(backend), CapturePolicy::default(), None);
        recorder.start().await.unwrap();
        assert!(recorder.start().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_recording_and_discards() {
        let backend = ScriptedBackend::new(vec![(500, chunk(10)), (500, chunk(10))]);
        let (handle, signal) = super::super::cancel_pair();
        let mut recorder =
            Recorder::new(Box::new(backend), CapturePolicy::default(), Some(600.0)).with_cancel(signal);
        recorder.start().await.unwrap();

        let canceler = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            handle.cancel();
        });
        let started = Instant::now();
        let event = recorder.next_event().await.unwrap();
        canceler.await.unwrap();

        assert_eq!(event, RecorderEvent::Finished(StopReason::Canceled));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(recorder.total_bytes(), 20);
        assert_eq!(recorder.stop().await.unwrap_err(), StrategyError::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_error_fails_recording() {
        let backend = ScriptedBackend::new(vec![(10, RecorderSignal::Error("encoder crashed".to_string()))]);
        let mut recorder = Recorder::new(Box::new(backend), CapturePolicy::default(), Some(10.0));
        recorder.start().await.unwrap();
        let err = recorder.next_event().await.unwrap_err();
        assert!(err.to_string().contains("encoder crashed"));
        assert_eq!(recorder.state(), RecorderState::Stopped);
    }
}
