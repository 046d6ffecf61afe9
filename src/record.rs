//! Download record and detected-candidate data model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a download record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Created, waiting for the download manager to confirm the start.
    Pending,
    /// Bytes are flowing.
    Downloading,
    /// Suspended by the user; can be resumed.
    Paused,
    /// Finished successfully.
    Completed,
    /// Failed; `error` carries the reason.
    Error,
    /// Stopped by the user.
    Canceled,
}

impl DownloadStatus {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }

    /// Returns true for statuses that live in the completed collection.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Canceled)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}

/// Marks a completed record whose output is not what was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// Only a still frame was captured; the file is an image.
    FrameOnly,
}

/// How a candidate video was discovered on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    /// A `<video>` element source.
    #[default]
    Html5,
    /// An embedded YouTube player.
    Youtube,
    /// An embedded Vimeo player.
    Vimeo,
    /// Observed in network traffic.
    Network,
    /// Found by pattern matching page markup.
    Detected,
}

/// A candidate video found on a page, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedVideo {
    /// Absolute resource URL.
    pub url: String,
    /// Display title; may be empty.
    #[serde(default)]
    pub title: String,
    /// Discovery channel.
    #[serde(rename = "type", default)]
    pub video_type: VideoType,
    /// Quality label such as `1080p`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// Size estimate in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_estimate: Option<u64>,
    /// Media duration in seconds, when the element reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl DetectedVideo {
    /// Creates a candidate with only a URL and discovery type.
    #[must_use]
    pub fn new(url: impl Into<String>, video_type: VideoType) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            video_type,
            quality: None,
            size_estimate: None,
            duration_seconds: None,
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}

/// Canonical state of one download or acquisition attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    /// Manager-assigned id, or a synthesized key while pending.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Original resource location (may be a `blob:` URL).
    pub source_url: String,
    /// Target filename.
    pub filename: String,
    /// Lifecycle status.
    pub status: DownloadStatus,
    /// Expected size; 0 when unknown.
    pub bytes_total: u64,
    /// Bytes received so far.
    pub bytes_downloaded: u64,
    /// Always within `[0, 100]`.
    pub progress_percent: f64,
    /// Speed derived from the last two samples.
    pub speed_bytes_per_sec: u64,
    /// Remaining time estimate; 0 when unknown.
    pub eta_millis: u64,
    /// True when the manager can suspend this download.
    pub pausable: bool,
    /// When the attempt was initiated.
    pub started_at: DateTime<Utc>,
    /// When the record reached a terminal status.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Human-readable failure reason.
    #[serde(default)]
    pub error: Option<String>,
    /// Set when the output is a degraded substitute.
    #[serde(default)]
    pub degraded: Option<Degradation>,
    /// Media duration, used to estimate capture progress when size is unknown.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Timestamp of the last applied progress sample.
    #[serde(default)]
    pub last_sample_at: Option<DateTime<Utc>>,
}

impl DownloadRecord {
    /// Creates a `pending` record with zeroed progress.
    #[must_use]
    pub fn pending(
        id: impl Into<String>,
        title: impl Into<String>,
        source_url: impl Into<String>,
        filename: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source_url: source_url.into(),
            filename: filename.into(),
            status: DownloadStatus::Pending,
            bytes_total: 0,
            bytes_downloaded: 0,
            progress_percent: 0.0,
            speed_bytes_per_sec: 0,
            eta_millis: 0,
            pausable: false,
            started_at,
            ended_at: None,
            error: None,
            degraded: None,
            duration_seconds: None,
            last_sample_at: None,
        }
    }

    /// Recomputes `progress_percent` from the byte counters.
    ///
    /// Leaves the current value alone when the total is unknown, so capture
    /// estimates are not reset to zero.
    pub fn refresh_percent(&mut self) {
        if self.bytes_total > 0 {
            self.progress_percent = percent_of(self.bytes_downloaded, self.bytes_total);
        }
    }
}

/// Returns `downloaded / total * 100`, clamped to `[0, 100]`; 0 when total is 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percent_of(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent(downloaded as f64 / total as f64 * 100.0)
}

/// Estimates capture progress from elapsed recording time.
///
/// `duration_secs` of `None` or a non-positive value yields 0.
#[must_use]
pub fn percent_from_elapsed(elapsed_secs: f64, duration_secs: Option<f64>) -> f64 {
    match duration_secs {
        Some(duration) if duration > 0.0 => clamp_percent(elapsed_secs / duration * 100.0),
        _ => 0.0,
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
