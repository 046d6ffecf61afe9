//! Lifecycle events carried by the broadcast bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{DetectedVideo, DownloadRecord, DownloadStatus};

/// Progress view of one download, shared by push events and the poll endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Download id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Target filename.
    pub filename: String,
    /// Percent complete in `[0, 100]`.
    pub progress: f64,
    /// Bytes received.
    pub downloaded: u64,
    /// Expected bytes; 0 when unknown.
    pub total: u64,
    /// Bytes per second.
    pub speed: u64,
    /// Remaining milliseconds; 0 when unknown.
    pub time_remaining: u64,
    /// Lifecycle status.
    pub status: DownloadStatus,
}

impl From<&DownloadRecord> for ProgressSnapshot {
    fn from(record: &DownloadRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            filename: record.filename.clone(),
            progress: record.progress_percent,
            downloaded: record.bytes_downloaded,
            total: record.bytes_total,
            speed: record.speed_bytes_per_sec,
            time_remaining: record.eta_millis,
            status: record.status,
        }
    }
}

/// Event published on the broadcast bus.
///
/// Serialized as `{"action": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    /// The download manager confirmed a download start.
    DownloadStarted {
        id: String,
        title: String,
        filename: String,
        url: String,
        total: u64,
        pausable: bool,
        start_time: DateTime<Utc>,
    },
    /// Progress tick for an active download.
    DownloadUpdate(ProgressSnapshot),
    /// A record finished successfully.
    DownloadCompleted {
        id: String,
        /// True when the saved file is a degraded substitute.
        degraded: bool,
    },
    /// A record failed; `source_url` drives the manual copy-URL fallback.
    DownloadError {
        id: String,
        error: String,
        source_url: String,
    },
    /// Capture progress from the stream recorder, independent of record ticks.
    StreamRecordingProgress {
        elapsed_secs: f64,
        total_bytes: u64,
        chunk_size: u64,
        url: String,
    },
    /// The candidate list for a tab changed.
    VideosUpdated {
        tab_id: u32,
        videos: Vec<DetectedVideo>,
    },
}

impl Event {
    /// Returns the wire action name.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::DownloadStarted { .. } => "downloadStarted",
            Self::DownloadUpdate(_) => "downloadUpdate",
            Self::DownloadCompleted { .. } => "downloadCompleted",
            Self::DownloadError { .. } => "downloadError",
            Self::StreamRecordingProgress { .. } => "streamRecordingProgress",
            Self::VideosUpdated { .. } => "videosUpdated",
        }
    }

    /// Returns the download id for lifecycle events.
    #[must_use]
    pub fn download_id(&self) -> Option<&str> {
        match self {
            Self::DownloadStarted { id, .. }
            | Self::DownloadCompleted { id, .. }
            | Self::DownloadError { id, .. } => Some(id),
            Self::DownloadUpdate(snapshot) => Some(&snapshot.id),
            Self::StreamRecordingProgress { .. } | Self::VideosUpdated { .. } => None,
        }
    }
}
