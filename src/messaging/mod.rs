//! Request/response protocol between UI surfaces and the background service.
//!
//! Requests are a closed tagged union (`{"action": "pauseDownload",
//! "downloadId": "7"}`) dispatched with an exhaustive match in
//! [`BackgroundService::handle`]. Unknown actions fail to deserialize
//! instead of being silently ignored.

mod service;

pub use service::BackgroundService;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bus::ProgressSnapshot;
use crate::classifier::UrlAnalysis;
use crate::record::DetectedVideo;

/// A request sent to the background service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    /// Liveness probe.
    Ping,
    /// Network-observed candidates of a tab.
    GetDetectedVideos { tab_id: u32 },
    /// Download or acquire a candidate.
    DownloadVideo { video: DetectedVideo },
    /// Describe a URL without downloading it.
    AnalyzeVideo { url: String },
    /// Progress of every active download, for polling.
    GetDownloadProgress,
    /// Pause a download.
    PauseDownload { download_id: String },
    /// Resume a paused download.
    ResumeDownload { download_id: String },
    /// Cancel a download.
    CancelDownload { download_id: String },
    /// Delete one finished download from the history.
    RemoveDownload { download_id: String },
    /// Delete every finished download.
    ClearCompleted,
    /// Cancel everything and clear both lists.
    ClearAll,
    /// Scan a tab for videos.
    TriggerVideoScan { tab_id: u32 },
    /// The page reported how many videos it found on its own.
    VideosDetected { tab_id: u32, count: usize },
    /// A tab started loading a new page.
    TabLoading { tab_id: u32 },
    /// A tab was closed.
    TabRemoved { tab_id: u32 },
    /// A network request was observed in a tab.
    NetworkRequest { tab_id: u32, url: String },
}

impl Request {
    /// Returns the wire action name.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::GetDetectedVideos { .. } => "getDetectedVideos",
            Self::DownloadVideo { .. } => "downloadVideo",
            Self::AnalyzeVideo { .. } => "analyzeVideo",
            Self::GetDownloadProgress => "getDownloadProgress",
            Self::PauseDownload { .. } => "pauseDownload",
            Self::ResumeDownload { .. } => "resumeDownload",
            Self::CancelDownload { .. } => "cancelDownload",
            Self::RemoveDownload { .. } => "removeDownload",
            Self::ClearCompleted => "clearCompleted",
            Self::ClearAll => "clearAll",
            Self::TriggerVideoScan { .. } => "triggerVideoScan",
            Self::VideosDetected { .. } => "videosDetected",
            Self::TabLoading { .. } => "tabLoading",
            Self::TabRemoved { .. } => "tabRemoved",
            Self::NetworkRequest { .. } => "networkRequest",
        }
    }
}

/// Result of `downloadVideo`.
///
/// On failure `error` and `source_url` are both set, which is enough for
/// the UI to offer copying the URL by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    /// True if a download was started or an artifact was saved.
    pub success: bool,
    /// Record id to follow in progress events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_id: Option<String>,
    /// Saved filename, for in-process acquisitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// True when only a still frame could be saved.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    /// Human-readable failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Original URL, set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl DownloadResponse {
    /// A successful start or save.
    #[must_use]
    pub fn started(download_id: impl Into<String>) -> Self {
        Self {
            success: true,
            download_id: Some(download_id.into()),
            filename: None,
            degraded: false,
            error: None,
            source_url: None,
        }
    }

    /// A failure carrying the reason and the original URL.
    #[must_use]
    pub fn failed(error: impl Into<String>, source_url: impl Into<String>, download_id: Option<String>) -> Self {
        Self {
            success: false,
            download_id,
            filename: None,
            degraded: false,
            error: Some(error.into()),
            source_url: Some(source_url.into()),
        }
    }
}

/// Answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// Plain acknowledgement.
    Ack {
        /// Whether the request succeeded.
        success: bool,
        /// Human-readable failure reason.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Candidate list.
    Videos {
        /// Candidates.
        videos: Vec<DetectedVideo>,
    },
    /// Outcome of `downloadVideo`.
    Download(DownloadResponse),
    /// Outcome of `analyzeVideo`.
    Analysis {
        /// URL description.
        analysis: UrlAnalysis,
    },
    /// Active progress keyed by download id.
    Progress {
        /// Snapshots by id.
        downloads: BTreeMap<String, ProgressSnapshot>,
    },
    /// Outcome of a clear.
    Cleared {
        /// Always true.
        success: bool,
        /// Records removed.
        removed: usize,
    },
}

impl Response {
    /// Successful acknowledgement.
    #[must_use]
    pub fn ok() -> Self {
        Self::Ack {
            success: true,
            error: None,
        }
    }

    /// Failed acknowledgement with a reason.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Ack {
            success: false,
            error: Some(error.into()),
        }
    }

    /// Returns false for failed acknowledgements and downloads.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Ack { success, .. } | Self::Cleared { success, .. } => *success,
            Self::Download(download) => download.success,
            Self::Videos { .. } | Self::Analysis { .. } | Self::Progress { .. } => true,
        }
    }
}
