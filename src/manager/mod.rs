//! Download manager boundary.
//!
//! The tracker never talks to a download backend directly; it goes through
//! [`DownloadManager`]. Everything crossing this boundary has a strict
//! schema: raw JSON items from an external manager are validated with
//! [`DownloadItem::from_value`], and items returned by `query` are checked
//! with [`DownloadItem::validate`] before the tracker trusts them.

mod local;

pub use local::LocalDownloadManager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Interrupt reason codes reported by managers.
pub mod interrupt {
    /// The user canceled the download.
    pub const USER_CANCELED: &str = "USER_CANCELED";
    /// Connection failed or was reset.
    pub const NETWORK_FAILED: &str = "NETWORK_FAILED";
    /// The server refused access (401/403).
    pub const SERVER_FORBIDDEN: &str = "SERVER_FORBIDDEN";
    /// The server has no such content (404/410).
    pub const SERVER_BAD_CONTENT: &str = "SERVER_BAD_CONTENT";
    /// Any other non-success response.
    pub const SERVER_FAILED: &str = "SERVER_FAILED";
    /// Writing the file failed.
    pub const FILE_FAILED: &str = "FILE_FAILED";
}

/// State of a download as reported by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Transferring or paused.
    InProgress,
    /// Stopped by an error or by the user; `error` carries the code.
    Interrupted,
    /// Finished.
    Complete,
}

/// What to do when the target filename already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictAction {
    /// Pick a fresh name (`clip_1.mp4`).
    #[default]
    Uniquify,
    /// Replace the existing file.
    Overwrite,
}

/// Parameters for [`DownloadManager::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// Resource URL.
    pub url: String,
    /// Suggested filename.
    pub filename: String,
    /// Ask the user where to save, when the backend supports it.
    pub save_as: bool,
    /// Collision policy.
    pub conflict: ConflictAction,
}

impl StartRequest {
    /// Creates a request with uniquified filenames and no save-as prompt.
    #[must_use]
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            save_as: false,
            conflict: ConflictAction::Uniquify,
        }
    }
}

/// Snapshot of one download held by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DownloadItem {
    /// Manager-assigned id.
    pub id: String,
    /// Resource URL.
    pub url: String,
    /// Final filename.
    pub filename: String,
    /// Transfer state.
    pub state: ItemState,
    /// Bytes received so far.
    pub bytes_received: u64,
    /// Expected size; 0 when unknown.
    pub total_bytes: u64,
    /// True when the manager can pause and resume this download.
    pub can_resume: bool,
    /// True while paused.
    pub paused: bool,
    /// Interrupt reason code.
    #[serde(default)]
    pub error: Option<String>,
}

impl DownloadItem {
    /// Parses and validates an item received as raw JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidResponse`] when fields are missing,
    /// mistyped, or inconsistent.
    pub fn from_value(value: Value) -> Result<Self, ManagerError> {
        let item: Self = serde_json::from_value(value)
            .map_err(|e| ManagerError::invalid(format!("malformed download item: {e}")))?;
        if item.id.is_empty() {
            return Err(ManagerError::invalid("download item has an empty id"));
        }
        item.check_consistency()?;
        Ok(item)
    }

    /// Checks that this item answers a query for `expected_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidResponse`] on an id mismatch or an
    /// inconsistent state.
    pub fn validate(&self, expected_id: &str) -> Result<(), ManagerError> {
        if self.id != expected_id {
            return Err(ManagerError::invalid(format!(
                "queried download {expected_id} but manager answered for {}",
                self.id
            )));
        }
        self.check_consistency()
    }

    fn check_consistency(&self) -> Result<(), ManagerError> {
        if self.state == ItemState::Interrupted && self.error.is_none() {
            return Err(ManagerError::invalid(format!(
                "download {} is interrupted without a reason",
                self.id
            )));
        }
        if self.paused && self.state != ItemState::InProgress {
            return Err(ManagerError::invalid(format!(
                "download {} is paused but not in progress",
                self.id
            )));
        }
        Ok(())
    }
}

/// Partial update for one download. `None` fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDelta {
    /// Download id.
    pub id: String,
    /// New state.
    #[serde(default)]
    pub state: Option<ItemState>,
    /// New byte count.
    #[serde(default)]
    pub bytes_received: Option<u64>,
    /// New expected size.
    #[serde(default)]
    pub total_bytes: Option<u64>,
    /// New paused flag.
    #[serde(default)]
    pub paused: Option<bool>,
    /// Interrupt reason code.
    #[serde(default)]
    pub error: Option<String>,
}

impl DownloadDelta {
    /// Returns an empty delta for `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Change notifications emitted by a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// A download was created.
    Created(DownloadItem),
    /// A download changed.
    Changed(DownloadDelta),
}

/// Errors returned by a [`DownloadManager`].
///
/// Reasons are opaque strings from the backend; callers treat any of these
/// as a generic failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManagerError {
    /// The manager refused the operation.
    #[error("{operation} rejected for download {id}: {reason}")]
    Rejected {
        /// Operation name (`start`, `pause`, ...).
        operation: &'static str,
        /// Target id, or the URL for `start`.
        id: String,
        /// Backend reason.
        reason: String,
    },

    /// No download with this id exists.
    #[error("download {id} not found")]
    NotFound {
        /// Requested id.
        id: String,
    },

    /// The manager answered with data that fails validation.
    #[error("invalid download manager response: {reason}")]
    InvalidResponse {
        /// What was wrong.
        reason: String,
    },
}

impl ManagerError {
    /// Creates a rejection error.
    pub fn rejected(operation: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an invalid-response error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Returns the backend reason, suitable for [`user_facing_reason`].
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Rejected { reason, .. } | Self::InvalidResponse { reason } => reason,
            Self::NotFound { .. } => "Download not found",
        }
    }
}

/// Download backend driven by the tracker.
///
/// Uses `async_trait` so implementations can be held as `Arc<dyn DownloadManager>`.
#[async_trait]
pub trait DownloadManager: Send + Sync {
    /// Starts a download and returns its manager-assigned id.
    async fn start(&self, request: StartRequest) -> Result<String, ManagerError>;

    /// Suspends a download.
    async fn pause(&self, id: &str) -> Result<(), ManagerError>;

    /// Resumes a paused download.
    async fn resume(&self, id: &str) -> Result<(), ManagerError>;

    /// Cancels a download.
    async fn cancel(&self, id: &str) -> Result<(), ManagerError>;

    /// Returns the current item, or `None` if the manager does not know the id.
    async fn query(&self, id: &str) -> Result<Option<DownloadItem>, ManagerError>;

    /// Subscribes to `created`/`changed` notifications.
    fn subscribe(&self) -> broadcast::Receiver<ManagerEvent>;
}

/// Maps a backend failure reason to a message fit for the user.
///
/// Unrecognised reasons are returned unchanged.
#[must_use]
pub fn user_facing_reason(raw: &str) -> String {
    if raw.contains("Download not permitted") {
        "Download blocked by browser policy".to_string()
    } else if raw.contains("Network error") || raw.contains(interrupt::NETWORK_FAILED) {
        "Network error - video may be offline or protected".to_string()
    } else if raw.contains("Forbidden") || raw.contains(interrupt::SERVER_FORBIDDEN) {
        "Access denied - video may require authentication".to_string()
    } else if raw.contains(interrupt::SERVER_BAD_CONTENT) {
        "Video not found on the server".to_string()
    } else if raw.contains(interrupt::FILE_FAILED) {
        "Could not write the downloaded file".to_string()
    } else {
        raw.to_string()
    }
}
