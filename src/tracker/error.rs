//! Error types for tracker operations.

use thiserror::Error;

use crate::record::DownloadStatus;

/// Errors returned by [`super::DownloadTracker`] operations.
///
/// Persistence failures never appear here: they are logged and swallowed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// No record with this id exists.
    #[error("download {id} not found")]
    NotFound {
        /// Requested id.
        id: String,
    },

    /// The operation is not allowed from the record's current status.
    #[error("cannot {action} download {id} while it is {from}")]
    InvalidTransition {
        /// Record id.
        id: String,
        /// Current status.
        from: DownloadStatus,
        /// Attempted operation.
        action: &'static str,
    },

    /// The download manager refused the operation; the record is unchanged.
    #[error("download manager rejected {action} for {id}: {reason}")]
    ManagerRejected {
        /// Record id.
        id: String,
        /// Attempted operation.
        action: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// Renaming a pending record would collide with an existing record.
    #[error("cannot bind {pending_id} to {os_id}: id already in use")]
    IdConflict {
        /// Ephemeral correlation key.
        pending_id: String,
        /// Manager-assigned id.
        os_id: String,
    },

    /// The resource cannot be handed to the download manager.
    #[error("{url} cannot be downloaded directly: {reason}")]
    NotDirectlyDownloadable {
        /// Resource URL.
        url: String,
        /// Why.
        reason: String,
    },

    /// The download manager answered with data that failed validation.
    #[error("invalid download manager response: {reason}")]
    InvalidResponse {
        /// What was wrong.
        reason: String,
    },
}

impl TrackerError {
    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an invalid-transition error.
    pub fn invalid_transition(id: impl Into<String>, from: DownloadStatus, action: &'static str) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            from,
            action,
        }
    }

    /// Creates a manager-rejected error.
    pub fn manager_rejected(id: impl Into<String>, action: &'static str, reason: impl Into<String>) -> Self {
        Self::ManagerRejected {
            id: id.into(),
            action,
            reason: reason.into(),
        }
    }

    /// Returns a message fit for the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ManagerRejected { reason, .. } | Self::NotDirectlyDownloadable { reason, .. } => {
                reason.clone()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = TrackerError::invalid_transition("5", DownloadStatus::Completed, "pause");
        assert_eq!(err.to_string(), "cannot pause download 5 while it is completed");
    }

    #[test]
    fn test_user_message_uses_reason() {
        let err = TrackerError::manager_rejected("5", "cancel", "Access denied");
        assert_eq!(err.user_message(), "Access denied");
        assert_eq!(TrackerError::not_found("x").user_message(), "download x not found");
    }
}
