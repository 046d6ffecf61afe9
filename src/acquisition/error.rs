//! Error types for acquisition strategies and the chain.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single acquisition strategy. The chain recovers from every
/// variant but [`StrategyError::Canceled`] by moving on to the next strategy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// Connection-level failure.
    #[error("network error fetching {url}: {reason}")]
    Network {
        /// Requested URL.
        url: String,
        /// Transport message.
        reason: String,
    },

    /// A runtime facility the strategy needs is absent.
    #[error("{capability} is not available")]
    UnsupportedCapability {
        /// Missing facility.
        capability: String,
    },

    /// The strategy does not apply to this resource.
    #[error("skipped: {reason}")]
    Skipped {
        /// Why.
        reason: String,
    },

    /// Recording finished without a single chunk of data.
    #[error("no data captured")]
    NoDataCaptured,

    /// The recorder failed mid-capture.
    #[error("recording failed: {reason}")]
    Recording {
        /// Recorder message.
        reason: String,
    },

    /// The captured bytes could not be saved.
    #[error("failed to save {filename}: {reason}")]
    Save {
        /// Target filename.
        filename: String,
        /// IO message.
        reason: String,
    },

    /// The background download manager refused the hand-off.
    #[error("background download failed: {reason}")]
    Delegation {
        /// User-facing reason.
        reason: String,
    },

    /// The user canceled the acquisition.
    #[error("canceled")]
    Canceled,
}

impl StrategyError {
    /// Creates an unsupported-capability error.
    pub fn unsupported(capability: impl Into<String>) -> Self {
        Self::UnsupportedCapability {
            capability: capability.into(),
        }
    }

    /// Creates a skipped error.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Creates a network error.
    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for failures that only mean "this strategy cannot run
    /// here". They are left out of user-facing messages unless nothing
    /// else was tried after them.
    #[must_use]
    pub fn is_capability_gap(&self) -> bool {
        matches!(self, Self::UnsupportedCapability { .. } | Self::Skipped { .. })
    }
}

/// One entry in the failure trail of a chain run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    /// Strategy name.
    pub strategy: String,
    /// What went wrong.
    pub error: StrategyError,
}

/// Errors returned by [`super::AcquisitionChain::acquire`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// Every strategy failed.
    #[error("all acquisition strategies failed for {url}: {}", failure_trail(.failures))]
    AllStrategiesExhausted {
        /// Resource URL.
        url: String,
        /// Each strategy's failure, in order.
        failures: Vec<StrategyFailure>,
    },

    /// The wall-clock budget ran out.
    #[error("acquisition of {url} timed out after {}s", .budget.as_secs())]
    Timeout {
        /// Resource URL.
        url: String,
        /// Budget that was exceeded.
        budget: Duration,
    },

    /// The user canceled; no further strategy was tried.
    #[error("acquisition of {url} was canceled")]
    Canceled {
        /// Resource URL.
        url: String,
        /// Failures recorded before the cancel.
        failures: Vec<StrategyFailure>,
    },
}

impl AcquireError {
    /// Returns the failure trail (empty for timeouts).
    #[must_use]
    pub fn failures(&self) -> &[StrategyFailure] {
        match self {
            Self::AllStrategiesExhausted { failures, .. } | Self::Canceled { failures, .. } => failures,
            Self::Timeout { .. } => &[],
        }
    }

    /// Message for the user, naming what was tried and why it failed.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::AllStrategiesExhausted { failures, .. } if failures.is_empty() => {
                "No acquisition method is available for this video".to_string()
            }
            Self::AllStrategiesExhausted { failures, .. } => {
                format!("Could not acquire video ({})", failure_trail(failures))
            }
            Self::Timeout { budget, .. } => {
                format!("Acquisition timed out after {} seconds", budget.as_secs())
            }
            Self::Canceled { .. } => "Download canceled".to_string(),
        }
    }
}

/// Joins failures as `name: reason; name: reason`, leaving out capability
/// gaps except for the last entry.
fn failure_trail(failures: &[StrategyFailure]) -> String {
    let last = failures.len().saturating_sub(1);
    let shown: Vec<String> = failures
        .iter()
        .enumerate()
        .filter(|(index, failure)| *index == last || !failure.error.is_capability_gap())
        .map(|(_, failure)| format!("{}: {}", failure.strategy, failure.error))
        .collect();
    shown.join("; ")
}
