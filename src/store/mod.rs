//! Durable key-value storage used by the tracker and the scan layer.
//!
//! The store has no transactions and no query language. Callers own their key
//! namespacing; the helpers in this module define the keys used by the crate.
//!
//! # Implementations
//!
//! - [`MemoryStore`] - process-local map, used in tests and one-shot runs
//! - [`JsonFileStore`] - whole-map JSON file with atomic replace on write

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Key holding the active download map.
pub const ACTIVE_DOWNLOADS_KEY: &str = "activeDownloads";

/// Key holding the completed download map.
pub const COMPLETED_DOWNLOADS_KEY: &str = "completedDownloads";

/// Key for scan results of a tab.
#[must_use]
pub fn videos_key(tab_id: u32) -> String {
    format!("videos_{tab_id}")
}

/// Key for network-observed candidates of a tab.
#[must_use]
pub fn detected_videos_key(tab_id: u32) -> String {
    format!("detected_videos_{tab_id}")
}

/// Auxiliary per-download key cleaned up when a stale record is dropped.
#[must_use]
pub fn download_aux_key(download_id: &str) -> String {
    format!("download_{download_id}")
}

/// Errors from a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("storage IO error at {path}: {source}")]
    Io {
        /// Backing file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The stored document is not a JSON object.
    #[error("storage file {path} is corrupt: {reason}")]
    Corrupt {
        /// Backing file path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// A value could not be encoded.
    #[error("failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),

    /// The backend refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates an IO error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Asynchronous key-value store.
///
/// Uses `async_trait` so the tracker can hold an `Arc<dyn KeyValueStore>`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the values present for `keys`; missing keys are omitted.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError>;

    /// Writes every entry of `entries`, replacing existing values.
    async fn set(&self, entries: HashMap<String, Value>) -> Result<(), StoreError>;

    /// Deletes `keys`. Missing keys are ignored.
    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError>;
}
