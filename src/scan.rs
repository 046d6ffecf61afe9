//! Page scanning and per-tab candidate storage.
//!
//! A scan first pings the page to make sure its script is ready, then asks
//! for the videos it found. The handshake retries a bounded number of times
//! with a delay that grows linearly with the attempt number. Whatever
//! happens, the tab's stored list is replaced and `videosUpdated` is
//! broadcast, so the UI never shows a stale list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{Broadcaster, Event};
use crate::classifier::is_video_url;
use crate::record::{DetectedVideo, VideoType};
use crate::store::{KeyValueStore, StoreError, detected_videos_key, videos_key};

/// Maximum number of network-observed candidates kept per tab.
pub const MAX_DETECTED_PER_TAB: usize = 100;

/// Errors from a page scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The page script never answered.
    #[error("failed to reach page script in tab {tab_id} after {attempts} attempts: {reason}")]
    Unreachable {
        /// Target tab.
        tab_id: u32,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },

    /// Storing the result failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Point-to-point channel to the script running in a tab.
#[async_trait]
pub trait PageChannel: Send + Sync {
    /// Readiness probe.
    async fn ping(&self, tab_id: u32) -> Result<(), String>;

    /// Asks the page for the videos it can see.
    async fn scan(&self, tab_id: u32) -> Result<Vec<DetectedVideo>, String>;
}

/// Retry policy for the readiness handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePolicy {
    /// Total attempts.
    pub attempts: u32,
    /// Delay after the first failure; the n-th failure waits `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl HandshakePolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Pings then scans, retrying per `policy`.
///
/// # Errors
///
/// [`ScanError::Unreachable`] once every attempt has failed.
pub async fn handshake_scan(
    channel: &dyn PageChannel,
    tab_id: u32,
    policy: HandshakePolicy,
) -> Result<Vec<DetectedVideo>, ScanError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match channel.ping(tab_id).await {
            Ok(()) => channel.scan(tab_id).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(videos) => {
                debug!(tab_id, attempt, found = videos.len(), "page scan answered");
                return Ok(videos);
            }
            Err(reason) if attempt >= attempts => {
                return Err(ScanError::Unreachable {
                    tab_id,
                    attempts,
                    reason,
                });
            }
            Err(reason) => {
                let delay = policy.delay_after(attempt);
                debug!(tab_id, attempt, error = %reason, delay_ms = delay.as_millis(), "page not ready, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Per-tab candidate lists kept in the key-value store.
pub struct CandidateStore {
    store: Arc<dyn KeyValueStore>,
    bus: Arc<dyn Broadcaster>,
    policy: HandshakePolicy,
}

impl std::fmt::Debug for CandidateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateStore")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CandidateStore {
    /// Creates a candidate store with the default handshake policy.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, bus: Arc<dyn Broadcaster>) -> Self {
        Self {
            store,
            bus,
            policy: HandshakePolicy::default(),
        }
    }

    /// Replaces the handshake policy.
    #[must_use]
    pub fn with_policy(mut self, policy: HandshakePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Scans `tab_id` and stores the result, broadcasting `videosUpdated`.
    ///
    /// An unreachable page stores and broadcasts an empty list. The
    /// returned list is what was stored.
    #[tracing::instrument(skip(self, channel))]
    pub async fn trigger_video_scan(&self, channel: &dyn PageChannel, tab_id: u32) -> Vec<DetectedVideo> {
        let videos = match handshake_scan(channel, tab_id, self.policy).await {
            Ok(videos) => videos,
            Err(e) => {
                warn!(error = %e, "video scan failed; clearing candidates");
                Vec::new()
            }
        };
        info!(tab_id, found = videos.len(), "video scan stored");

        if let Err(e) = self.write_list(&videos_key(tab_id), &videos).await {
            warn!(tab_id, error = %e, "failed to store scan results");
        }
        self.bus.publish(Event::VideosUpdated {
            tab_id,
            videos: videos.clone(),
        });
        videos
    }

    /// Candidates from the last scan of `tab_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    pub async fn scanned_videos(&self, tab_id: u32) -> Result<Vec<DetectedVideo>, StoreError> {
        self.read_list(&videos_key(tab_id)).await
    }

    /// Candidates observed in network traffic of `tab_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    pub async fn detected_videos(&self, tab_id: u32) -> Result<Vec<DetectedVideo>, StoreError> {
        self.read_list(&detected_videos_key(tab_id)).await
    }

    /// Records a network request if it looks like video. Returns true when
    /// a new candidate was stored.
    ///
    /// Duplicates are ignored and only the most recent
    /// [`MAX_DETECTED_PER_TAB`] entries are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read or written.
    pub async fn record_network_request(&self, tab_id: u32, url: &str) -> Result<bool, StoreError> {
        if !is_video_url(url) {
            return Ok(false);
        }
        let key = detected_videos_key(tab_id);
        let mut videos = self.read_list(&key).await?;
        if videos.iter().any(|video| video.url == url) {
            return Ok(false);
        }
        videos.push(DetectedVideo::new(url, VideoType::Network));
        if videos.len() > MAX_DETECTED_PER_TAB {
            let excess = videos.len() - MAX_DETECTED_PER_TAB;
            videos.drain(..excess);
        }
        self.write_list(&key, &videos).await?;
        debug!(tab_id, url, "network video candidate recorded");
        Ok(true)
    }

    /// Drops every candidate list of `tab_id`. Called when the tab navigates
    /// or closes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store refuses the removal.
    pub async fn invalidate_tab(&self, tab_id: u32) -> Result<(), StoreError> {
        let scanned = videos_key(tab_id);
        let detected = detected_videos_key(tab_id);
        self.store.remove(&[scanned.as_str(), detected.as_str()]).await?;
        debug!(tab_id, "tab candidates invalidated");
        Ok(())
    }

    async fn read_list(&self, key: &str) -> Result<Vec<DetectedVideo>, StoreError> {
        let mut values = self.store.get(&[key]).await?;
        let Some(value) = values.remove(key) else {
            return Ok(Vec::new());
        };
        match serde_json::from_value(value) {
            Ok(videos) => Ok(videos),
            Err(e) => {
                warn!(key, error = %e, "stored candidate list is unreadable; ignoring it");
                Ok(Vec::new())
            }
        }
    }

    async fn write_list(&self, key: &str, videos: &[DetectedVideo]) -> Result<(), StoreError> {
        let value: Value = serde_json::to_value(videos)?;
        self.store
            .set(std::iter::once((key.to_string(), value)).collect())
            .await
    }
}
