//! Shared HTTP client construction.

use std::time::Duration;

use reqwest::Client;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default per-read timeout in seconds. Applies between body chunks, not to
/// the whole transfer, so long videos are not cut off.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;

/// Timeouts applied to every client built by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Idle timeout between reads.
    pub read_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
        }
    }
}

/// User-Agent sent with every request.
#[must_use]
pub(crate) fn user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("video-downloader/{version}")
}

/// Builds a client with a cookie store, gzip and the configured timeouts.
///
/// # Errors
///
/// Returns the `reqwest` builder error if the TLS backend fails to initialise.
pub fn build_client(settings: HttpSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .read_timeout(settings.read_timeout)
        .cookie_store(true)
        .gzip(true)
        .user_agent(user_agent())
        .build()
}
