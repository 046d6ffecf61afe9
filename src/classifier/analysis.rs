//! URL analysis helpers used by the detection and messaging layers.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use super::{Platform, VIDEO_EXTENSIONS, known_video_extension};
use crate::record::VideoType;

#[allow(clippy::expect_used)]
static NETWORK_VIDEO_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\.(mp4|webm|mkv|avi|mov|flv|m4v|3gp)(\?|$)",
        r"(?i)^blob:",
        r"(?i)youtube\.com.*videoplayback",
        r"(?i)googlevideo\.com",
        r"(?i)vimeo\.com.*progressive",
        r"(?i)twitch\.tv.*\.m3u8",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("network video regex is valid")) // Static patterns, safe to panic
    .collect()
});

/// Errors returned by [`analyze`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalyzeError {
    /// The input could not be parsed as an absolute URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected input.
        url: String,
    },
}

/// Lightweight description of a URL for display in the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlAnalysis {
    /// Host name, empty for hostless schemes.
    pub domain: String,
    /// Scheme including the trailing colon (`https:`).
    pub protocol: String,
    /// True for `https:` URLs.
    pub is_secure: bool,
    /// Best-effort label (`YouTube`, `MP4`, `Blob/Stream`, `Unknown`, ...).
    pub estimated_type: &'static str,
}

/// Describes a URL without touching the network.
///
/// # Errors
///
/// Returns [`AnalyzeError::InvalidUrl`] when the input does not parse.
pub fn analyze(url: &str) -> Result<UrlAnalysis, AnalyzeError> {
    let parsed = Url::parse(url).map_err(|_| AnalyzeError::InvalidUrl {
        url: url.to_string(),
    })?;

    Ok(UrlAnalysis {
        domain: parsed.host_str().unwrap_or_default().to_string(),
        protocol: format!("{}:", parsed.scheme()),
        is_secure: parsed.scheme() == "https",
        estimated_type: estimate_type(url, &parsed),
    })
}

fn estimate_type(raw: &str, parsed: &Url) -> &'static str {
    if parsed.scheme() == "blob" {
        return "Blob/Stream";
    }
    if let Some(platform) = parsed.host_str().and_then(Platform::from_host) {
        return platform.label();
    }
    let lower = raw.to_ascii_lowercase();
    if lower.contains(".mp4") {
        "MP4"
    } else if lower.contains(".webm") {
        "WebM"
    } else {
        "Unknown"
    }
}

/// Returns true when a network request URL looks like video traffic.
///
/// Used to record media requests observed while a page loads. Broader than
/// [`super::classify`]: it also matches URLs that will later be classified
/// as protected.
#[must_use]
pub fn is_video_url(url: &str) -> bool {
    if NETWORK_VIDEO_PATTERNS.iter().any(|pattern| pattern.is_match(url)) {
        return true;
    }
    let lower = url.to_ascii_lowercase();
    VIDEO_EXTENSIONS
        .iter()
        .any(|ext| lower.contains(&format!(".{ext}")))
}

/// Picks the file extension to save a video under.
///
/// Uses the URL path extension when it is a known container, otherwise falls
/// back on the detected video type. Platform and blob sources default to
/// `mp4`, which is what they overwhelmingly serve.
#[must_use]
pub fn extension_for(url: &str, video_type: VideoType) -> &'static str {
    let from_path = Url::parse(url).ok().and_then(|parsed| {
        let segment = parsed.path_segments()?.next_back()?.to_string();
        let (_, ext) = segment.rsplit_once('.')?;
        known_video_extension(ext)
    });
    if let Some(ext) = from_path {
        return ext;
    }

    let lower = url.to_ascii_lowercase();
    match video_type {
        VideoType::Youtube | VideoType::Vimeo => "mp4",
        _ if lower.contains(".webm") => "webm",
        _ if lower.contains(".mkv") => "mkv",
        _ => "mp4",
    }
}
