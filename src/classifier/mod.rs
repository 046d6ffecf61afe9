//! Resource classification for candidate video URLs.
//!
//! Classification decides whether a URL can be handed straight to the
//! download manager or has to go through the acquisition chain. It is pure
//! string/pattern matching: no network traffic, no side effects, and the same
//! input always yields the same [`Classification`].
//!
//! Signals are checked in order:
//! 1. Scheme (`blob:` is always protected, non-HTTP schemes are never direct)
//! 2. Known streaming platform hosts (YouTube, Vimeo, Twitch)
//! 3. Streaming manifest extensions (`.m3u8`, `.mpd`)
//! 4. Video file extensions (`.mp4`, `.webm`, ...)
//! 5. Cloud storage hosts
//! 6. Anything else over HTTP(S) is ambiguous and classified permissively as
//!    downloadable, since the acquisition chain can still fail gracefully.
//!
//! # Example
//!
//! ```
//! use video_downloader_core::classifier::classify;
//!
//! let result = classify("https://cdn.example.com/video.mp4?sig=abc");
//! assert!(result.downloadable);
//! assert_eq!(result.extension_hint, Some("mp4"));
//! ```

mod analysis;

pub use analysis::{AnalyzeError, UrlAnalysis, analyze, extension_for, is_video_url};

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;
use url::Url;

/// Video container extensions recognised as directly downloadable files.
pub const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "webm", "mkv", "avi", "mov", "flv", "m4v", "3gp"];

/// Streaming manifest extensions. These describe a stream, not a file.
pub const MANIFEST_EXTENSIONS: [&str; 2] = ["m3u8", "mpd"];

#[allow(clippy::expect_used)]
static YOUTUBE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|\.)(youtube\.com|youtu\.be|youtube-nocookie\.com|googlevideo\.com)$")
        .expect("YouTube host regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static VIMEO_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|\.)(vimeo\.com|vimeocdn\.com)$").expect("Vimeo host regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TWITCH_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|\.)(twitch\.tv|ttvnw\.net|jtvnw\.net)$").expect("Twitch host regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static CLOUD_STORAGE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(^|\.)(drive\.google\.com|storage\.googleapis\.com|dropbox\.com|dropboxusercontent\.com|onedrive\.live\.com|1drv\.ms|amazonaws\.com|blob\.core\.windows\.net)$",
    )
    .expect("cloud storage host regex is valid") // Static pattern, safe to panic
});

/// Streaming platforms whose pages and media URLs cannot be saved directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// youtube.com, youtu.be and the googlevideo.com media CDN.
    YouTube,
    /// vimeo.com and its CDN.
    Vimeo,
    /// twitch.tv and its HLS edge hosts.
    Twitch,
}

impl Platform {
    /// Returns the human-readable platform label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::Vimeo => "Vimeo",
            Self::Twitch => "Twitch",
        }
    }

    pub(crate) fn from_host(host: &str) -> Option<Self> {
        if YOUTUBE_HOST.is_match(host) {
            Some(Self::YouTube)
        } else if VIMEO_HOST.is_match(host) {
            Some(Self::Vimeo)
        } else if TWITCH_HOST.is_match(host) {
            Some(Self::Twitch)
        } else {
            None
        }
    }
}

/// What kind of resource a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "platform")]
pub enum ResourceKind {
    /// A plain media file with a recognised container extension.
    File,
    /// A cloud-storage download link.
    CloudFile,
    /// A `blob:` object URL only resolvable inside the page that created it.
    Blob,
    /// An HLS or DASH manifest.
    Manifest,
    /// A media URL on a known streaming platform.
    Platform(Platform),
    /// An HTTP(S) URL with no recognisable signal.
    Unknown,
    /// A URL that cannot be parsed or uses an unsupported scheme.
    Unsupported,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::CloudFile => write!(f, "cloud_file"),
            Self::Blob => write!(f, "blob"),
            Self::Manifest => write!(f, "manifest"),
            Self::Platform(platform) => write!(f, "platform:{}", platform.label()),
            Self::Unknown => write!(f, "unknown"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Result of classifying a candidate URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// True when the URL can be passed directly to the download manager.
    pub downloadable: bool,
    /// The resource kind that decided the classification.
    pub kind: ResourceKind,
    /// Best-guess MIME type, when one can be inferred.
    pub mime_hint: Option<&'static str>,
    /// Best-guess file extension without the leading dot.
    pub extension_hint: Option<&'static str>,
    /// True when no signal matched and the permissive default was applied.
    pub ambiguous: bool,
}

impl Classification {
    /// Returns true when the resource needs the acquisition chain.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        !self.downloadable
    }

    fn protected(kind: ResourceKind, mime_hint: Option<&'static str>, ext: Option<&'static str>) -> Self {
        Self {
            downloadable: false,
            kind,
            mime_hint,
            extension_hint: ext,
            ambiguous: false,
        }
    }

    fn direct(kind: ResourceKind, mime_hint: Option<&'static str>, ext: Option<&'static str>) -> Self {
        Self {
            downloadable: true,
            kind,
            mime_hint,
            extension_hint: ext,
            ambiguous: false,
        }
    }
}

/// Classifies an absolute URL as directly downloadable or protected.
///
/// Never fails: unparseable input is reported as [`ResourceKind::Unsupported`]
/// and not downloadable.
#[must_use]
pub fn classify(url: &str) -> Classification {
    let trimmed = url.trim();

    if trimmed
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("blob:"))
    {
        return Classification::protected(ResourceKind::Blob, None, Some("mp4"));
    }

    let Ok(parsed) = Url::parse(trimmed) else {
        debug!(url = %trimmed, "unparseable URL classified as unsupported");
        return Classification::protected(ResourceKind::Unsupported, None, None);
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return Classification::protected(ResourceKind::Unsupported, None, None);
    }

    let host = parsed.host_str().unwrap_or_default();
    let extension = path_extension(&parsed);

    if let Some(platform) = Platform::from_host(host) {
        let is_manifest = extension
            .as_deref()
            .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext));
        let (mime, ext) = if is_manifest {
            manifest_hints(extension.as_deref().unwrap_or_default())
        } else {
            (Some("video/mp4"), Some("mp4"))
        };
        return Classification::protected(ResourceKind::Platform(platform), mime, ext);
    }

    if let Some(ext) = extension.as_deref() {
        if MANIFEST_EXTENSIONS.contains(&ext) {
            let (mime, ext) = manifest_hints(ext);
            return Classification::protected(ResourceKind::Manifest, mime, ext);
        }
        if let Some(known) = known_video_extension(ext) {
            return Classification::direct(ResourceKind::File, Some(mime_for_extension(known)), Some(known));
        }
    }

    if CLOUD_STORAGE_HOST.is_match(host) {
        return Classification::direct(ResourceKind::CloudFile, None, Some("mp4"));
    }

    debug!(url = %trimmed, "no classification signal matched; defaulting to downloadable");
    Classification {
        downloadable: true,
        kind: ResourceKind::Unknown,
        mime_hint: None,
        extension_hint: None,
        ambiguous: true,
    }
}

fn path_extension(url: &Url) -> Option<String> {
    let last_segment = url.path_segments()?.next_back()?;
    let (_, ext) = last_segment.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub(crate) fn known_video_extension(ext: &str) -> Option<&'static str> {
    VIDEO_EXTENSIONS
        .iter()
        .copied()
        .find(|candidate| candidate.eq_ignore_ascii_case(ext))
}

fn manifest_hints(ext: &str) -> (Option<&'static str>, Option<&'static str>) {
    match ext {
        "m3u8" => (Some("application/vnd.apple.mpegurl"), Some("m3u8")),
        _ => (Some("application/dash+xml"), Some("mpd")),
    }
}

/// Maps a video container extension to its MIME type.
#[must_use]
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "flv" => "video/x-flv",
        "m4v" => "video/x-m4v",
        "3gp" => "video/3gpp",
        _ => "video/mp4",
    }
}
