//! Filename synthesis, sanitization, and path resolution for saved videos.
//!
//! Generated names follow `Title_YYYYMMDDTHHMMSS.ext`. Titles are reduced to
//! filesystem-safe characters and truncated so the result stays well under
//! common path limits.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::classifier::extension_for;
use crate::record::VideoType;

/// Maximum number of title characters kept in a generated filename.
pub const MAX_TITLE_CHARS: usize = 100;

const FALLBACK_TITLE: &str = "video";

/// Builds a download filename for a detected video.
///
/// The extension is inferred from the URL and discovery type.
#[must_use]
pub fn generate_filename(title: &str, url: &str, video_type: VideoType, now: DateTime<Utc>) -> String {
    compose(title, "", extension_for(url, video_type), now)
}

/// Builds a filename for a captured artifact, e.g. `Clip_captured_...webm`.
///
/// `suffix` is appended to the sanitized title with an underscore.
#[must_use]
pub fn generate_capture_filename(title: &str, suffix: &str, extension: &str, now: DateTime<Utc>) -> String {
    compose(title, suffix, extension, now)
}

fn compose(title: &str, suffix: &str, extension: &str, now: DateTime<Utc>) -> String {
    let mut stem = sanitize_title(title);
    if !suffix.is_empty() {
        stem.push('_');
        stem.push_str(suffix);
    }
    let timestamp = now.format("%Y%m%dT%H%M%S");
    let extension = extension.trim_start_matches('.');
    format!("{stem}_{timestamp}.{extension}")
}

/// Replaces reserved characters and whitespace with `_` and truncates.
///
/// Returns `video` for titles that are empty after trimming.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return FALLBACK_TITLE.to_string();
    }
    trimmed
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .take(MAX_TITLE_CHARS)
        .collect()
}

/// Sanitizes a complete filename for use inside an output directory.
///
/// Path separators and reserved characters become `_`; dot-only names are
/// rewritten so they cannot escape the directory.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    let safe = !Path::new(&sanitized).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if safe {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Resolves a path in `dir` that does not exist yet.
///
/// `clip.mp4` becomes `clip_1.mp4`, `clip_2.mp4`, ... on collision.
pub(crate) fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.trim_matches('_').is_empty() {
            "video.bin".to_string()
        } else {
            sanitized
        }
    };
    let base_path = dir.join(&filename);
    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    dir.join(format!("{stem}_{}{ext}", Utc::now().timestamp()))
}

/// Guesses a video file extension from a `Content-Type` header value.
pub(crate) fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "video/x-matroska" => Some("mkv"),
        "video/quicktime" => Some("mov"),
        "video/x-msvideo" => Some("avi"),
        "video/x-flv" => Some("flv"),
        "video/x-m4v" => Some("m4v"),
        "video/3gpp" => Some("3gp"),
        "image/png" => Some("png"),
        _ => None,
    }
}

/// Swaps the extension of `filename` for `extension`.
pub(crate) fn with_extension(filename: &str, extension: &str) -> String {
    let stem = match filename.rfind('.') {
        Some(pos) if pos > 0 => &filename[..pos],
        _ => filename,
    };
    format!("{stem}.{}", extension.trim_start_matches('.'))
}
