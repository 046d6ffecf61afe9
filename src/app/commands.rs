//! Subcommand handlers.

use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;
use video_downloader_core::classifier::{Platform, ResourceKind, analyze, classify};
use video_downloader_core::messaging::{Request, Response};
use video_downloader_core::reconciler::ViewEntry;
use video_downloader_core::record::{DetectedVideo, DownloadStatus, VideoType};

use super::progress::follow_download;
use super::runtime::Runtime;

const FALLBACK_TITLE: &str = "video";

/// Prints classification and analysis of each URL as JSON.
pub(crate) fn classify_urls(urls: &[String]) -> Result<()> {
    let reports: Vec<_> = urls
        .iter()
        .map(|url| {
            let analysis = analyze(url);
            json!({
                "url": url,
                "classification": classify(url),
                "analysis": analysis.as_ref().ok(),
                "error": analysis.as_ref().err().map(ToString::to_string),
            })
        })
        .collect();
    let output = serde_json::to_string_pretty(&reports).context("Failed to encode classification report")?;
    println!("{output}");
    Ok(())
}

/// Starts a download and follows it to the end.
pub(crate) async fn download(
    runtime: &Runtime,
    url: &str,
    title: Option<String>,
    duration: Option<f64>,
    quiet: bool,
) -> Result<()> {
    let events = runtime.bus.subscribe();
    let title = title.unwrap_or_else(|| title_from_url(url));
    let mut video = DetectedVideo::new(url, video_type_for(url)).with_title(title);
    if let Some(seconds) = duration {
        video = video.with_duration(seconds);
    }

    let response = runtime.service.download_video(video).await;
    if !response.success {
        let reason = response.error.unwrap_or_else(|| "Download failed".to_string());
        let source = response.source_url.unwrap_or_else(|| url.to_string());
        bail!("{reason}\nCopy the URL to download it manually: {source}");
    }
    let Some(id) = response.download_id else {
        bail!("Download started without an id");
    };
    info!(download_id = %id, "download accepted");

    let show_spinner = !quiet && std::io::stderr().is_terminal();
    let entry = follow_download(
        runtime.service.tracker(),
        events,
        &id,
        runtime.settings.poll_interval,
        show_spinner,
    )
    .await
    .with_context(|| format!("Download {id} is no longer tracked"))?;

    report_outcome(&entry)
}

fn report_outcome(entry: &ViewEntry) -> Result<()> {
    match entry.progress.status {
        DownloadStatus::Completed => {
            if entry.degraded {
                warn!(filename = %entry.progress.filename, "only a single frame could be saved");
            }
            println!("{}", entry.summary());
            Ok(())
        }
        DownloadStatus::Canceled => bail!("Download canceled: {}", entry.progress.filename),
        DownloadStatus::Error => {
            let reason = entry.error.as_deref().unwrap_or("Download failed");
            match &entry.source_url {
                Some(source) => bail!("{reason}\nCopy the URL to download it manually: {source}"),
                None => bail!("{reason}"),
            }
        }
        DownloadStatus::Pending | DownloadStatus::Downloading | DownloadStatus::Paused => {
            println!("{}", entry.summary());
            Ok(())
        }
    }
}

/// Prints every tracked download, active first.
pub(crate) async fn status(runtime: &Runtime) {
    let snapshot = runtime.service.tracker().snapshot().await;
    if snapshot.active.is_empty() && snapshot.completed.is_empty() {
        println!("No downloads");
        return;
    }
    for record in snapshot.active.iter().chain(&snapshot.completed) {
        println!("{}", ViewEntry::from_record(record).summary());
    }
}

/// Clears finished downloads, or everything with `all`.
pub(crate) async fn clear(runtime: &Runtime, all: bool) -> Result<()> {
    let request = if all { Request::ClearAll } else { Request::ClearCompleted };
    match runtime.service.handle(request).await {
        Response::Cleared { removed, .. } => {
            println!("Removed {removed} download(s)");
            Ok(())
        }
        other => bail!("Unexpected answer to clear: {other:?}"),
    }
}

/// Last path segment without its extension, or a generic title.
fn title_from_url(url: &str) -> String {
    let Some(segment) = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()).map(str::to_string))
    }) else {
        return FALLBACK_TITLE.to_string();
    };
    let decoded = urlencoding::decode(&segment).map_or_else(
        |e| {
            debug!(segment = %segment, error = %e, "URL decoding failed, using raw segment");
            segment.clone()
        },
        |decoded| decoded.into_owned(),
    );
    Path::new(&decoded)
        .file_stem()
        .map(|stem| stem.to_string_lossy().trim().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

fn video_type_for(url: &str) -> VideoType {
    match classify(url).kind {
        ResourceKind::Platform(Platform::YouTube) => VideoType::Youtube,
        ResourceKind::Platform(Platform::Vimeo) => VideoType::Vimeo,
        _ => VideoType::Html5,
    }
}
