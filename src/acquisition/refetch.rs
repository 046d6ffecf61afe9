//! Direct re-fetch of the resource over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use super::{
    AcquireContext, Acquisition, AcquisitionStrategy, CancelSignal, PartialArtifact, SaveSink, SavedArtifact, StrategyError,
};
use crate::filename::{extension_from_content_type, generate_filename, with_extension};
use crate::record::DetectedVideo;

/// Fetches the URL with the session's cookies and streams the body to the
/// sink.
///
/// Fails fast: no retries, and a non-2xx status is reported as-is so the
/// chain can move on. A partial file is removed on failure or cancel.
pub struct DirectRefetch {
    client: Client,
    sink: Arc<dyn SaveSink>,
}

impl DirectRefetch {
    /// Creates the strategy. `client` should carry the session cookie store.
    #[must_use]
    pub fn new(client: Client, sink: Arc<dyn SaveSink>) -> Self {
        Self { client, sink }
    }
}

#[async_trait]
impl AcquisitionStrategy for DirectRefetch {
    fn name(&self) -> &'static str {
        "direct_refetch"
    }

    async fn acquire(&self, video: &DetectedVideo, ctx: &AcquireContext) -> Result<Acquisition, StrategyError> {
        let url = &video.url;
        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) if parsed.scheme() == "blob" => {
                return Err(StrategyError::unsupported("blob URL fetch outside the page"));
            }
            _ => return Err(StrategyError::unsupported(format!("fetching {url}"))),
        }

        let response = tokio::select! {
            biased;
            () = ctx.cancel.canceled() => return Err(StrategyError::Canceled),
            response = self.client.get(url).send() => {
                response.map_err(|e| StrategyError::network(url, e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(StrategyError::HttpStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut filename = generate_filename(&video.title, url, video.video_type, Utc::now());
        if let Some(ext) = mime.as_deref().and_then(extension_from_content_type) {
            filename = with_extension(&filename, ext);
        }

        let mut artifact = self.sink.create(&filename).await?;
        if let Err(e) = stream_to_artifact(response, &mut artifact, url, &ctx.cancel).await {
            artifact.discard().await;
            return Err(e);
        }
        let bytes = artifact.written();
        let path = artifact.finish().await?;
        debug!(url = %url, bytes, path = %path.display(), "re-fetch saved");

        let filename = path
            .file_name()
            .map_or(filename, |name| name.to_string_lossy().into_owned());
        Ok(Acquisition::Saved(SavedArtifact {
            path,
            filename,
            bytes,
            mime,
            degraded: None,
        }))
    }
}

/// Copies the response body into `artifact`. The caller discards the
/// artifact on error.
async fn stream_to_artifact(
    response: reqwest::Response,
    artifact: &mut PartialArtifact,
    url: &str,
    cancel: &CancelSignal,
) -> Result<(), StrategyError> {
    let mut stream = response.bytes_stream();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.canceled() => return Err(StrategyError::Canceled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| StrategyError::network(url, e.to_string()))?;
        artifact.write(&chunk).await?;
    }
    if artifact.written() == 0 {
        return Err(StrategyError::network(url, "empty response body"));
    }
    Ok(())
}
