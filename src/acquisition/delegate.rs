//! Hand-off to the background download manager.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{AcquireContext, Acquisition, AcquisitionStrategy, DelegateDownload, StrategyError};
use crate::record::DetectedVideo;

/// Asks the download manager to fetch the original URL.
///
/// Used when the in-page strategies cannot run. `blob:` URLs are refused by
/// the delegate, since they only resolve inside the page that created them.
pub struct BackgroundDelegate {
    delegate: Arc<dyn DelegateDownload>,
}

impl BackgroundDelegate {
    /// Creates the strategy.
    #[must_use]
    pub fn new(delegate: Arc<dyn DelegateDownload>) -> Self {
        Self { delegate }
    }
}

#[async_trait]
impl AcquisitionStrategy for BackgroundDelegate {
    fn name(&self) -> &'static str {
        "background_delegate"
    }

    async fn acquire(&self, video: &DetectedVideo, ctx: &AcquireContext) -> Result<Acquisition, StrategyError> {
        let download_id = self
            .delegate
            .delegate(&ctx.record_id)
            .await
            .map_err(|reason| StrategyError::Delegation { reason })?;
        debug!(url = %video.url, download_id = %download_id, "delegated to download manager");
        Ok(Acquisition::Delegated { download_id })
    }
}
