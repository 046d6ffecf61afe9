//! Wires the store, download manager, tracker and acquisition chain together.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};
use video_downloader_core::acquisition::{DelegateDownload, DirectorySink, build_default_chain};
use video_downloader_core::bus::{Broadcaster, EventBus};
use video_downloader_core::http::build_client;
use video_downloader_core::manager::{DownloadManager, LocalDownloadManager};
use video_downloader_core::messaging::BackgroundService;
use video_downloader_core::scan::CandidateStore;
use video_downloader_core::store::{JsonFileStore, KeyValueStore};
use video_downloader_core::tracker::DownloadTracker;

use super::settings::Settings;

/// Everything a command needs for one run.
pub(crate) struct Runtime {
    pub(crate) service: BackgroundService,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) settings: Settings,
}

impl Runtime {
    pub(crate) async fn build(settings: Settings) -> Result<Self> {
        tokio::fs::create_dir_all(&settings.output_dir)
            .await
            .with_context(|| format!("Failed to create output directory '{}'", settings.output_dir.display()))?;

        let client = build_client(settings.http).context("Failed to build HTTP client")?;
        let store: Arc<dyn KeyValueStore> = Arc::new(
            JsonFileStore::open(&settings.state_file)
                .await
                .with_context(|| format!("Failed to open state file '{}'", settings.state_file.display()))?,
        );
        let manager: Arc<dyn DownloadManager> =
            Arc::new(LocalDownloadManager::new(client.clone(), &settings.output_dir));
        let bus = Arc::new(EventBus::default());
        let broadcaster: Arc<dyn Broadcaster> = bus.clone();

        let tracker = Arc::new(DownloadTracker::new(Arc::clone(&store), manager, Arc::clone(&broadcaster)));
        let restored = tracker.init().await;
        debug!(?restored, state_file = %settings.state_file.display(), "download state restored");

        let delegate: Arc<dyn DelegateDownload> = tracker.clone();
        let chain = build_default_chain(
            client,
            Arc::new(DirectorySink::new(&settings.output_dir)),
            None,
            delegate,
            settings.capture,
            settings.acquisition_budget,
        );
        info!(strategies = ?chain.strategy_names(), "acquisition chain ready");

        let candidates = CandidateStore::new(store, Arc::clone(&broadcaster));
        let service = BackgroundService::new(tracker, chain, candidates, broadcaster);

        Ok(Self { service, bus, settings })
    }

    /// Stops the tracker event loop and flushes state.
    pub(crate) async fn shutdown(self) {
        self.service.tracker().teardown().await;
    }
}
