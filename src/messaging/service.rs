//! Background service: routes requests to the tracker, the acquisition
//! chain and the candidate store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::{DownloadResponse, Request, Response};
use crate::acquisition::{
    AcquireContext, AcquireError, Acquisition, AcquisitionChain, CaptureObserver, CaptureProgress,
};
use crate::bus::Broadcaster;
use crate::classifier::{analyze, classify};
use crate::filename::generate_filename;
use crate::record::DetectedVideo;
use crate::scan::{CandidateStore, PageChannel};
use crate::tracker::{Completion, DownloadTracker, Outcome, PendingMeta, TrackerError};

const UNKNOWN_TITLE: &str = "Unknown Video";

/// Feeds capture progress into the tracker record being acquired.
struct TrackerObserver {
    tracker: Arc<DownloadTracker>,
    record_id: String,
}

#[async_trait]
impl CaptureObserver for TrackerObserver {
    async fn on_progress(&self, progress: &CaptureProgress) {
        if let Err(e) = self
            .tracker
            .apply_capture_progress(&self.record_id, progress.total_bytes, progress.elapsed.as_secs_f64())
            .await
        {
            debug!(download_id = %self.record_id, error = %e, "capture progress not applied");
        }
    }
}

/// Hosts the tracker and answers [`Request`]s.
pub struct BackgroundService {
    tracker: Arc<DownloadTracker>,
    chain: AcquisitionChain,
    candidates: CandidateStore,
    bus: Arc<dyn Broadcaster>,
    page: Option<Arc<dyn PageChannel>>,
}

impl std::fmt::Debug for BackgroundService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundService")
            .field("chain", &self.chain)
            .field("page", &self.page.is_some())
            .finish_non_exhaustive()
    }
}

impl BackgroundService {
    /// Creates a service without page access; `triggerVideoScan` then
    /// answers with a failure.
    #[must_use]
    pub fn new(
        tracker: Arc<DownloadTracker>,
        chain: AcquisitionChain,
        candidates: CandidateStore,
        bus: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            tracker,
            chain,
            candidates,
            bus,
            page: None,
        }
    }

    /// Attaches the channel used to reach page scripts.
    #[must_use]
    pub fn with_page_channel(mut self, page: Arc<dyn PageChannel>) -> Self {
        self.page = Some(page);
        self
    }

    /// The tracker this service drives.
    #[must_use]
    pub fn tracker(&self) -> &Arc<DownloadTracker> {
        &self.tracker
    }

    /// Answers one request. Never fails; errors are reported in the response.
    #[tracing::instrument(skip_all, fields(action = request.action()))]
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::ok(),
            Request::GetDetectedVideos { tab_id } => match self.candidates.detected_videos(tab_id).await {
                Ok(videos) => Response::Videos { videos },
                Err(e) => {
                    warn!(tab_id, error = %e, "failed to read detected videos");
                    Response::Videos { videos: Vec::new() }
                }
            },
            Request::DownloadVideo { video } => Response::Download(self.download_video(video).await),
            Request::AnalyzeVideo { url } => match analyze(&url) {
                Ok(analysis) => Response::Analysis { analysis },
                Err(e) => Response::failure(e.to_string()),
            },
            Request::GetDownloadProgress => {
                let downloads: BTreeMap<_, _> = self
                    .tracker
                    .progress_snapshot()
                    .await
                    .into_iter()
                    .map(|snapshot| (snapshot.id.clone(), snapshot))
                    .collect();
                Response::Progress { downloads }
            }
            Request::PauseDownload { download_id } => ack(self.tracker.pause(&download_id).await),
            Request::ResumeDownload { download_id } => ack(self.tracker.resume(&download_id).await),
            Request::CancelDownload { download_id } => ack(self.tracker.cancel(&download_id).await),
            Request::RemoveDownload { download_id } => ack(self.tracker.remove(&download_id).await),
            Request::ClearCompleted => Response::Cleared {
                success: true,
                removed: self.tracker.clear_completed().await,
            },
            Request::ClearAll => Response::Cleared {
                success: true,
                removed: self.tracker.clear_all().await,
            },
            Request::TriggerVideoScan { tab_id } => match &self.page {
                Some(page) => Response::Videos {
                    videos: self.candidates.trigger_video_scan(page.as_ref(), tab_id).await,
                },
                None => Response::failure("Page scanning is not available"),
            },
            Request::VideosDetected { tab_id, count } => {
                info!(tab_id, count, "page auto-detected videos");
                Response::ok()
            }
            Request::TabLoading { tab_id } | Request::TabRemoved { tab_id } => {
                match self.candidates.invalidate_tab(tab_id).await {
                    Ok(()) => Response::ok(),
                    Err(e) => {
                        warn!(tab_id, error = %e, "failed to invalidate tab candidates");
                        Response::failure(e.to_string())
                    }
                }
            }
            Request::NetworkRequest { tab_id, url } => {
                if let Err(e) = self.candidates.record_network_request(tab_id, &url).await {
                    warn!(tab_id, error = %e, "failed to record network candidate");
                }
                Response::ok()
            }
        }
    }

    /// Downloads a candidate.
    ///
    /// Directly downloadable URLs go to the download manager. Protected
    /// URLs, and direct URLs the manager refuses, go through the
    /// acquisition chain under a pending record that is finalized with the
    /// chain's outcome.
    pub async fn download_video(&self, video: DetectedVideo) -> DownloadResponse {
        let title = if video.title.trim().is_empty() {
            UNKNOWN_TITLE.to_string()
        } else {
            video.title.clone()
        };
        let meta = PendingMeta {
            filename: generate_filename(&video.title, &video.url, video.video_type, Utc::now()),
            title,
            source_url: video.url.clone(),
            duration_seconds: video.duration_seconds,
        };

        let classification = classify(&video.url);
        debug!(url = %video.url, kind = %classification.kind, downloadable = classification.downloadable, "candidate classified");
        if classification.downloadable {
            match self.tracker.start_direct(meta.clone()).await {
                Ok(download_id) => return DownloadResponse::started(download_id),
                Err(e) => {
                    warn!(url = %video.url, error = %e, "direct download failed; trying acquisition chain");
                }
            }
        }

        self.acquire(video, meta).await
    }

    async fn acquire(&self, video: DetectedVideo, meta: PendingMeta) -> DownloadResponse {
        let (record_id, cancel) = self.tracker.register_capture(meta).await;
        let ctx = AcquireContext {
            record_id: record_id.clone(),
            bus: Arc::clone(&self.bus),
            observer: Some(Arc::new(TrackerObserver {
                tracker: Arc::clone(&self.tracker),
                record_id: record_id.clone(),
            })),
            cancel,
        };

        match self.chain.acquire(&video, &ctx).await {
            Ok(Acquisition::Saved(artifact)) => {
                let completion = Completion {
                    filename: Some(artifact.filename.clone()),
                    bytes: Some(artifact.bytes),
                    degraded: artifact.degraded,
                };
                if let Err(e) = self.tracker.finalize(&record_id, Outcome::Completed(completion)).await {
                    warn!(download_id = %record_id, error = %e, "acquired artifact could not be recorded");
                }
                DownloadResponse {
                    filename: Some(artifact.filename),
                    degraded: artifact.degraded.is_some(),
                    ..DownloadResponse::started(record_id)
                }
            }
            Ok(Acquisition::Delegated { download_id }) => DownloadResponse::started(download_id),
            // The tracker already finalized or cleared the record.
            Err(e @ AcquireError::Canceled { .. }) => {
                DownloadResponse::failed(e.user_message(), video.url, Some(record_id))
            }
            Err(e) => {
                let message = e.user_message();
                match self.tracker.finalize(&record_id, Outcome::Error(message.clone())).await {
                    Ok(_) | Err(TrackerError::NotFound { .. }) => {}
                    Err(e) => debug!(download_id = %record_id, error = %e, "failed acquisition not recorded"),
                }
                DownloadResponse::failed(message, video.url, Some(record_id))
            }
        }
    }
}

fn ack<T>(result: Result<T, TrackerError>) -> Response {
    match result {
        Ok(_) => Response::ok(),
        Err(e) => Response::failure(e.user_message()),
    }
}
