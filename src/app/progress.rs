//! Follows one download until it finishes, drawing a spinner line.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use video_downloader_core::bus::{Event, ProgressSnapshot};
use video_downloader_core::reconciler::{ProgressView, ViewEntry};
use video_downloader_core::tracker::DownloadTracker;

/// Watches `id` through bus events, with a poll of the tracker as fallback
/// for missed events. Ctrl-C cancels the download; the loop then runs until
/// the tracker reports the cancel, or stops at once if the cancel fails.
///
/// Returns the final entry, or `None` if the record disappeared.
pub(crate) async fn follow_download(
    tracker: &DownloadTracker,
    mut events: broadcast::Receiver<Event>,
    id: &str,
    poll_interval: Duration,
    show_spinner: bool,
) -> Option<ViewEntry> {
    let record = tracker.get(id).await?;
    if record.status.is_terminal() {
        return Some(ViewEntry::from_record(&record));
    }

    let spinner = if show_spinner {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    } else {
        ProgressBar::hidden()
    };

    let mut view = ProgressView::new();
    view.apply_poll(&[ProgressSnapshot::from(&record)]);
    let mut poll = tokio::time::interval(poll_interval);
    let mut cancel_requested = false;

    let outcome = loop {
        if let Some(entry) = view.get(id) {
            if entry.progress.status.is_terminal() {
                break Some(entry.clone());
            }
            spinner.set_message(entry.summary());
        }

        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    view.apply_event(&event);
                }
                Err(RecvError::Lagged(missed)) => debug!(missed, "progress listener lagged; next poll catches up"),
                Err(RecvError::Closed) => break tracker.get(id).await.map(|record| ViewEntry::from_record(&record)),
            },
            _ = poll.tick() => {
                view.apply_poll(&tracker.progress_snapshot().await);
                match tracker.get(id).await {
                    Some(record) if record.status.is_terminal() => break Some(ViewEntry::from_record(&record)),
                    Some(_) => {}
                    None => break None,
                }
            }
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                    continue;
                }
                spinner.set_message("canceling...");
                if let Err(e) = tracker.cancel(id).await {
                    warn!(download_id = %id, error = %e, "cancel failed");
                    break tracker.get(id).await.map(|record| ViewEntry::from_record(&record));
                }
            }
        }
    };

    spinner.finish_and_clear();
    outcome
}
