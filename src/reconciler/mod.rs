//! Client-side view of download progress.
//!
//! A [`ProgressView`] is fed from two sources: push events from the bus and
//! periodic polls of [`crate::tracker::DownloadTracker::progress_snapshot`].
//! Both go through the same merge, which is idempotent: applying an update
//! twice, or a poll that repeats what a push already delivered, leaves the
//! view unchanged. Samples older than what the view already shows are
//! dropped so the display never steps backwards.

mod format;

pub use format::{format_bytes, format_duration};

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use crate::bus::{Event, ProgressSnapshot};
use crate::record::{DownloadRecord, DownloadStatus};

/// Recommended interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One row of the view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewEntry {
    /// Latest progress.
    pub progress: ProgressSnapshot,
    /// True when pause is offered.
    pub pausable: bool,
    /// True for degraded completions (single frame instead of video).
    pub degraded: bool,
    /// Failure reason for errored entries.
    pub error: Option<String>,
    /// Original URL, kept for the manual copy fallback.
    pub source_url: Option<String>,
}

impl ViewEntry {
    fn from_snapshot(progress: ProgressSnapshot) -> Self {
        Self {
            progress,
            pausable: false,
            degraded: false,
            error: None,
            source_url: None,
        }
    }

    /// Builds an entry straight from a tracker record.
    #[must_use]
    pub fn from_record(record: &DownloadRecord) -> Self {
        Self {
            progress: ProgressSnapshot::from(record),
            pausable: record.pausable,
            degraded: record.degraded.is_some(),
            error: record.error.clone(),
            source_url: Some(record.source_url.clone()),
        }
    }

    /// One-line description: status, sizes, speed and time remaining.
    #[must_use]
    pub fn summary(&self) -> String {
        let p = &self.progress;
        let mut line = format!("[{}] {} {:.0}%", p.status, p.filename, p.progress);
        if p.total > 0 {
            let _ = write!(line, " {} / {}", format_bytes(p.downloaded), format_bytes(p.total));
        } else if p.downloaded > 0 {
            let _ = write!(line, " {}", format_bytes(p.downloaded));
        }
        if p.speed > 0 {
            let _ = write!(line, " {}/s", format_bytes(p.speed));
        }
        if p.time_remaining > 0 {
            let _ = write!(line, " {} left", format_duration(p.time_remaining));
        }
        if self.degraded {
            line.push_str(" (single frame only)");
        }
        if let Some(error) = &self.error {
            let _ = write!(line, " - {error}");
        }
        line
    }
}

/// Merged view of active and finished downloads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressView {
    active: BTreeMap<String, ViewEntry>,
    finished: BTreeMap<String, ViewEntry>,
}

impl ProgressView {
    /// Creates an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a push event. Returns true if the view changed.
    pub fn apply_event(&mut self, event: &Event) -> bool {
        match event {
            Event::DownloadStarted {
                id,
                title,
                filename,
                total,
                pausable,
                url,
                ..
            } => {
                if self.finished.contains_key(id) || self.active.contains_key(id) {
                    return false;
                }
                let mut entry = ViewEntry::from_snapshot(ProgressSnapshot {
                    id: id.clone(),
                    title: title.clone(),
                    filename: filename.clone(),
                    progress: 0.0,
                    downloaded: 0,
                    total: *total,
                    speed: 0,
                    time_remaining: 0,
                    status: DownloadStatus::Downloading,
                });
                entry.pausable = *pausable;
                entry.source_url = Some(url.clone());
                self.active.insert(id.clone(), entry);
                true
            }
            Event::DownloadUpdate(snapshot) => self.merge(snapshot),
            Event::DownloadCompleted { id, degraded } => self.finish(id, DownloadStatus::Completed, |entry| {
                entry.degraded = *degraded;
                entry.progress.progress = 100.0;
            }),
            Event::DownloadError { id, error, source_url } => self.finish(id, DownloadStatus::Error, |entry| {
                entry.error = Some(error.clone());
                entry.source_url = Some(source_url.clone());
            }),
            Event::StreamRecordingProgress { .. } | Event::VideosUpdated { .. } => false,
        }
    }

    /// Applies a poll result. Returns true if anything changed.
    ///
    /// Entries missing from the poll are kept; their terminal event may
    /// still be in flight.
    pub fn apply_poll(&mut self, snapshots: &[ProgressSnapshot]) -> bool {
        snapshots
            .iter()
            .fold(false, |changed, snapshot| self.merge(snapshot) || changed)
    }

    fn merge(&mut self, incoming: &ProgressSnapshot) -> bool {
        if self.finished.contains_key(&incoming.id) {
            return false;
        }
        if incoming.status.is_terminal() {
            let incoming = incoming.clone();
            return self.finish(&incoming.id, incoming.status, |entry| entry.progress = incoming.clone());
        }

        let Some(entry) = self.active.get_mut(&incoming.id) else {
            self.active
                .insert(incoming.id.clone(), ViewEntry::from_snapshot(incoming.clone()));
            return true;
        };
        let current = &entry.progress;
        if incoming.downloaded < current.downloaded {
            return false;
        }

        let mut next = incoming.clone();
        if next.total == 0 {
            next.total = current.total;
        }
        if next == *current {
            return false;
        }
        entry.progress = next;
        true
    }

    fn finish(&mut self, id: &str, status: DownloadStatus, update: impl FnOnce(&mut ViewEntry)) -> bool {
        if self.finished.contains_key(id) {
            return false;
        }
        let Some(mut entry) = self.active.remove(id) else {
            return false;
        };
        update(&mut entry);
        entry.progress.status = status;
        entry.progress.speed = 0;
        entry.progress.time_remaining = 0;
        self.finished.insert(id.to_string(), entry);
        true
    }

    /// Active entries, ordered by id.
    pub fn active(&self) -> impl Iterator<Item = &ViewEntry> {
        self.active.values()
    }

    /// Finished entries, ordered by id.
    pub fn finished(&self) -> impl Iterator<Item = &ViewEntry> {
        self.finished.values()
    }

    /// Looks up an entry in either list.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ViewEntry> {
        self.active.get(id).or_else(|| self.finished.get(id))
    }

    /// `(active, finished)` counts.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        (self.active.len(), self.finished.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn started(id: &str) -> Event {
        Event::DownloadStarted {
            id: id.to_string(),
            title: "Clip".to_string(),
            filename: "clip.mp4".to_string(),
            url: "https://cdn.example.com/clip.mp4".to_string(),
            total: 2_000_000,
            pausable: true,
            start_time: Utc::now(),
        }
    }

    fn snapshot(id: &str, downloaded: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            id: id.to_string(),
            title: "Clip".to_string(),
            filename: "clip.mp4".to_string(),
            progress: crate::record::percent_of(downloaded, 2_000_000),
            downloaded,
            total: 2_000_000,
            speed: 500_000,
            time_remaining: 2000,
            status: DownloadStatus::Downloading,
        }
    }

    // ==================== Merge ====================

    #[test]
    fn test_push_then_identical_poll_is_noop() {
        let mut view = ProgressView::new();
        view.apply_event(&started("1"));
        assert!(view.apply_event(&Event::DownloadUpdate(snapshot("1", 1_000_000))));
        let before = view.clone();

        assert!(!view.apply_poll(&[snapshot("1", 1_000_000)]));
        assert!(!view.apply_event(&Event::DownloadUpdate(snapshot("1", 1_000_000))));
        assert_eq!(view, before);
    }

    #[test]
    fn test_stale_poll_does_not_step_back() {
        let mut view = ProgressView::new();
        view.apply_event(&started("1"));
        view.apply_event(&Event::DownloadUpdate(snapshot("1", 1_500_000)));
        assert!(!view.apply_poll(&[snapshot("1", 1_000_000)]));
        assert_eq!(view.get("1").unwrap().progress.downloaded, 1_500_000);
    }

    #[test]
    fn test_poll_recovers_missed_start() {
        let mut view = ProgressView::new();
        assert!(view.apply_poll(&[snapshot("9", 10)]));
        assert_eq!(view.counts(), (1, 0));
    }

    #[test]
    fn test_unknown_total_keeps_previous() {
        let mut view = ProgressView::new();
        view.apply_event(&started("1"));
        let mut update = snapshot("1", 10);
        update.total = 0;
        view.apply_event(&Event::DownloadUpdate(update));
        assert_eq!(view.get("1").unwrap().progress.total, 2_000_000);
    }

    // ==================== Terminal events ====================

    #[test]
    fn test_completion_moves_to_finished_once() {
        let mut view = ProgressView::new();
        view.apply_event(&started("1"));
        let done = Event::DownloadCompleted {
            id: "1".to_string(),
            degraded: true,
        };
        assert!(view.apply_event(&done));
        assert!(!view.apply_event(&done));
        assert!(!view.apply_poll(&[snapshot("1", 5)]));

        let entry = view.get("1").unwrap();
        assert_eq!(entry.progress.status, DownloadStatus::Completed);
        assert!((entry.progress.progress - 100.0).abs() < f64::EPSILON);
        assert!(entry.summary().contains("single frame only"));
        assert_eq!(view.counts(), (0, 1));
    }

    #[test]
    fn test_error_keeps_source_url_for_copy_fallback() {
        let mut view = ProgressView::new();
        view.apply_event(&started("1"));
        view.apply_event(&Event::DownloadError {
            id: "1".to_string(),
            error: "Access denied - video may require authentication".to_string(),
            source_url: "https://cdn.example.com/clip.mp4".to_string(),
        });
        let entry = view.get("1").unwrap();
        assert_eq!(entry.source_url.as_deref(), Some("https://cdn.example.com/clip.mp4"));
        assert!(entry.summary().contains("Access denied"));
    }

    #[test]
    fn test_canceled_snapshot_finishes_entry() {
        let mut view = ProgressView::new();
        view.apply_event(&started("1"));
        let mut canceled = snapshot("1", 100);
        canceled.status = DownloadStatus::Canceled;
        assert!(view.apply_event(&Event::DownloadUpdate(canceled)));
        assert_eq!(view.get("1").unwrap().progress.status, DownloadStatus::Canceled);
        assert_eq!(view.counts(), (0, 1));
    }

    #[test]
    fn test_summary_formats_sizes() {
        let entry = ViewEntry::from_snapshot(snapshot("1", 1_000_000));
        let line = entry.summary();
        assert!(line.starts_with("[downloading] clip.mp4 50%"));
        assert!(line.contains("976.56 KB / 1.91 MB"));
        assert!(line.contains("2s left"));
    }

    #[test]
    fn test_entry_from_errored_record() {
        let mut record = crate::record::DownloadRecord::pending(
            "7",
            "Clip",
            "blob:https://site.example/abc",
            "clip.webm",
            Utc::now(),
        );
        record.status = DownloadStatus::Error;
        record.error = Some("All download methods failed".to_string());

        let entry = ViewEntry::from_record(&record);
        assert_eq!(entry.source_url.as_deref(), Some("blob:https://site.example/abc"));
        assert!(!entry.degraded);
        assert_eq!(entry.summary(), "[error] clip.webm 0% - All download methods failed");
    }
}
