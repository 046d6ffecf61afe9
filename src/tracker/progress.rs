//! Derived progress metrics.
//!
//! Samples may arrive twice or out of order (the manager's change stream and
//! the poll loop race), so applying a sample is idempotent and never moves
//! `bytes_downloaded` backwards.

use chrono::{DateTime, Utc};

use crate::record::{DownloadRecord, percent_from_elapsed};

/// Whether a sample changed the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleEffect {
    Applied,
    Ignored,
}

/// Applies one `(bytes, total, at)` sample to `record`.
///
/// Speed is `Δbytes / Δt`, and is 0 when `Δt <= 0`, when no new bytes
/// arrived, or on the first sample. ETA is only set when the speed is
/// positive and the total is known and not yet reached.
pub(crate) fn apply_sample(
    record: &mut DownloadRecord,
    bytes: u64,
    total: u64,
    at: DateTime<Utc>,
) -> SampleEffect {
    if bytes < record.bytes_downloaded {
        return SampleEffect::Ignored;
    }
    let stale = record.last_sample_at.is_some_and(|last| at <= last);
    let total_changed = total > 0 && total != record.bytes_total;
    if stale && bytes == record.bytes_downloaded && !total_changed {
        return SampleEffect::Ignored;
    }

    let delta_bytes = bytes - record.bytes_downloaded;
    let delta_millis = record
        .last_sample_at
        .map_or(0, |last| (at - last).num_milliseconds());

    record.speed_bytes_per_sec = speed(delta_bytes, delta_millis);
    record.bytes_downloaded = bytes;
    if total > 0 {
        record.bytes_total = total;
    }
    record.eta_millis = eta(record.speed_bytes_per_sec, record.bytes_total, bytes);
    record.last_sample_at = Some(record.last_sample_at.map_or(at, |last| last.max(at)));
    record.refresh_percent();
    SampleEffect::Applied
}

/// Raises the stream-capture progress estimate from elapsed recording time.
///
/// Only used while the total size is unknown; never lowers the percentage.
pub(crate) fn apply_elapsed_estimate(record: &mut DownloadRecord, elapsed_secs: f64) {
    if record.bytes_total > 0 {
        return;
    }
    let estimate = percent_from_elapsed(elapsed_secs, record.duration_seconds);
    if estimate > record.progress_percent {
        record.progress_percent = estimate;
    }
}

fn speed(delta_bytes: u64, delta_millis: i64) -> u64 {
    if delta_bytes == 0 || delta_millis <= 0 {
        return 0;
    }
    let per_sec = u128::from(delta_bytes) * 1000 / u128::from(delta_millis.unsigned_abs());
    u64::try_from(per_sec).unwrap_or(u64::MAX)
}

fn eta(speed: u64, total: u64, downloaded: u64) -> u64 {
    if speed == 0 || total <= downloaded {
        return 0;
    }
    let millis = u128::from(total - downloaded) * 1000 / u128::from(speed);
    u64::try_from(millis).unwrap_or(u64::MAX)
}
