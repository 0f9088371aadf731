//! Run statistics and human-readable formatting

use std::fmt;
use std::time::{Duration, Instant};

use crate::progress::ProgressState;

/// Immutable summary of a finished run
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadStats {
    /// Planned task count
    pub total_requested: usize,
    /// Tasks that succeeded
    pub succeeded: usize,
    /// Tasks that failed
    pub failed: usize,
    /// Tasks that were cancelled
    pub cancelled: usize,
    /// Bytes written by successful tasks
    pub total_bytes: u64,
    /// Wall time from start to the completion barrier
    pub duration: Duration,
    /// `total_bytes / duration`, zero for an instantaneous run
    pub throughput_bps: f64,
}

impl DownloadStats {
    /// Snapshot the terminal state of a run
    pub fn from_state(state: &ProgressState, finished_at: Instant) -> Self {
        let snapshot = state.snapshot();
        let duration = finished_at.saturating_duration_since(state.started_at());
        let secs = duration.as_secs_f64();
        let throughput_bps = if secs > 0.0 {
            snapshot.bytes_downloaded as f64 / secs
        } else {
            0.0
        };

        Self {
            total_requested: snapshot.total,
            succeeded: snapshot.succeeded,
            failed: snapshot.failed,
            cancelled: snapshot.cancelled,
            total_bytes: snapshot.bytes_downloaded,
            duration,
            throughput_bps,
        }
    }

    /// Share of requested tasks that succeeded, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requested == 0 {
            0.0
        } else {
            self.succeeded as f64 * 100.0 / self.total_requested as f64
        }
    }
}

impl fmt::Display for DownloadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} succeeded ({:.1}%), {} failed, {} cancelled, {} in {} ({}/s)",
            self.succeeded,
            self.total_requested,
            self.success_rate(),
            self.failed,
            self.cancelled,
            format_size(self.total_bytes),
            format_duration(self.duration),
            format_size(self.throughput_bps as u64),
        )
    }
}

/// Format a byte count with one decimal, e.g. `1.5 MB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Format a duration with one decimal in seconds, minutes or hours
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}
