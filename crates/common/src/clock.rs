//! Wall-clock and elapsed-time helpers for export runs.

use std::time::Instant;

/// A stopwatch anchored to the moment a phase of work started.
///
/// ETA estimates are derived from [`ExportClock::elapsed_secs`]; the wall
/// time is kept for log lines and reports.
#[derive(Debug, Clone)]
pub struct ExportClock {
    /// The instant the clock started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl ExportClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the clock started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Format seconds as `m:ss` for progress displays.
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}
