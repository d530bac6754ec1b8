//! Progress math, display formatting, and transfer rate estimation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Progress percentage, capped at 100.
///
/// Stays pinned at 100 when more bytes arrive than the offer promised. An
/// empty transfer reports 100: there is nothing left to move.
pub fn percent(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (transferred as f64 / total as f64 * 100.0).min(100.0)
}

/// Formats a byte count the way the share dialogs display it.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

/// Default sliding window for [`RateEstimator`].
pub const RATE_WINDOW: Duration = Duration::from_secs(5);

const MAX_RATE_SAMPLES: usize = 256;

struct RateSample {
    at: Instant,
    total_bytes: u64,
}

/// Throughput over a sliding window of progress samples.
///
/// Feed it the session's cumulative transferred-byte counter as chunks
/// land. The estimate is the byte delta across the window endpoints, so a
/// stalled transfer decays to zero as old samples age out instead of
/// averaging over the whole run.
pub struct RateEstimator {
    window: Duration,
    samples: VecDeque<RateSample>,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self::with_window(RATE_WINDOW)
    }

    /// Uses `window` instead of [`RATE_WINDOW`].
    pub fn with_window(window: Duration) -> Self {
        RateEstimator {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Records the cumulative byte count at the current instant.
    ///
    /// A counter that moved backwards (a new run of the same estimator)
    /// clears the window; a delta across two runs would be meaningless.
    pub fn record(&mut self, total_bytes: u64) {
        self.record_at(Instant::now(), total_bytes);
    }

    fn record_at(&mut self, at: Instant, total_bytes: u64) {
        if self
            .samples
            .back()
            .is_some_and(|last| total_bytes < last.total_bytes)
        {
            self.samples.clear();
        }
        self.samples.push_back(RateSample { at, total_bytes });

        if let Some(cutoff) = at.checked_sub(self.window) {
            while self.samples.front().is_some_and(|front| front.at < cutoff) {
                self.samples.pop_front();
            }
        }
        while self.samples.len() > MAX_RATE_SAMPLES {
            self.samples.pop_front();
        }
    }

    /// Average bytes/second across the window, or 0.0 with fewer than two
    /// samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        (last.total_bytes - first.total_bytes) as f64 / elapsed.as_secs_f64()
    }

    /// Time left for `remaining_bytes` at the current rate, if there is one.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }

    /// Drops all samples.
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}
