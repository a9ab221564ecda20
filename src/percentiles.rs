//! Latency statistics.
//!
//! Exact nearest-rank percentiles over complete sample sets, plus an HDR
//! histogram based tracker for cheap cumulative percentiles while a run is
//! still in progress.
//!
//! # Features
//! - Average with a wide (u128 nanosecond) accumulator
//! - Nearest-rank percentile selection (no interpolation)
//! - Stable ascending sort helper
//! - Cumulative live P95/P99 without re-sorting the full series every tick

use hdrhistogram::Histogram;
use std::time::Duration;
use tracing::warn;

/// Upper bound tracked by the live histogram: 60 seconds, in microseconds.
const LIVE_MAX_US: u64 = 60_000_000;

/// Average of the given samples, or zero when there are none.
pub fn average(samples: &[Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let total: u128 = samples.iter().map(|d| d.as_nanos()).sum();
    duration_from_nanos(total / samples.len() as u128)
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}

/// Nearest-rank percentile of an ascending-sorted slice.
///
/// `p <= 0` yields the minimum and `p >= 100` the maximum. Otherwise the
/// sample at `ceil(p / 100 * n) - 1` (clamped to the slice) is returned.
/// Returns zero for an empty slice.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let n = sorted.len();
    if n == 0 {
        return Duration::ZERO;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 100.0 {
        return sorted[n - 1];
    }

    let rank = ((p / 100.0) * n as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, n as i64 - 1) as usize;
    sorted[index]
}

/// Sorts latencies ascending in place. Stable, keeps duplicates.
pub fn sort_latencies(samples: &mut [Duration]) {
    samples.sort();
}

/// Cumulative latency tracker used for progress snapshots.
///
/// Keeps an exact running sum for the average and an HDR histogram
/// (1µs..60s, 3 significant digits) for percentiles.
pub struct LiveLatencyTracker {
    histogram: Histogram<u64>,
    count: u64,
    total_nanos: u128,
}

impl LiveLatencyTracker {
    pub fn new() -> Self {
        // Create histogram that can track 1μs to 60s with 3 significant digits
        let histogram =
            Histogram::new_with_bounds(1, LIVE_MAX_US, 3).expect("Failed to create histogram");
        Self {
            histogram,
            count: 0,
            total_nanos: 0,
        }
    }

    pub fn record(&mut self, latency: Duration) {
        self.count += 1;
        self.total_nanos += latency.as_nanos();

        let latency_us = u64::try_from(latency.as_micros()).unwrap_or(LIVE_MAX_US);
        let clamped = latency_us.clamp(1, LIVE_MAX_US);
        if let Err(e) = self.histogram.record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in live histogram"
            );
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Exact cumulative average.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        duration_from_nanos(self.total_nanos / self.count as u128)
    }

    /// Cumulative percentile, accurate to the histogram's precision.
    pub fn value_at(&self, p: f64) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let quantile = (p / 100.0).clamp(0.0, 1.0);
        Duration::from_micros(self.histogram.value_at_quantile(quantile))
    }
}

impl Default for LiveLatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}
