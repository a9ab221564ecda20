//! Progress snapshots, the final report, and their text rendering.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use crate::config::BenchmarkConfig;
use crate::errors::TerminalError;
use crate::percentiles::sort_latencies;

/// Point-in-time view of a running benchmark.
///
/// Rates are cumulative since the run started, not a sliding window.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub timestamp: Instant,
    pub elapsed: Duration,
    pub requests_attempted: u64,
    pub requests_completed: u64,
    pub errors: u64,
    pub current_throughput: f64,
    pub current_error_rate: f64,
    pub latency_avg: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
    /// Most recent successful latencies, sorted ascending
    pub latency_sample: Vec<Duration>,
}

impl ProgressSnapshot {
    /// Format as a single status line.
    pub fn format(&self) -> String {
        format!(
            "[{:>6.1}s] attempted={} completed={} errors={} rps={:.2} err={:.2}% avg={} p95={} p99={}",
            self.elapsed.as_secs_f64(),
            self.requests_attempted,
            self.requests_completed,
            self.errors,
            self.current_throughput,
            self.current_error_rate,
            format_latency(self.latency_avg),
            format_latency(self.latency_p95),
            format_latency(self.latency_p99),
        )
    }
}

/// Aggregate results of one run. Produced exactly once per run.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub config: BenchmarkConfig,
    pub total_requests_sent: u64,
    pub total_requests_completed: u64,
    pub total_errors: u64,
    pub total_duration: Duration,
    pub throughput: f64,
    pub error_rate: f64,
    pub latency_avg: Duration,
    pub latency_p50: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
    /// Every successful latency, sorted ascending
    #[serde(skip)]
    pub latency_data: Vec<Duration>,
    /// Error key -> occurrences
    pub error_details: BTreeMap<String, u64>,
    pub error: Option<TerminalError>,
}

impl FinalReport {
    /// Best-effort report for a run whose statistics were lost.
    pub fn failed(config: BenchmarkConfig, total_duration: Duration, error: TerminalError) -> Self {
        Self {
            config,
            total_requests_sent: 0,
            total_requests_completed: 0,
            total_errors: 0,
            total_duration: total_duration.max(Duration::from_millis(1)),
            throughput: 0.0,
            error_rate: 0.0,
            latency_avg: Duration::ZERO,
            latency_p50: Duration::ZERO,
            latency_p95: Duration::ZERO,
            latency_p99: Duration::ZERO,
            latency_data: Vec::new(),
            error_details: BTreeMap::new(),
            error: Some(error),
        }
    }

    /// Format the full human-readable summary.
    pub fn format(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n## Benchmark Results\n");
        let _ = writeln!(out, "{:<22} {} {}", "Target:", self.config.method, self.config.target_url);
        let _ = writeln!(
            out,
            "{:<22} threads={} connections={} duration={}",
            "Config:", self.config.threads, self.config.connections, self.config.duration
        );
        let _ = writeln!(out, "{:<22} {:.3}s", "Total Duration:", self.total_duration.as_secs_f64());
        let _ = writeln!(out, "{:<22} {}", "Requests Attempted:", self.total_requests_sent);
        let _ = writeln!(out, "{:<22} {}", "Requests Completed:", self.total_requests_completed);
        let _ = writeln!(out, "{:<22} {}", "Errors:", self.total_errors);
        let _ = writeln!(out, "{:<22} {:.2} req/sec", "Throughput:", self.throughput);
        let _ = writeln!(out, "{:<22} {:.2} %", "Error Rate:", self.error_rate);
        let _ = writeln!(out, "{:<22} {}", "Latency Avg:", format_latency(self.latency_avg));
        let _ = writeln!(out, "{:<22} {}", "Latency P50:", format_latency(self.latency_p50));
        let _ = writeln!(out, "{:<22} {}", "Latency P95:", format_latency(self.latency_p95));
        let _ = writeln!(out, "{:<22} {}", "Latency P99:", format_latency(self.latency_p99));

        if !self.error_details.is_empty() {
            out.push_str(&format_error_table(&self.error_details));
        }

        if let Some(ref err) = self.error {
            let _ = writeln!(out, "\nNote: {}", err);
        }

        out
    }
}

/// Format error counts as a table, sorted by key.
pub fn format_error_table(error_details: &BTreeMap<String, u64>) -> String {
    let mut output = String::new();
    output.push_str("\n## Error Summary\n\n");
    output.push_str(&format!("{:<32} {:>10}\n", "Error", "Count"));
    output.push_str(&"-".repeat(43));
    output.push('\n');

    for (key, count) in error_details {
        output.push_str(&format!("{:<32} {:>10}\n", key, count));
    }

    output
}

/// Renders latencies to milliseconds with two decimals.
pub fn format_latency(latency: Duration) -> String {
    format!("{:.2}ms", latency.as_secs_f64() * 1000.0)
}

/// One bar of the latency distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyBucket {
    pub start: Duration,
    pub end: Duration,
    pub count: usize,
}

/// Splits `[min, max]` into `buckets` equal-width ranges and counts samples.
///
/// A zero-width range is widened by a few milliseconds on each side so the
/// single value still lands in a visible bucket. The last bucket includes
/// the maximum.
pub fn latency_distribution(data: &[Duration], buckets: usize) -> Vec<LatencyBucket> {
    if data.is_empty() || buckets == 0 {
        return Vec::new();
    }

    let mut sorted = data.to_vec();
    sort_latencies(&mut sorted);

    let mut min = sorted[0];
    let mut max = sorted[sorted.len() - 1];
    if max == min {
        let half = Duration::from_millis(buckets as u64 / 2);
        min = min.saturating_sub(half);
        max += half + Duration::from_millis(1);
    }

    let width = ((max - min) / buckets as u32).max(Duration::from_nanos(1));

    let mut result: Vec<LatencyBucket> = (0..buckets)
        .map(|i| {
            let start = min + width * i as u32;
            let end = if i == buckets - 1 {
                max + Duration::from_nanos(1)
            } else {
                start + width
            };
            LatencyBucket { start, end, count: 0 }
        })
        .collect();

    for d in &sorted {
        if let Some(bucket) = result.iter_mut().find(|b| *d >= b.start && *d < b.end) {
            bucket.count += 1;
        }
    }

    result
}

/// Render a latency histogram as text bars fitting `width` columns.
pub fn render_histogram(data: &[Duration], width: usize, buckets: usize) -> String {
    let distribution = latency_distribution(data, buckets);
    if distribution.is_empty() {
        return "No latency data.\n".to_string();
    }

    let max_count = distribution.iter().map(|b| b.count).max().unwrap_or(0);
    let bar_max = width.saturating_sub(24).max(1);

    let mut out = String::new();
    for bucket in &distribution {
        let bar_len = if max_count > 0 {
            (bucket.count as f64 / max_count as f64 * bar_max as f64) as usize
        } else {
            0
        };
        let _ = writeln!(
            out,
            "{:>5}-{:<5}ms [{:>6}] {}",
            bucket.start.as_millis(),
            bucket.end.as_millis(),
            bucket.count,
            "#".repeat(bar_len.min(bar_max))
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    fn sample_report() -> FinalReport {
        let mut details = BTreeMap::new();
        details.insert("HTTP 503".to_string(), 2);
        details.insert("Connection Refused".to_string(), 1);

        FinalReport {
            config: BenchmarkConfig::new("http://localhost:9/none", 5, 5, "200ms"),
            total_requests_sent: 10,
            total_requests_completed: 7,
            total_errors: 3,
            total_duration: Duration::from_millis(200),
            throughput: 35.0,
            error_rate: 30.0,
            latency_avg: Duration::from_millis(12),
            latency_p50: Duration::from_millis(10),
            latency_p95: Duration::from_millis(30),
            latency_p99: Duration::from_millis(31),
            latency_data: ms(&[5, 10, 31]),
            error_details: details,
            error: Some(TerminalError::CompletedWithErrors(3)),
        }
    }

    #[test]
    fn test_report_format() {
        let text = sample_report().format();
        assert!(text.contains("Requests Attempted:"));
        assert!(text.contains("35.00 req/sec"));
        assert!(text.contains("30.00 %"));
        assert!(text.contains("HTTP 503"));
        assert!(text.contains("benchmark completed with 3 errors"));
    }

    #[test]
    fn test_error_table_sorted_by_key() {
        let table = format_error_table(&sample_report().error_details);
        let refused = table.find("Connection Refused").unwrap();
        let http = table.find("HTTP 503").unwrap();
        assert!(refused < http);
    }

    #[test]
    fn test_failed_report_floors_duration() {
        let report = FinalReport::failed(
            BenchmarkConfig::new("http://x", 1, 1, "1s"),
            Duration::ZERO,
            TerminalError::Internal("boom".into()),
        );
        assert_eq!(report.total_duration, Duration::from_millis(1));
        assert_eq!(report.total_requests_sent, 0);
        assert!(report.error.is_some());
    }

    #[test]
    fn test_report_serializes_without_raw_latencies() {
        let json = serde_json::to_string(&sample_report()).unwrap();
        assert!(json.contains("\"total_errors\":3"));
        assert!(!json.contains("latency_data"));
    }

    #[test]
    fn test_distribution_counts_every_sample() {
        let data = ms(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let buckets = latency_distribution(&data, 4);
        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets.iter().map(|b| b.count).sum::<usize>(), 10);
        assert_eq!(buckets[3].count, 3);
    }

    #[test]
    fn test_distribution_single_value_is_widened() {
        let data = ms(&[50, 50, 50]);
        let buckets = latency_distribution(&data, 8);
        assert_eq!(buckets.len(), 8);
        assert_eq!(buckets[0].start, Duration::from_millis(46));
        assert_eq!(buckets.iter().map(|b| b.count).sum::<usize>(), 3);
    }

    #[test]
    fn test_distribution_empty() {
        assert!(latency_distribution(&[], 8).is_empty());
        assert!(latency_distribution(&ms(&[1]), 0).is_empty());
        assert!(render_histogram(&[], 80, 8).contains("No latency data"));
    }

    #[test]
    fn test_progress_format() {
        let snapshot = ProgressSnapshot {
            timestamp: Instant::now(),
            elapsed: Duration::from_millis(1500),
            requests_attempted: 12,
            requests_completed: 10,
            errors: 2,
            current_throughput: 6.67,
            current_error_rate: 16.67,
            latency_avg: Duration::from_millis(3),
            latency_p95: Duration::from_millis(5),
            latency_p99: Duration::from_millis(6),
            latency_sample: Vec::new(),
        };
        let line = snapshot.format();
        assert!(line.contains("attempted=12"));
        assert!(line.contains("avg=3.00ms"));
    }
}
