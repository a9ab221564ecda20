//! The single consumer of worker outcomes.
//!
//! The collector owns every statistic of a run. Workers only send outcomes
//! over two bounded channels; the collector counts them, publishes progress
//! snapshots on a fixed interval, and builds the final report once every
//! worker has exited and both channels are drained.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::BenchmarkConfig;
use crate::context::{CancelReason, RunContext};
use crate::errors::{ErrorCause, TerminalError};
use crate::metrics;
use crate::percentiles::{average, percentile, sort_latencies, LiveLatencyTracker};
use crate::report::{FinalReport, ProgressSnapshot};

/// How many recent latencies a progress snapshot carries by default.
pub const DEFAULT_SAMPLE_SIZE: usize = 1000;

const MIN_CHANNEL_CAPACITY: usize = 100;
const MAX_CHANNEL_CAPACITY: usize = 10_000;

/// Capacity of each outcome channel for a run.
///
/// Scales with the connection count, with extra headroom when workers
/// outnumber connections. Never below 100; capped at 10 000 unless the run
/// has at least 1000 workers.
pub fn channel_capacity(workers: usize, connections: usize) -> usize {
    let buffer_factor = if connections > 0 && workers > connections {
        ((workers / connections) * 2).max(2)
    } else if connections == 0 {
        workers.saturating_mul(2).max(2)
    } else {
        2
    };

    let capacity = connections
        .max(1)
        .saturating_mul(buffer_factor)
        .max(MIN_CHANNEL_CAPACITY);

    if capacity > MAX_CHANNEL_CAPACITY && workers < 1000 {
        MAX_CHANNEL_CAPACITY
    } else {
        capacity
    }
}

/// Maps how a run ended to the error its report carries, if any.
///
/// Workers lost to a panic take precedence over every other outcome.
pub fn terminal_error(
    reason: Option<CancelReason>,
    errors: u64,
    panicked_workers: u64,
) -> Option<TerminalError> {
    if panicked_workers > 0 {
        return Some(TerminalError::Internal(format!(
            "{} workers panicked",
            panicked_workers
        )));
    }

    match reason {
        Some(CancelReason::Stopped) => Some(TerminalError::StoppedByUser),
        Some(CancelReason::DeadlineExceeded) if errors > 0 => {
            Some(TerminalError::CompletedWithErrors(errors))
        }
        Some(CancelReason::DeadlineExceeded) => None,
        None if errors > 0 => Some(TerminalError::FinishedWithErrors(errors)),
        None => None,
    }
}

/// Running statistics for one run.
#[derive(Default)]
pub struct Tally {
    completed: u64,
    errors: u64,
    latencies: Vec<Duration>,
    live: LiveLatencyTracker,
    error_details: BTreeMap<String, u64>,
}

impl Tally {
    pub fn record_success(&mut self, latency: Duration) {
        self.completed += 1;
        self.latencies.push(latency);
        self.live.record(latency);
    }

    pub fn record_failure(&mut self, cause: ErrorCause) {
        self.errors += 1;
        *self.error_details.entry(cause.key()).or_insert(0) += 1;
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn attempted(&self) -> u64 {
        self.completed + self.errors
    }

    /// Cumulative view since `started`.
    ///
    /// Throughput stays zero for the first 10ms to avoid a meaningless
    /// spike.
    pub fn snapshot(&self, started: Instant, sample_size: usize) -> ProgressSnapshot {
        let now = Instant::now();
        let elapsed = now.duration_since(started);

        let current_throughput = if elapsed > Duration::from_millis(10) {
            self.completed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let skip = self.latencies.len().saturating_sub(sample_size);
        let mut latency_sample = self.latencies[skip..].to_vec();
        sort_latencies(&mut latency_sample);

        ProgressSnapshot {
            timestamp: now.into_std(),
            elapsed,
            requests_attempted: self.attempted(),
            requests_completed: self.completed,
            errors: self.errors,
            current_throughput,
            current_error_rate: error_rate(self.errors, self.attempted()),
            latency_avg: self.live.mean(),
            latency_p95: self.live.value_at(95.0),
            latency_p99: self.live.value_at(99.0),
            latency_sample,
        }
    }

    /// Final aggregation. `elapsed` is floored to 1ms.
    pub fn into_report(
        self,
        config: BenchmarkConfig,
        elapsed: Duration,
        error: Option<TerminalError>,
    ) -> FinalReport {
        let total_duration = elapsed.max(Duration::from_millis(1));
        let attempted = self.attempted();

        let mut latencies = self.latencies;
        sort_latencies(&mut latencies);

        FinalReport {
            config,
            total_requests_sent: attempted,
            total_requests_completed: self.completed,
            total_errors: self.errors,
            total_duration,
            throughput: self.completed as f64 / total_duration.as_secs_f64(),
            error_rate: error_rate(self.errors, attempted),
            latency_avg: average(&latencies),
            latency_p50: percentile(&latencies, 50.0),
            latency_p95: percentile(&latencies, 95.0),
            latency_p99: percentile(&latencies, 99.0),
            latency_data: latencies,
            error_details: self.error_details,
            error,
        }
    }
}

fn error_rate(errors: u64, attempted: u64) -> f64 {
    if attempted == 0 {
        0.0
    } else {
        errors as f64 / attempted as f64 * 100.0
    }
}

/// Collector settings that do not come from the run's config.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub progress_interval: Duration,
    pub sample_size: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(1),
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

pub struct Collector {
    config: BenchmarkConfig,
    ctx: RunContext,
    successes: mpsc::Receiver<Duration>,
    failures: mpsc::Receiver<ErrorCause>,
    progress: mpsc::Sender<ProgressSnapshot>,
    workers: JoinSet<u64>,
    settings: CollectorSettings,
    tally: Tally,
    panicked_workers: u64,
}

impl Collector {
    pub fn new(
        config: BenchmarkConfig,
        ctx: RunContext,
        successes: mpsc::Receiver<Duration>,
        failures: mpsc::Receiver<ErrorCause>,
        progress: mpsc::Sender<ProgressSnapshot>,
        workers: JoinSet<u64>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            config,
            ctx,
            successes,
            failures,
            progress,
            workers,
            settings,
            tally: Tally::default(),
            panicked_workers: 0,
        }
    }

    /// Consumes outcomes until every worker has exited, then drains what is
    /// still buffered and builds the report.
    pub async fn run(mut self) -> FinalReport {
        let started = self.ctx.started();
        let period = self.settings.progress_interval.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(started + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let token = self.ctx.token();
        let mut cancelled = token.is_cancelled();
        metrics::ACTIVE_WORKERS.set(self.workers.len() as i64);

        info!(
            workers = self.workers.len(),
            interval_ms = period.as_millis() as u64,
            "Collector started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled(), if !cancelled => {
                    cancelled = true;
                    debug!(attempted = self.tally.attempted(), "Collector saw cancellation, waiting for workers");
                }
                Some(latency) = self.successes.recv() => self.on_success(latency),
                Some(cause) = self.failures.recv() => self.on_failure(cause),
                _ = ticker.tick(), if !cancelled => self.publish_progress(started),
                joined = self.workers.join_next() => match joined {
                    None => break,
                    Some(Ok(published)) => {
                        debug!(published, "Worker exited");
                        metrics::ACTIVE_WORKERS.set(self.workers.len() as i64);
                    }
                    Some(Err(e)) => {
                        if e.is_panic() {
                            self.panicked_workers += 1;
                            error!(error = %e, "Worker panicked");
                        } else {
                            warn!(error = %e, "Worker was aborted");
                        }
                        metrics::ACTIVE_WORKERS.set(self.workers.len() as i64);
                    }
                },
            }
        }

        metrics::ACTIVE_WORKERS.set(0);
        self.drain();

        let elapsed = started.elapsed();
        let error = terminal_error(
            self.ctx.reason(),
            self.tally.errors(),
            self.panicked_workers,
        );

        info!(
            attempted = self.tally.attempted(),
            completed = self.tally.completed(),
            errors = self.tally.errors(),
            panicked_workers = self.panicked_workers,
            elapsed_ms = elapsed.as_millis() as u64,
            "Collector finished"
        );

        self.tally.into_report(self.config, elapsed, error)
    }

    fn on_success(&mut self, latency: Duration) {
        self.tally.record_success(latency);
        metrics::record_success(latency);
    }

    fn on_failure(&mut self, cause: ErrorCause) {
        self.tally.record_failure(cause);
        metrics::record_failure(cause);
    }

    /// Takes everything still buffered once no more outcomes can arrive.
    fn drain(&mut self) {
        self.successes.close();
        self.failures.close();

        let mut drained = 0u64;
        while let Ok(latency) = self.successes.try_recv() {
            self.on_success(latency);
            drained += 1;
        }
        while let Ok(cause) = self.failures.try_recv() {
            self.on_failure(cause);
            drained += 1;
        }

        if drained > 0 {
            debug!(drained, "Drained buffered outcomes");
        }
    }

    /// Never blocks; a full progress channel drops the snapshot.
    fn publish_progress(&self, started: Instant) {
        let snapshot = self.tally.snapshot(started, self.settings.sample_size);
        match self.progress.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Progress consumer is behind, snapshot dropped"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BenchmarkConfig {
        BenchmarkConfig::new("http://localhost:8080", 1, 1, "1s")
    }

    #[test]
    fn test_channel_capacity_bounds() {
        assert_eq!(channel_capacity(1, 1), 100);
        assert_eq!(channel_capacity(10, 10), 100);
        assert_eq!(channel_capacity(100, 500), 1000);
        assert_eq!(channel_capacity(800, 8000), 10_000);
        assert_eq!(channel_capacity(2000, 8000), 16_000);
        assert_eq!(channel_capacity(400, 100), 800);
        assert!(channel_capacity(0, 0) > 0);
    }

    #[test]
    fn test_terminal_error_mapping() {
        assert_eq!(
            terminal_error(Some(CancelReason::Stopped), 0, 0),
            Some(TerminalError::StoppedByUser)
        );
        assert_eq!(
            terminal_error(Some(CancelReason::Stopped), 4, 0),
            Some(TerminalError::StoppedByUser)
        );
        assert_eq!(terminal_error(Some(CancelReason::DeadlineExceeded), 0, 0), None);
        assert_eq!(
            terminal_error(Some(CancelReason::DeadlineExceeded), 3, 0),
            Some(TerminalError::CompletedWithErrors(3))
        );
        assert_eq!(
            terminal_error(None, 2, 0),
            Some(TerminalError::FinishedWithErrors(2))
        );
        assert_eq!(terminal_error(None, 0, 0), None);
    }

    #[test]
    fn test_panicked_workers_override_other_outcomes() {
        let expected = Some(TerminalError::Internal("2 workers panicked".to_string()));
        assert_eq!(terminal_error(Some(CancelReason::Stopped), 0, 2), expected);
        assert_eq!(terminal_error(Some(CancelReason::DeadlineExceeded), 5, 2), expected);
        assert_eq!(terminal_error(None, 0, 2), expected);
    }

    #[test]
    fn test_tally_report() {
        let mut tally = Tally::default();
        for ms in [10, 20, 30, 40] {
            tally.record_success(Duration::from_millis(ms));
        }
        tally.record_failure(ErrorCause::HttpStatus(500));

        let report = tally.into_report(config(), Duration::from_secs(2), None);
        assert_eq!(report.total_requests_sent, 5);
        assert_eq!(report.total_requests_completed, 4);
        assert_eq!(report.total_errors, 1);
        assert!((report.throughput - 2.0).abs() < 1e-9);
        assert!((report.error_rate - 20.0).abs() < 1e-9);
        assert_eq!(report.latency_p50, Duration::from_millis(20));
        assert_eq!(report.latency_avg, Duration::from_millis(25));
        assert_eq!(report.error_details.get("HTTP 500"), Some(&1));
    }

    #[test]
    fn test_report_floors_duration() {
        let report = Tally::default().into_report(config(), Duration::ZERO, None);
        assert_eq!(report.total_duration, Duration::from_millis(1));
        assert_eq!(report.throughput, 0.0);
        assert_eq!(report.error_rate, 0.0);
        assert_eq!(report.latency_p99, Duration::ZERO);
    }

    #[test]
    fn test_snapshot_sample_is_recent_and_sorted() {
        let mut tally = Tally::default();
        for ms in (1..=20).rev() {
            tally.record_success(Duration::from_millis(ms));
        }

        let snapshot = tally.snapshot(Instant::now(), 5);
        assert_eq!(snapshot.requests_completed, 20);
        assert_eq!(
            snapshot.latency_sample,
            (1..=5).map(Duration::from_millis).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_buffered_outcomes_are_drained_after_cancel() {
        let (stx, srx) = mpsc::channel(200);
        let (ftx, frx) = mpsc::channel(200);
        let (ptx, _prx) = mpsc::channel(4);

        for _ in 0..70 {
            stx.send(Duration::from_millis(1)).await.unwrap();
        }
        for _ in 0..30 {
            ftx.send(ErrorCause::Timeout).await.unwrap();
        }

        let ctx = RunContext::new(Duration::from_secs(60));
        ctx.stop();

        let collector = Collector::new(
            config(),
            ctx,
            srx,
            frx,
            ptx,
            JoinSet::new(),
            CollectorSettings::default(),
        );
        let report = collector.run().await;

        assert_eq!(report.total_requests_completed, 70);
        assert_eq!(report.total_errors, 30);
        assert_eq!(report.total_requests_sent, 100);
        assert_eq!(report.error_details.get("Timeout Error"), Some(&30));
        assert_eq!(report.error, Some(TerminalError::StoppedByUser));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_published_on_interval() {
        let (stx, srx) = mpsc::channel(10);
        let (_ftx, frx) = mpsc::channel(10);
        let (ptx, mut prx) = mpsc::channel(4);

        let ctx = RunContext::new(Duration::from_secs(60));
        let mut workers = JoinSet::new();
        let worker_token = ctx.token();
        workers.spawn(async move {
            stx.send(Duration::from_millis(5)).await.ok();
            worker_token.cancelled().await;
            1u64
        });

        let collector = Collector::new(
            config(),
            ctx.clone(),
            srx,
            frx,
            ptx,
            workers,
            CollectorSettings {
                progress_interval: Duration::from_millis(100),
                sample_size: 10,
            },
        );
        let handle = tokio::spawn(collector.run());

        let snapshot = prx.recv().await.unwrap();
        assert_eq!(snapshot.requests_completed, 1);
        assert_eq!(snapshot.latency_sample, vec![Duration::from_millis(5)]);

        ctx.stop();
        let report = handle.await.unwrap();
        assert_eq!(report.total_requests_completed, 1);
    }

    #[tokio::test]
    async fn test_worker_panic_is_reported_as_internal_error() {
        let (stx, srx) = mpsc::channel(10);
        let (ftx, frx) = mpsc::channel(10);
        let (ptx, _prx) = mpsc::channel(4);

        let mut workers = JoinSet::new();
        let success_tx = stx.clone();
        workers.spawn(async move {
            success_tx.send(Duration::from_millis(2)).await.ok();
            1u64
        });
        workers.spawn(async {
            if true {
                panic!("worker exploded");
            }
            0u64
        });
        drop(stx);
        drop(ftx);

        let collector = Collector::new(
            config(),
            RunContext::new(Duration::from_secs(60)),
            srx,
            frx,
            ptx,
            workers,
            CollectorSettings::default(),
        );
        let report = collector.run().await;

        assert_eq!(report.total_requests_completed, 1);
        assert_eq!(report.total_errors, 0);
        assert_eq!(
            report.error,
            Some(TerminalError::Internal("1 workers panicked".to_string()))
        );
    }
}
