//! Run lifecycle: start, stop, status and final report delivery.
//!
//! An [`Engine`] runs at most one benchmark at a time. Each `start` builds
//! a fresh connection pool, channels, workers and collector; nothing is
//! carried over from a previous run.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::client::{ClientConfig, ClientError};
use crate::collector::{channel_capacity, Collector, CollectorSettings};
use crate::config::{BenchmarkConfig, ConfigError};
use crate::connection_pool::ConnectionPool;
use crate::context::RunContext;
use crate::errors::TerminalError;
use crate::metrics;
use crate::report::{FinalReport, ProgressSnapshot};
use crate::worker::{OutcomeSink, RequestTemplate, Worker};

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Running,
    Stopping,
    Finished,
}

/// Why `start` refused to begin a run. No report is produced for these.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("a benchmark is already running")]
    AlreadyRunning,

    #[error("invalid URL: {0}")]
    InvalidUrl(ConfigError),

    #[error("invalid duration: {0}")]
    InvalidDuration(ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("start must be called from within a tokio runtime")]
    NoRuntime,
}

impl From<ConfigError> for StartError {
    fn from(err: ConfigError) -> Self {
        if err.is_url_error() {
            StartError::InvalidUrl(err)
        } else if err.is_duration_error() {
            StartError::InvalidDuration(err)
        } else {
            StartError::InvalidConfig(err)
        }
    }
}

/// Tunables that apply to every run of an engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Workers spawned per configured thread
    pub worker_multiplier: usize,
    pub collector: CollectorSettings,
    /// Client and pool settings; the pool's connection cap is taken from
    /// each run's config.
    pub client: ClientConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            worker_multiplier: 1,
            collector: CollectorSettings::default(),
            client: ClientConfig::default(),
        }
    }
}

impl EngineOptions {
    pub fn with_worker_multiplier(mut self, multiplier: usize) -> Self {
        self.worker_multiplier = multiplier.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.collector.progress_interval = interval;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.collector.sample_size = sample_size;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }
}

struct RunState {
    status: Status,
    ctx: Option<RunContext>,
    tracker: Option<TaskTracker>,
}

/// Benchmark engine. Clones share the same state.
#[derive(Clone)]
pub struct Engine {
    state: Arc<Mutex<RunState>>,
    options: EngineOptions,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(RunState {
                status: Status::Idle,
                ctx: None,
                tracker: None,
            })),
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        lock_state(&self.state)
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    fn is_active(&self) -> bool {
        matches!(self.status(), Status::Running | Status::Stopping)
    }

    /// Starts a run and returns once it is underway.
    ///
    /// Progress snapshots go to `progress` while the run lasts; the sender is
    /// dropped when the run ends. Exactly one report is sent on `result`.
    /// If this returns an error nothing was started and `result` is dropped.
    pub fn start(
        &self,
        config: BenchmarkConfig,
        progress: mpsc::Sender<ProgressSnapshot>,
        result: oneshot::Sender<FinalReport>,
    ) -> Result<(), StartError> {
        let runtime = Handle::try_current().map_err(|_| StartError::NoRuntime)?;

        if self.is_active() {
            return Err(StartError::AlreadyRunning);
        }

        config.validate()?;
        let url = config.parsed_url()?;
        let duration = config.parsed_duration()?;
        let method = config.parsed_method()?;

        let worker_count = config
            .threads
            .saturating_mul(self.options.worker_multiplier.max(1));
        let client_config = self.options.client.clone().with_pool(
            self.options
                .client
                .pool
                .clone()
                .with_max_connections(config.connections),
        );
        let pool = ConnectionPool::new(&client_config)?;
        let template = RequestTemplate::new(method, url, config.request_body());
        template.build(pool.client()).map_err(ClientError::from)?;

        // Building the client can be slow; another start may have won meanwhile.
        let mut state = self.lock();
        if matches!(state.status, Status::Running | Status::Stopping) {
            return Err(StartError::AlreadyRunning);
        }

        let ctx = RunContext::new(duration);
        let tracker = TaskTracker::new();

        let capacity = channel_capacity(worker_count, config.connections);
        let (success_tx, success_rx) = mpsc::channel(capacity);
        let (failure_tx, failure_rx) = mpsc::channel(capacity);
        let sink = OutcomeSink::new(success_tx, failure_tx);

        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            let worker = Worker::new(id, pool.clone(), template.clone(), sink.clone(), ctx.token());
            workers.spawn_on(tracker.track_future(worker.run()), &runtime);
        }
        drop(sink);

        let collector = Collector::new(
            config.clone(),
            ctx.clone(),
            success_rx,
            failure_rx,
            progress,
            workers,
            self.options.collector.clone(),
        );

        tracker.spawn_on(ctx.clone().enforce_deadline(), &runtime);

        let started = ctx.started();
        let collector_handle = tracker.spawn_on(collector.run(), &runtime);
        let shared = self.state.clone();
        let run_ctx = ctx.clone();
        let run_config = config.clone();
        tracker.spawn_on(
            async move {
                let report = await_report(collector_handle, run_config, started).await;

                run_ctx.cancel();
                pool.close();

                info!(
                    attempted = report.total_requests_sent,
                    completed = report.total_requests_completed,
                    errors = report.total_errors,
                    throughput = report.throughput,
                    "Benchmark finished"
                );

                lock_state(&shared).status = Status::Finished;

                if result.send(report).is_err() {
                    warn!("Result receiver dropped before the report was delivered");
                }
            },
            &runtime,
        );
        tracker.close();

        metrics::RUNS_TOTAL.inc();
        info!(
            url = %config.target_url,
            method = %config.method,
            workers = worker_count,
            connections = config.connections,
            duration = %config.duration,
            channel_capacity = capacity,
            "Benchmark started"
        );

        state.status = Status::Running;
        state.ctx = Some(ctx);
        state.tracker = Some(tracker);

        Ok(())
    }

    /// Requests a graceful stop. Has no effect unless a run is in progress;
    /// repeated calls are harmless.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.status != Status::Running {
            return;
        }
        if let Some(ctx) = &state.ctx {
            ctx.stop();
        }
        state.status = Status::Stopping;
        info!("Benchmark stop requested");
    }

    /// Waits until every task of the most recent run has exited.
    pub async fn wait(&self) {
        let tracker = self.lock().tracker.clone();
        if let Some(tracker) = tracker {
            tracker.wait().await;
        }
    }
}

fn lock_state(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Awaits the collector. A panic anywhere in it becomes an internal-error
/// report so the run still ends with exactly one report.
pub(crate) async fn await_report(
    handle: JoinHandle<FinalReport>,
    config: BenchmarkConfig,
    started: Instant,
) -> FinalReport {
    match handle.await {
        Ok(report) => report,
        Err(e) => {
            let description = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                "collector task was cancelled".to_string()
            };
            error!(error = %description, "Collector failed, reporting internal error");
            FinalReport::failed(config, started.elapsed(), TerminalError::Internal(description))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
