//! Shared connection pool for a benchmark run.
//!
//! reqwest keeps its own internally synchronized pool of idle connections but
//! places no ceiling on how many connections are open at once. The
//! [`ConnectionPool`] adds that ceiling with a semaphore: every attempt holds
//! one permit for the duration of its request, so at most `max_connections`
//! requests are in flight against the target.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::debug;

use crate::client::{build_client, ClientConfig, ClientError};
use crate::errors::ErrorCause;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Hard cap on concurrently open connections
    pub max_connections: usize,

    /// Maximum idle connections to keep per host
    pub max_idle_per_host: usize,

    /// How long idle connections stay in the pool before cleanup
    pub idle_timeout: Duration,

    /// TCP keepalive duration
    pub tcp_keepalive: Option<Duration>,

    /// Per-request timeout covering send and full response
    pub request_timeout: Duration,

    /// Timeout for establishing a new connection
    pub connect_timeout: Duration,

    /// How long an attempt may wait for a free connection slot
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Pool sized for `connections` concurrent connections.
    pub fn for_connections(connections: usize) -> Self {
        Self::default().with_max_connections(connections)
    }

    /// Set the connection cap. Idle capacity follows it.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self.max_idle_per_host = self.max_connections;
        self
    }

    /// Set idle connection timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set TCP keepalive duration.
    pub fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Apply this configuration to a reqwest ClientBuilder.
    pub fn apply_to_builder(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout)
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout);

        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder
    }
}

/// The client shared by all workers of one run, plus its connection cap.
///
/// Cheap to clone; all clones share the same client and permits.
#[derive(Clone)]
pub struct ConnectionPool {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    max_connections: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Builds a fresh client for one run.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = build_client(config)?;
        Ok(Self::from_client(client, &config.pool))
    }

    /// Wraps an existing client with the cap from `pool`.
    pub fn from_client(client: reqwest::Client, pool: &PoolConfig) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(pool.max_connections)),
            max_connections: pool.max_connections,
            acquire_timeout: pool.acquire_timeout,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Number of requests currently holding a connection slot.
    pub fn in_flight(&self) -> usize {
        self.max_connections
            .saturating_sub(self.permits.available_permits())
    }

    /// Waits for a free connection slot.
    ///
    /// Fails with [`ErrorCause::PoolExhausted`] after the acquire timeout and
    /// with [`ErrorCause::Canceled`] once the pool has been closed.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ErrorCause> {
        match time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ErrorCause::Canceled),
            Err(_) => {
                debug!(
                    max_connections = self.max_connections,
                    wait_ms = self.acquire_timeout.as_millis() as u64,
                    "No free connection slot within acquire timeout"
                );
                Err(ErrorCause::PoolExhausted)
            }
        }
    }

    /// Rejects all pending and future acquisitions.
    pub fn close(&self) {
        self.permits.close();
    }
}
