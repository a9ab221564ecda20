use bytes::Bytes;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection_pool::ConnectionPool;
use crate::errors::ErrorCause;

/// Result of one request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx response, fully read; latency measured from just before send
    Success(Duration),
    Failure(ErrorCause),
}

/// Sending halves of the collector's two outcome channels.
#[derive(Clone)]
pub struct OutcomeSink {
    successes: mpsc::Sender<Duration>,
    failures: mpsc::Sender<ErrorCause>,
}

impl OutcomeSink {
    pub fn new(successes: mpsc::Sender<Duration>, failures: mpsc::Sender<ErrorCause>) -> Self {
        Self {
            successes,
            failures,
        }
    }

    /// Publishes one outcome, waiting for channel space.
    ///
    /// The collector keeps receiving until every worker has exited, so this
    /// only fails once the collector is gone.
    pub async fn emit(&self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Success(latency) => self.successes.send(latency).await.is_ok(),
            Outcome::Failure(cause) => self.failures.send(cause).await.is_ok(),
        }
    }
}

/// The request every attempt of a run sends.
///
/// The payload becomes a JSON body only when one is given; it is shared
/// between attempts, not copied.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: reqwest::Method,
    url: reqwest::Url,
    body: Option<Bytes>,
}

impl RequestTemplate {
    pub fn new(method: reqwest::Method, url: reqwest::Url, body: Option<&str>) -> Self {
        Self {
            method,
            url,
            body: body.map(|b| Bytes::copy_from_slice(b.as_bytes())),
        }
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    pub fn build(&self, client: &reqwest::Client) -> reqwest::Result<reqwest::Request> {
        let mut builder = client.request(self.method.clone(), self.url.clone());
        if let Some(ref body) = self.body {
            builder = builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body.clone());
        }
        builder.build()
    }
}

/// A closed-loop load generator: send, wait for the full response, repeat.
pub struct Worker {
    id: usize,
    pool: ConnectionPool,
    template: RequestTemplate,
    sink: OutcomeSink,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        pool: ConnectionPool,
        template: RequestTemplate,
        sink: OutcomeSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            pool,
            template,
            sink,
            cancel,
        }
    }

    /// Runs until cancelled. Returns the number of outcomes published.
    ///
    /// No attempt starts after cancellation, but one already sent runs to
    /// completion (bounded by the request timeout) and is still reported.
    pub async fn run(self) -> u64 {
        debug!(worker_id = self.id, url = %self.template.url(), "Worker starting");

        let mut published = 0u64;
        while !self.cancel.is_cancelled() {
            let outcome = self.attempt().await;

            if self.is_shutdown_artifact(&outcome) {
                break;
            }

            if !self.sink.emit(outcome).await {
                break;
            }
            published += 1;
        }

        debug!(worker_id = self.id, published, "Worker stopped");
        published
    }

    /// Failures caused by the run itself shutting down are not the target's fault.
    fn is_shutdown_artifact(&self, outcome: &Outcome) -> bool {
        self.cancel.is_cancelled()
            && matches!(
                outcome,
                Outcome::Failure(ErrorCause::Canceled | ErrorCause::DeadlineExceeded)
            )
    }

    async fn attempt(&self) -> Outcome {
        // Waiting for a slot is not yet in flight, so cancellation ends it.
        let acquired = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Outcome::Failure(ErrorCause::Canceled),
            acquired = self.pool.acquire() => acquired,
        };
        let _permit = match acquired {
            Ok(permit) => permit,
            Err(cause) => return Outcome::Failure(cause),
        };

        let request = match self.template.build(self.pool.client()) {
            Ok(request) => request,
            Err(e) => return Outcome::Failure(ErrorCause::from_reqwest_error(&e)),
        };

        let start = Instant::now();
        let mut response = match self.pool.client().execute(request).await {
            Ok(response) => response,
            Err(e) => {
                let cause = ErrorCause::from_reqwest_error(&e);
                debug!(worker_id = self.id, error = %e, cause = %cause, "Request failed");
                return Outcome::Failure(cause);
            }
        };

        let status = response.status().as_u16();

        // Read the whole body so the connection can be reused.
        loop {
            match response.chunk().await {
                Ok(Some(_chunk)) => {}
                Ok(None) => break,
                Err(e) => {
                    let cause = ErrorCause::from_reqwest_error(&e);
                    debug!(worker_id = self.id, error = %e, cause = %cause, "Reading response body failed");
                    return Outcome::Failure(cause);
                }
            }
        }

        let latency = start.elapsed();
        trace!(worker_id = self.id, status_code = status, latency_us = latency.as_micros() as u64, "Request completed");

        match ErrorCause::from_status_code(status) {
            None => Outcome::Success(latency),
            Some(cause) => Outcome::Failure(cause),
        }
    }
}
