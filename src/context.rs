//! Cancellation shared by every task of one run.
//!
//! A run ends either because someone asked it to stop or because its
//! deadline passed. Both paths cancel the same token; whichever happens
//! first is remembered as the reason.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Why the run's token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `stop` was requested
    Stopped,
    /// The configured run duration elapsed
    DeadlineExceeded,
}

#[derive(Clone)]
pub struct RunContext {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    started: Instant,
    deadline: Instant,
}

impl RunContext {
    /// A context whose deadline is `duration` from now.
    pub fn new(duration: Duration) -> Self {
        let started = Instant::now();
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
            started,
            deadline: started + duration,
        }
    }

    /// Token handed to workers and the collector.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Requests a graceful stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.cancel_with(CancelReason::Stopped);
    }

    /// Cancels without recording a reason, unless one is already set.
    ///
    /// Used for teardown after the run has already been accounted for.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    fn cancel_with(&self, reason: CancelReason) {
        if self.reason.set(reason).is_ok() {
            info!(reason = ?reason, "Run cancellation requested");
        }
        self.token.cancel();
    }

    /// The first reason the run was cancelled for, if any.
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Cancels the run when the deadline passes. Returns early if the run
    /// is cancelled some other way first.
    pub async fn enforce_deadline(self) {
        tokio::select! {
            _ = time::sleep_until(self.deadline) => {
                self.cancel_with(CancelReason::DeadlineExceeded);
            }
            _ = self.token.cancelled() => {}
        }
    }
}
