//! Error classification for benchmark outcomes.
//!
//! Every failed attempt is reduced to one [`ErrorCause`], a closed set of
//! classifications used as the aggregation key in the final report. The
//! same underlying failure always maps to the same cause.

use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Why a single attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCause {
    /// Request or response exceeded the per-request timeout
    Timeout,

    /// The peer closed or reset the connection mid-exchange
    ConnectionClosed,

    /// No connection slot became free within the pool wait timeout
    PoolExhausted,

    /// Too many requests queued on a single connection
    PipelineOverflow,

    /// The target answered with a non-2xx status
    HttpStatus(u16),

    /// Nothing is listening on the target address
    ConnectionRefused,

    /// The target host name could not be resolved
    DnsFailure,

    /// The request was aborted before it completed
    Canceled,

    /// An internal deadline elapsed while the request was pending
    DeadlineExceeded,

    /// Anything not matched above
    Other,
}

impl ErrorCause {
    /// Classify an HTTP status code.
    ///
    /// Returns `None` for 2xx; every other status (including 1xx and 3xx,
    /// since redirects are not followed) is an error.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=299 => None,
            code => Some(ErrorCause::HttpStatus(code)),
        }
    }

    /// Classify a transport-level reqwest error.
    ///
    /// Checks reqwest's own flags first, then walks the source chain for
    /// I/O error kinds, then falls back to message patterns.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCause::Timeout;
        }
        if let Some(status) = error.status() {
            if let Some(cause) = Self::from_status_code(status.as_u16()) {
                return cause;
            }
        }

        let mut messages = error.to_string().to_lowercase();
        let mut source = error.source();
        while let Some(err) = source {
            if let Some(cause) = Self::from_source(err) {
                return cause;
            }
            messages.push_str(": ");
            messages.push_str(&err.to_string().to_lowercase());
            source = err.source();
        }

        Self::from_message(&messages)
    }

    fn from_source(err: &(dyn StdError + 'static)) -> Option<Self> {
        if err.is::<tokio::time::error::Elapsed>() {
            return Some(ErrorCause::DeadlineExceeded);
        }
        let io_err = err.downcast_ref::<io::Error>()?;
        match io_err.kind() {
            io::ErrorKind::ConnectionRefused => Some(ErrorCause::ConnectionRefused),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Some(ErrorCause::ConnectionClosed),
            io::ErrorKind::TimedOut => Some(ErrorCause::Timeout),
            _ => None,
        }
    }

    /// Classify from a lowercased error message chain.
    pub fn from_message(message: &str) -> Self {
        if message.contains("connection refused") {
            ErrorCause::ConnectionRefused
        } else if message.contains("dns error")
            || message.contains("failed to lookup address")
            || message.contains("no such host")
            || message.contains("name or service not known")
        {
            ErrorCause::DnsFailure
        } else if message.contains("connection closed")
            || message.contains("connection reset")
            || message.contains("incomplete message")
            || message.contains("broken pipe")
        {
            ErrorCause::ConnectionClosed
        } else if message.contains("timed out") || message.contains("timeout") {
            ErrorCause::Timeout
        } else if message.contains("canceled") || message.contains("cancelled") {
            ErrorCause::Canceled
        } else if message.contains("deadline") {
            ErrorCause::DeadlineExceeded
        } else if message.contains("pipeline") {
            ErrorCause::PipelineOverflow
        } else {
            ErrorCause::Other
        }
    }

    /// Human-readable aggregation key used in reports.
    pub fn key(&self) -> String {
        match self {
            ErrorCause::HttpStatus(code) => format!("HTTP {}", code),
            other => other.static_key().to_string(),
        }
    }

    fn static_key(&self) -> &'static str {
        match self {
            ErrorCause::Timeout => "Timeout Error",
            ErrorCause::ConnectionClosed => "Connection Closed",
            ErrorCause::PoolExhausted => "No Free Connections",
            ErrorCause::PipelineOverflow => "Pipeline Overflow",
            ErrorCause::HttpStatus(_) => "HTTP Status",
            ErrorCause::ConnectionRefused => "Connection Refused",
            ErrorCause::DnsFailure => "DNS Error",
            ErrorCause::Canceled => "Context Canceled",
            ErrorCause::DeadlineExceeded => "Context Deadline Exceeded",
            ErrorCause::Other => "Network Error",
        }
    }

    /// Get the Prometheus label for this cause.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCause::Timeout => "timeout",
            ErrorCause::ConnectionClosed => "connection_closed",
            ErrorCause::PoolExhausted => "pool_exhausted",
            ErrorCause::PipelineOverflow => "pipeline_overflow",
            ErrorCause::HttpStatus(code) if *code >= 500 => "http_5xx",
            ErrorCause::HttpStatus(code) if *code >= 400 => "http_4xx",
            ErrorCause::HttpStatus(_) => "http_other",
            ErrorCause::ConnectionRefused => "connection_refused",
            ErrorCause::DnsFailure => "dns_failure",
            ErrorCause::Canceled => "canceled",
            ErrorCause::DeadlineExceeded => "deadline_exceeded",
            ErrorCause::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::HttpStatus(code) => write!(f, "HTTP {}", code),
            other => f.write_str(other.static_key()),
        }
    }
}

/// Why a run ended, when that is worth reporting.
///
/// A run that used its whole duration without errors carries none.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TerminalError {
    #[error("benchmark stopped by user")]
    StoppedByUser,

    #[error("benchmark completed with {0} errors")]
    CompletedWithErrors(u64),

    #[error("benchmark finished with {0} errors (unknown reason for stop)")]
    FinishedWithErrors(u64),

    #[error("internal failure during benchmark: {0}")]
    Internal(String),
}
