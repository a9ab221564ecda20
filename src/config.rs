use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use tokio::time::Duration;

use crate::utils::parse_duration_string;

/// Methods that carry the configured payload as a JSON body.
const BODY_METHODS: [&str; 3] = ["POST", "PUT", "PATCH"];

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("target URL cannot be empty")]
    EmptyUrl,

    #[error("invalid target URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("target URL must use http or https scheme, got '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("threads must be greater than 0")]
    ZeroThreads,

    #[error("connections must be greater than 0")]
    ZeroConnections,

    #[error("duration cannot be empty")]
    EmptyDuration,

    #[error("invalid duration format '{value}': {message}")]
    InvalidDuration { value: String, message: String },

    #[error("duration must be positive, got '{0}'")]
    NonPositiveDuration(String),

    #[error("environment variable {name}: {message}")]
    Env { name: String, message: String },
}

impl ConfigError {
    /// True for errors about the target URL.
    pub fn is_url_error(&self) -> bool {
        matches!(
            self,
            ConfigError::EmptyUrl | ConfigError::InvalidUrl { .. } | ConfigError::UnsupportedScheme(_)
        )
    }

    /// True for errors about the run duration.
    pub fn is_duration_error(&self) -> bool {
        matches!(
            self,
            ConfigError::EmptyDuration
                | ConfigError::InvalidDuration { .. }
                | ConfigError::NonPositiveDuration(_)
        )
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// One benchmark run: what to hit, how hard, and for how long.
///
/// Serialized with the same keys used by saved test files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    #[serde(rename = "url")]
    pub target_url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    pub threads: usize,

    pub connections: usize,

    pub duration: String,
}

impl BenchmarkConfig {
    pub fn new(target_url: impl Into<String>, threads: usize, connections: usize, duration: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            method: default_method(),
            payload: None,
            threads,
            connections,
            duration: duration.into(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Checks every field. URL and duration problems are reported first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_url()?;
        self.parsed_duration()?;
        self.parsed_method()?;

        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }

        Ok(())
    }

    /// Parses the target URL, requiring an http or https scheme.
    pub fn parsed_url(&self) -> Result<reqwest::Url, ConfigError> {
        let raw = self.target_url.trim();
        if raw.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }

        let url = reqwest::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            url: raw.to_string(),
            message: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidUrl {
                url: raw.to_string(),
                message: "missing host".to_string(),
            });
        }

        Ok(url)
    }

    /// Parses the run duration, which must be strictly positive.
    pub fn parsed_duration(&self) -> Result<Duration, ConfigError> {
        if self.duration.trim().is_empty() {
            return Err(ConfigError::EmptyDuration);
        }

        let duration = parse_duration_string(&self.duration).map_err(|message| {
            ConfigError::InvalidDuration {
                value: self.duration.clone(),
                message,
            }
        })?;

        if duration.is_zero() {
            return Err(ConfigError::NonPositiveDuration(self.duration.clone()));
        }

        Ok(duration)
    }

    pub fn parsed_method(&self) -> Result<reqwest::Method, ConfigError> {
        let upper = self.method.trim().to_uppercase();
        if upper.is_empty() {
            return Ok(reqwest::Method::GET);
        }
        reqwest::Method::from_bytes(upper.as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(self.method.clone()))
    }

    /// The payload bytes to send, if this method carries a body and one is set.
    pub fn request_body(&self) -> Option<&str> {
        let upper = self.method.trim().to_uppercase();
        if !BODY_METHODS.contains(&upper.as_str()) {
            return None;
        }
        self.payload.as_deref().filter(|p| !p.is_empty())
    }

    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let target_url = env::var("TARGET_URL").map_err(|_| ConfigError::Env {
            name: "TARGET_URL".to_string(),
            message: "must be set".to_string(),
        })?;

        let method = env::var("REQUEST_TYPE").unwrap_or_else(|_| default_method());
        let payload = env::var("JSON_PAYLOAD").ok().filter(|p| !p.is_empty());

        let threads = parse_env_usize("NUM_CONCURRENT_TASKS", 10)?;
        let connections = parse_env_usize("NUM_CONNECTIONS", 10)?;
        let duration = env::var("TEST_DURATION").unwrap_or_else(|_| "10s".to_string());

        let config = BenchmarkConfig {
            target_url,
            method,
            payload,
            threads,
            connections,
            duration,
        };
        config.validate()?;

        Ok(config)
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("Starting benchmark:");
        println!("  Target URL: {}", self.target_url);
        println!("  Method: {}", self.method);
        println!("  Threads: {}", self.threads);
        println!("  Connections: {}", self.connections);
        println!("  Duration: {}", self.duration);
        match self.request_body() {
            Some(body) => println!("  Payload: {} bytes (application/json)", body.len()),
            None => println!("  Payload: none"),
        }
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Env {
            name: name.to_string(),
            message: format!("'{}' is not a valid number", raw),
        }),
        Err(_) => Ok(default),
    }
}
