use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::connection_pool::PoolConfig;
use crate::utils::parse_headers_with_escapes;

/// Errors raised while building the HTTP client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid DNS override '{value}': {message}. Format: 'hostname:ip:port'")]
    InvalidResolve { value: String, message: String },

    #[error("invalid custom header '{header}': {message}")]
    InvalidHeader { header: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,
}

impl ClientConfig {
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Reads `SKIP_TLS_VERIFY`, `RESOLVE_TARGET_ADDR` and `CUSTOM_HEADERS`.
    pub fn from_env() -> Self {
        let skip_tls_verify = env::var("SKIP_TLS_VERIFY")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Self {
            pool: PoolConfig::default(),
            skip_tls_verify,
            resolve_target_addr: env::var("RESOLVE_TARGET_ADDR").ok().filter(|v| !v.is_empty()),
            custom_headers: env::var("CUSTOM_HEADERS").ok().filter(|v| !v.is_empty()),
        }
    }
}

/// Builds the reqwest client that backs a run's connection pool.
///
/// Redirects are never followed, so a 3xx is reported as such. Custom
/// headers are sent with every request.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
    let mut client_builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy();

    if let Some(ref resolve_str) = config.resolve_target_addr {
        if !resolve_str.is_empty() {
            let (hostname, socket_addr) = parse_dns_override(resolve_str)?;
            info!(
                hostname = %hostname,
                addr = %socket_addr,
                "Configured DNS override"
            );
            client_builder = client_builder.resolve(&hostname, socket_addr);
        }
    }

    let headers = parse_custom_headers(config.custom_headers.as_deref())?;
    if !headers.is_empty() {
        info!(count = headers.len(), "Configured custom default headers");
        client_builder = client_builder.default_headers(headers);
    }

    client_builder = config.pool.apply_to_builder(client_builder);

    let client = if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    Ok(client)
}

/// Parses `hostname:ip:port` into the host to override and its address.
pub fn parse_dns_override(resolve_str: &str) -> Result<(String, SocketAddr), ClientError> {
    let invalid = |message: String| ClientError::InvalidResolve {
        value: resolve_str.to_string(),
        message,
    };

    let parts: Vec<&str> = resolve_str.split(':').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(invalid("expected three ':'-separated parts".to_string()));
    }

    let (hostname, ip, port) = (parts[0], parts[1], parts[2]);
    if hostname.is_empty() || ip.is_empty() || port.is_empty() {
        return Err(invalid("hostname, IP and port must all be set".to_string()));
    }

    let port: u16 = port
        .parse()
        .map_err(|e| invalid(format!("port '{}': {}", port, e)))?;
    let socket_addr: SocketAddr = format!("{}:{}", ip, port)
        .parse()
        .map_err(|e| invalid(format!("address '{}:{}': {}", ip, port, e)))?;

    Ok((hostname.to_string(), socket_addr))
}

/// Parses `Name:Value` pairs separated by commas (`\,` escapes a comma).
pub fn parse_custom_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, ClientError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair in parse_headers_with_escapes(headers_str) {
        let header_pair = header_pair.trim();
        if header_pair.is_empty() {
            continue;
        }

        let invalid = |message: String| ClientError::InvalidHeader {
            header: header_pair.to_string(),
            message,
        };

        let (name_str, value_str) = header_pair
            .split_once(':')
            .ok_or_else(|| invalid("expected 'Name:Value'".to_string()))?;
        let name_str = name_str.trim();
        if name_str.is_empty() {
            return Err(invalid("header name cannot be empty".to_string()));
        }

        let header_name =
            HeaderName::from_str(name_str).map_err(|e| invalid(e.to_string()))?;
        let header_value =
            HeaderValue::from_str(value_str.trim()).map_err(|e| invalid(e.to_string()))?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
