use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use tracing::{error, info};

use crate::errors::ErrorCause;

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        std::env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "rust_wrk".to_string());

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of request attempts")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_ERRORS_BY_CAUSE: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_errors_total", "Failed request attempts by cause")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["cause"]
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "Latency of successful requests in seconds"
            )
            .namespace(METRIC_NAMESPACE.as_str())
            .buckets(prometheus::exponential_buckets(0.0005, 2.0, 16).unwrap())
        ).unwrap();

    pub static ref ACTIVE_WORKERS: IntGauge =
        IntGauge::with_opts(
            Opts::new("active_workers", "Workers of the current run still generating load")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref RUNS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("runs_total", "Benchmark runs started")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all benchmark metrics with `registry`.
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(REQUEST_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_ERRORS_BY_CAUSE.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(ACTIVE_WORKERS.clone()))?;
    registry.register(Box::new(RUNS_TOTAL.clone()))?;
    Ok(())
}

pub fn record_success(latency: Duration) {
    REQUEST_TOTAL.inc();
    REQUEST_DURATION_SECONDS.observe(latency.as_secs_f64());
}

pub fn record_failure(cause: ErrorCause) {
    REQUEST_TOTAL.inc();
    REQUEST_ERRORS_BY_CAUSE
        .with_label_values(&[cause.label()])
        .inc();
}

fn encode(registry: &Registry) -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

/// Serves the text exposition of `registry`.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Registry,
) -> Result<Response<Body>, hyper::Error> {
    let response = match encode(&registry) {
        Ok((buffer, content_type)) => {
            let mut response = Response::new(Body::from(buffer));
            if let Ok(value) = content_type.parse() {
                response
                    .headers_mut()
                    .insert(hyper::header::CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            let mut response = Response::new(Body::from("failed to encode metrics"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    };

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Registry) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry = registry.clone();
                async move { metrics_handler(req, registry).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(error = %e, port = port, "Failed to bind metrics server");
            return;
        }
    };
    info!(port = port, addr = %addr, "Metrics server listening");

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Registry) -> String {
    match encode(registry) {
        Ok((buffer, _)) => String::from_utf8(buffer).unwrap_or_else(|e| {
            error!(error = %e, "Metrics output is not valid UTF-8");
            String::from("# ERROR ENCODING METRICS TO UTF-8")
        }),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            String::from("# ERROR ENCODING METRICS")
        }
    }
}
