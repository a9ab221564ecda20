use std::env;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rust_wrk::client::ClientConfig;
use rust_wrk::collections::{default_config_dir, load_test_collections, save_test_to_collection};
use rust_wrk::config::BenchmarkConfig;
use rust_wrk::engine::{Engine, EngineOptions};
use rust_wrk::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use rust_wrk::report::render_histogram;
use rust_wrk::utils::parse_duration_string;

const HISTOGRAM_WIDTH: usize = 80;
const HISTOGRAM_BUCKETS: usize = 10;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables (unless loading a saved test):");
    eprintln!("  TARGET_URL              - The URL to benchmark (http:// or https://)");
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  REQUEST_TYPE            - HTTP method (default: GET)");
    eprintln!("  JSON_PAYLOAD            - JSON body, sent for POST, PUT and PATCH");
    eprintln!("  NUM_CONCURRENT_TASKS    - Number of workers (default: 10, must be > 0)");
    eprintln!("  NUM_CONNECTIONS         - Maximum open connections (default: 10, must be > 0)");
    eprintln!("  TEST_DURATION           - Run duration: 500ms, 30s, 1m30s (default: 10s)");
    eprintln!("  WORKER_MULTIPLIER       - Workers spawned per task (default: 1)");
    eprintln!("  PROGRESS_INTERVAL       - Time between progress lines (default: 1s)");
    eprintln!("  REPORT_FORMAT           - text or json (default: text)");
    eprintln!();
    eprintln!("Saved tests:");
    eprintln!("  BENCH_COLLECTION        - Collection name");
    eprintln!("  BENCH_TEST              - Test name. Without TARGET_URL the saved test is run;");
    eprintln!("                            with TARGET_URL the env config is saved under this name first");
    eprintln!("  BENCH_CONFIG_DIR        - Collections directory (default: ~/.config/rust_wrk)");
    eprintln!();
    eprintln!("Client configuration:");
    eprintln!("  SKIP_TLS_VERIFY         - Accept invalid certificates: true or false (default: false)");
    eprintln!("  RESOLVE_TARGET_ADDR     - DNS override: hostname:ip:port");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated Name:Value pairs, '\\,' escapes a comma");
    eprintln!();
    eprintln!("Observability:");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: rust_wrk)");
    eprintln!("  RUST_LOG                - Log filter (default: rust_wrk=info)");
    eprintln!("  LOG_FORMAT              - text or json (default: text)");
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rust_wrk=info"));

    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Config from a saved test, or from the environment (optionally saving it).
fn load_config() -> Result<BenchmarkConfig, Box<dyn std::error::Error + Send + Sync>> {
    let collection = env::var("BENCH_COLLECTION").ok().filter(|v| !v.is_empty());
    let test = env::var("BENCH_TEST").ok().filter(|v| !v.is_empty());
    let has_target = env::var("TARGET_URL").is_ok();

    match (collection, test) {
        (Some(collection), Some(test)) if !has_target => {
            let dir = default_config_dir();
            let collections = load_test_collections(&dir)?;
            let saved = collections
                .iter()
                .find(|c| c.name == collection)
                .and_then(|c| c.find(&test))
                .ok_or_else(|| {
                    format!(
                        "test '{}' not found in collection '{}' under {}",
                        test,
                        collection,
                        dir.display()
                    )
                })?;
            info!(collection = %collection, test = %test, "Loaded saved test");
            Ok(saved.config.clone())
        }
        (Some(collection), Some(test)) => {
            let config = BenchmarkConfig::from_env()?;
            let path = save_test_to_collection(&default_config_dir(), &collection, &test, &config)?;
            info!(path = %path.display(), "Saved test config");
            Ok(config)
        }
        _ => Ok(BenchmarkConfig::from_env()?),
    }
}

fn engine_options_from_env() -> Result<EngineOptions, Box<dyn std::error::Error + Send + Sync>> {
    let mut options = EngineOptions::default().with_client(ClientConfig::from_env());

    if let Ok(raw) = env::var("WORKER_MULTIPLIER") {
        let multiplier: usize = raw
            .trim()
            .parse()
            .map_err(|_| format!("WORKER_MULTIPLIER: '{}' is not a valid number", raw))?;
        options = options.with_worker_multiplier(multiplier);
    }

    if let Ok(raw) = env::var("PROGRESS_INTERVAL") {
        let interval =
            parse_duration_string(&raw).map_err(|e| format!("PROGRESS_INTERVAL: {}", e))?;
        options = options.with_progress_interval(interval);
    }

    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let registry = prometheus::Registry::new();
    register_metrics(&registry).map_err(|e| format!("failed to register metrics: {}", e))?;

    let (config, options) = match load_config().and_then(|c| Ok((c, engine_options_from_env()?))) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    if let Ok(raw) = env::var("METRICS_PORT") {
        match raw.trim().parse::<u16>() {
            Ok(port) => {
                let registry = registry.clone();
                tokio::spawn(async move {
                    start_metrics_server(port, registry).await;
                });
            }
            Err(_) => warn!(value = %raw, "Ignoring invalid METRICS_PORT"),
        }
    }

    config.print_summary();

    let engine = Engine::with_options(options);
    let (progress_tx, mut progress_rx) = mpsc::channel(16);
    let (result_tx, result_rx) = oneshot::channel();
    engine.start(config, progress_tx, result_tx)?;

    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nInterrupted, stopping benchmark...");
                engine.stop();
            }
        });
    }

    while let Some(snapshot) = progress_rx.recv().await {
        println!("{}", snapshot.format());
    }

    let report = result_rx.await?;
    engine.wait().await;

    let json_report = env::var("REPORT_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.format());
        println!("## Latency Distribution\n");
        print!("{}", render_histogram(&report.latency_data, HISTOGRAM_WIDTH, HISTOGRAM_BUCKETS));

        if env::var("METRICS_PORT").is_ok() {
            println!("\n--- FINAL METRICS ---\n{}", gather_metrics_string(&registry));
            println!("--- END OF FINAL METRICS ---");
        }
    }

    Ok(())
}
