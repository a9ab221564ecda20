//! Environment-driven configuration for the binary.
//!
//! Every test mutates process environment variables, so all of them run
//! serially.

use serial_test::serial;
use std::env;
use std::path::PathBuf;

use rust_wrk::client::ClientConfig;
use rust_wrk::collections::default_config_dir;
use rust_wrk::config::{BenchmarkConfig, ConfigError};

fn clean_env() {
    for var in [
        "TARGET_URL",
        "REQUEST_TYPE",
        "JSON_PAYLOAD",
        "NUM_CONCURRENT_TASKS",
        "NUM_CONNECTIONS",
        "TEST_DURATION",
        "SKIP_TLS_VERIFY",
        "RESOLVE_TARGET_ADDR",
        "CUSTOM_HEADERS",
        "BENCH_CONFIG_DIR",
        "XDG_CONFIG_HOME",
    ] {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clean_env();
    env::set_var("TARGET_URL", "http://localhost:8080/health");

    let config = BenchmarkConfig::from_env().unwrap();
    assert_eq!(config.target_url, "http://localhost:8080/health");
    assert_eq!(config.method, "GET");
    assert_eq!(config.payload, None);
    assert_eq!(config.threads, 10);
    assert_eq!(config.connections, 10);
    assert_eq!(config.duration, "10s");

    clean_env();
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clean_env();
    env::set_var("TARGET_URL", "https://example.com/items");
    env::set_var("REQUEST_TYPE", "POST");
    env::set_var("JSON_PAYLOAD", r#"{"id":1}"#);
    env::set_var("NUM_CONCURRENT_TASKS", "32");
    env::set_var("NUM_CONNECTIONS", "64");
    env::set_var("TEST_DURATION", "1m30s");

    let config = BenchmarkConfig::from_env().unwrap();
    assert_eq!(config.method, "POST");
    assert_eq!(config.request_body(), Some(r#"{"id":1}"#));
    assert_eq!(config.threads, 32);
    assert_eq!(config.connections, 64);
    assert_eq!(config.parsed_duration().unwrap().as_secs(), 90);

    clean_env();
}

#[test]
#[serial]
fn test_from_env_requires_target_url() {
    clean_env();
    let err = BenchmarkConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Env { ref name, .. } if name == "TARGET_URL"));
}

#[test]
#[serial]
fn test_from_env_rejects_bad_numbers_and_values() {
    clean_env();
    env::set_var("TARGET_URL", "http://localhost:8080");
    env::set_var("NUM_CONNECTIONS", "many");
    assert!(matches!(
        BenchmarkConfig::from_env(),
        Err(ConfigError::Env { ref name, .. }) if name == "NUM_CONNECTIONS"
    ));

    env::remove_var("NUM_CONNECTIONS");
    env::set_var("NUM_CONCURRENT_TASKS", "0");
    assert_eq!(BenchmarkConfig::from_env(), Err(ConfigError::ZeroThreads));

    env::remove_var("NUM_CONCURRENT_TASKS");
    env::set_var("TEST_DURATION", "forever");
    assert!(BenchmarkConfig::from_env().unwrap_err().is_duration_error());

    clean_env();
}

#[test]
#[serial]
fn test_client_config_from_env() {
    clean_env();
    let config = ClientConfig::from_env();
    assert!(!config.skip_tls_verify);
    assert_eq!(config.resolve_target_addr, None);
    assert_eq!(config.custom_headers, None);

    env::set_var("SKIP_TLS_VERIFY", "TRUE");
    env::set_var("RESOLVE_TARGET_ADDR", "api.local:127.0.0.1:8080");
    env::set_var("CUSTOM_HEADERS", "X-Test:1");
    let config = ClientConfig::from_env();
    assert!(config.skip_tls_verify);
    assert_eq!(config.resolve_target_addr.as_deref(), Some("api.local:127.0.0.1:8080"));
    assert_eq!(config.custom_headers.as_deref(), Some("X-Test:1"));

    clean_env();
}

#[test]
#[serial]
fn test_config_dir_resolution() {
    clean_env();
    let original_home = env::var_os("HOME");

    env::set_var("BENCH_CONFIG_DIR", "/tmp/bench-configs");
    assert_eq!(default_config_dir(), PathBuf::from("/tmp/bench-configs"));

    env::remove_var("BENCH_CONFIG_DIR");
    env::set_var("XDG_CONFIG_HOME", "/tmp/xdg");
    assert_eq!(default_config_dir(), PathBuf::from("/tmp/xdg/rust_wrk"));

    env::remove_var("XDG_CONFIG_HOME");
    env::set_var("HOME", "/home/tester");
    assert_eq!(
        default_config_dir(),
        PathBuf::from("/home/tester/.config/rust_wrk")
    );

    match original_home {
        Some(home) => env::set_var("HOME", home),
        None => env::remove_var("HOME"),
    }
    clean_env();
}
