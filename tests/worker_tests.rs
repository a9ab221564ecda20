use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rust_wrk::client::ClientConfig;
use rust_wrk::connection_pool::{ConnectionPool, PoolConfig};
use rust_wrk::errors::ErrorCause;
use rust_wrk::worker::{OutcomeSink, RequestTemplate, Worker};

struct Harness {
    successes: mpsc::Receiver<Duration>,
    failures: mpsc::Receiver<ErrorCause>,
    published: u64,
}

/// Runs one worker against `url` for `run_for`, then cancels it.
async fn run_worker_for(url: &str, pool_config: PoolConfig, run_for: Duration) -> Harness {
    let (success_tx, successes) = mpsc::channel(10_000);
    let (failure_tx, failures) = mpsc::channel(10_000);
    let pool = ConnectionPool::new(&ClientConfig::default().with_pool(pool_config))
        .expect("client should build");
    let template = RequestTemplate::new(
        reqwest::Method::GET,
        reqwest::Url::parse(url).unwrap(),
        None,
    );
    let token = CancellationToken::new();

    let worker = Worker::new(
        0,
        pool,
        template,
        OutcomeSink::new(success_tx, failure_tx),
        token.clone(),
    );
    let handle = tokio::spawn(worker.run());

    tokio::time::sleep(run_for).await;
    token.cancel();
    let published = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should exit promptly after cancel")
        .expect("worker should not panic");

    Harness {
        successes,
        failures,
        published,
    }
}

fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn worker_records_successes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1..)
        .mount(&server)
        .await;

    let mut harness = run_worker_for(
        &format!("{}/health", server.uri()),
        PoolConfig::for_connections(1),
        Duration::from_millis(200),
    )
    .await;

    let successes = drain(&mut harness.successes);
    let failures = drain(&mut harness.failures);

    assert!(!successes.is_empty());
    assert!(failures.is_empty(), "unexpected failures: {:?}", failures);
    assert_eq!(successes.len() as u64, harness.published);
}

#[tokio::test]
async fn worker_reports_non_2xx_as_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut harness = run_worker_for(
        &format!("{}/missing", server.uri()),
        PoolConfig::for_connections(1),
        Duration::from_millis(200),
    )
    .await;

    let failures = drain(&mut harness.failures);
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|c| *c == ErrorCause::HttpStatus(404)));
    assert!(drain(&mut harness.successes).is_empty());
}

#[tokio::test]
async fn worker_reports_redirect_without_following() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut harness = run_worker_for(
        &format!("{}/old", server.uri()),
        PoolConfig::for_connections(1),
        Duration::from_millis(150),
    )
    .await;

    let failures = drain(&mut harness.failures);
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|c| *c == ErrorCause::HttpStatus(302)));
}

#[tokio::test]
async fn worker_classifies_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let pool = PoolConfig::for_connections(1).with_request_timeout(Duration::from_millis(50));
    let mut harness = run_worker_for(&server.uri(), pool, Duration::from_millis(300)).await;

    let failures = drain(&mut harness.failures);
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|c| *c == ErrorCause::Timeout), "{:?}", failures);
}

#[tokio::test]
async fn in_flight_request_is_reported_after_cancel() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let mut harness = run_worker_for(
        &server.uri(),
        PoolConfig::for_connections(1),
        Duration::from_millis(100),
    )
    .await;

    let successes = drain(&mut harness.successes);
    assert_eq!(harness.published, 1);
    assert_eq!(successes.len(), 1);
    assert!(successes[0] >= Duration::from_millis(300));
    assert!(drain(&mut harness.failures).is_empty());

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1, "no new request may start after cancel");
}
