//! HubClient tests against a wiremock Hub.

use std::time::{Duration, Instant};

use scanward_hub::{
    BackoffPolicy, CircuitBreakerConfig, CircuitState, HubApi, HubClient, HubClientConfig,
    HubError, HubPolicyStatus, HubScanOutcome, RetryPolicy,
};
use rstest::rstest;
use scanward_id::ImageSha;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHA: &str = "9a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9";

fn sha() -> ImageSha {
    ImageSha::parse(SHA).unwrap()
}

fn config(server: &MockServer) -> HubClientConfig {
    HubClientConfig {
        base_url: server.uri(),
        token: None,
        timeout: Duration::from_secs(2),
        breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(200),
        },
        retry: RetryPolicy::none(),
    }
}

#[tokio::test]
async fn test_version_probe_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/version"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": "2024.4.1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.token = Some("s3cret".to_string());
    let client = HubClient::new(cfg).unwrap();

    assert_eq!(client.version().await.unwrap(), "2024.4.1");
}

#[tokio::test]
async fn test_fetch_complete_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/scans/{SHA}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": "complete",
            "policyStatus": "notInViolation",
            "policyViolations": 0,
            "vulnerabilities": 7,
            "componentsUrl": "https://hub.example/components/1"
        })))
        .mount(&server)
        .await;

    let client = HubClient::new(config(&server)).unwrap();
    let outcome = client.fetch_scan_outcome(&sha()).await.unwrap();

    match outcome {
        HubScanOutcome::Complete(report) => {
            assert_eq!(report.policy_status, HubPolicyStatus::NotInViolation);
            assert_eq!(report.vulnerabilities, 7);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_scan_is_pending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/scans/{SHA}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = HubClient::new(config(&server)).unwrap();
    assert_eq!(
        client.fetch_scan_outcome(&sha()).await.unwrap(),
        HubScanOutcome::Pending
    );
}

#[tokio::test]
async fn test_start_and_finish_notifications() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/api/scans/{SHA}/start")))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/api/scans/{SHA}/finish")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HubClient::new(config(&server)).unwrap();
    client.start_scan_job(&sha()).await.unwrap();
    client.finish_scan_job(&sha()).await.unwrap();
}

#[rstest]
#[case::unavailable(503)]
#[case::throttled(429)]
#[tokio::test]
async fn test_transient_failures_are_retried(#[case] status: u16) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(status))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": "2024.4.1"
        })))
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.retry = RetryPolicy {
        max_retries: 2,
        backoff: BackoffPolicy {
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
            jitter: 0.0,
        },
    };
    let client = HubClient::new(cfg).unwrap();

    assert_eq!(client.version().await.unwrap(), "2024.4.1");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/api/scans/{SHA}/start")))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown project"))
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.retry.max_retries = 3;
    let client = HubClient::new(cfg).unwrap();

    let err = client.start_scan_job(&sha()).await.unwrap_err();
    assert_eq!(
        err,
        HubError::Status {
            status: 400,
            body: "unknown project".to_string()
        }
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(client.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_per_call_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "version": "slow" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = HubClient::new(config(&server)).unwrap();
    client.set_timeout(Duration::from_millis(50));

    assert!(matches!(
        client.version().await,
        Err(HubError::Timeout(d)) if d == Duration::from_millis(50)
    ));
}

#[tokio::test]
async fn test_breaker_fails_fast_then_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": "back"
        })))
        .mount(&server)
        .await;

    let client = HubClient::new(config(&server)).unwrap();

    for _ in 0..3 {
        assert!(matches!(
            client.version().await,
            Err(HubError::Status { status: 500, .. })
        ));
    }
    assert_eq!(client.circuit_state(), CircuitState::Open);

    let started = Instant::now();
    assert_eq!(client.version().await, Err(HubError::CircuitOpen));
    assert!(started.elapsed() < Duration::from_millis(10));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(client.version().await.unwrap(), "back");
    assert_eq!(client.circuit_state(), CircuitState::Closed);
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}
