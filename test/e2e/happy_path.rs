//! End-to-end happy path test.
//!
//! Runs the perceptor HTTP server on a real socket against a stubbed Hub and
//! walks a single image through the whole pipeline:
//!
//! 1. Inventory producer reports a pod
//! 2. Scanner worker takes the job and reports success
//! 3. Reconciler picks up the Hub verdict
//! 4. Results and annotations reflect the verdict
//!
//! ## Running
//!
//! ```bash
//! cargo test -p scanward-e2e --test happy_path
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scanward_hub::{HubApi, HubClient};
use scanward_perceptor::{
    api, spawn_model_actor, AppState, Config, HubVersion, Model, Reconciler,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHA: &str = "9b2e54f1c0d7a3e8b6f4a2c1d0e9f8a7b6c5d4e3f2a1b0c9d8e7f6a5b4c3d2e1";

async fn stub_hub() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "version": "2024.4.1" })))
        .mount(&server)
        .await;

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

    Mock::given(method("GET"))
        .and(path(format!("/api/scans/{SHA}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "complete",
            "policyStatus": "inViolation",
            "policyViolations": 2,
            "vulnerabilities": 5,
            "componentsUrl": "https://hub.e2e/api/projects/7/versions/3/components"
        })))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn e2e_pod_inventory_to_scan_results() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scanward_perceptor=debug".into()),
        )
        .with_test_writer()
        .try_init();

    let hub_server = stub_hub().await;

    let vars = HashMap::from([
        ("SCANWARD_HUB_URL".to_string(), hub_server.uri()),
        ("SCANWARD_HUB_TIMEOUT_SECS".to_string(), "2".to_string()),
        ("SCANWARD_CONCURRENT_SCAN_LIMIT".to_string(), "1".to_string()),
    ]);
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();

    let hub: Arc<dyn HubApi> = Arc::new(HubClient::new(config.hub_config()).unwrap());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (model, processor_handle) = spawn_model_actor(
        Model::new(config.model_config()),
        config.mailbox_size,
        shutdown_rx.clone(),
    );

    let mut reconciler_config = config.reconciler_config();
    reconciler_config.hub_poll_interval = Duration::from_millis(100);
    let hub_version = HubVersion::default();
    let reconciler = Reconciler::new(model.clone(), Arc::clone(&hub), reconciler_config)
        .with_hub_version(hub_version.clone());
    let reconciler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { reconciler.run(shutdown_rx).await }
    });

    let app = api::create_router(AppState::new(model, hub, hub_version));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();

    // ===========================================================================
    // Step 1: Inventory
    // ===========================================================================
    let resp = client
        .put(format!("{base_url}/allpods"))
        .json(&json!([{
            "namespace": "payments",
            "name": "ledger-7c9f",
            "containers": [{
                "name": "ledger",
                "image": {
                    "name": "registry.e2e/ledger",
                    "sha": format!("sha256:{SHA}"),
                    "dockerImage": "registry.e2e/ledger:3.2"
                }
            }]
        }]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "PUT /allpods failed");

    // ===========================================================================
    // Step 2: Scanner worker
    // ===========================================================================
    let job: Value = client
        .get(format!("{base_url}/nextimage"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["image"]["sha"], SHA);
    assert_eq!(job["image"]["dockerImage"], "registry.e2e/ledger:3.2");

    let idle: Value = client
        .get(format!("{base_url}/nextimage"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(idle, json!({ "image": null }), "budget of one is in use");

    let finished: Value = client
        .post(format!("{base_url}/finishscan"))
        .json(&json!({ "sha": SHA, "success": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(finished["status"], "RunningScanClientAnalysis");

    // ===========================================================================
    // Step 3: Reconciler picks up the Hub verdict
    // ===========================================================================
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let results = loop {
        let results: Value = client
            .get(format!("{base_url}/scanresults"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if results["pods"].as_array().is_some_and(|pods| !pods.is_empty()) {
            break results;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "scan results never appeared: {results}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    // ===========================================================================
    // Step 4: Results and annotations
    // ===========================================================================
    assert_eq!(
        results["pods"],
        json!([{
            "Namespace": "payments",
            "Name": "ledger-7c9f",
            "PolicyViolations": 2,
            "Vulnerabilities": 5,
            "OverallStatus": "inViolation"
        }])
    );
    assert_eq!(results["images"][0]["Repository"], "registry.e2e/ledger");

    let annotations: Value = client
        .get(format!("{base_url}/scanresults/annotations"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        annotations["images"][0]["annotations"]["blackducksoftware.com/hub-scanner-version"],
        "2024.4.1"
    );
    assert_eq!(
        annotations["pods"][0]["labels"]["com.blackducksoftware.pod.overall-status"],
        "inViolation"
    );

    let ready = client.get(format!("{base_url}/readyz")).send().await.unwrap();
    assert_eq!(ready.status(), 200);

    // ===========================================================================
    // Shutdown
    // ===========================================================================
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), reconciler_handle)
        .await
        .expect("reconciler did not stop")
        .unwrap();
    server_handle.abort();
    tokio::time::timeout(Duration::from_secs(5), processor_handle)
        .await
        .expect("command processor did not stop")
        .unwrap();

    hub_server.verify().await;
}
