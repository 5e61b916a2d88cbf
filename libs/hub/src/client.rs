//! Hub API client.
//!
//! Provides methods for talking to the Hub:
//! - Announcing the start and finish of scan jobs
//! - Probing the Hub version
//! - Fetching the analysis outcome for an image

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scanward_id::ImageSha;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::retry::RetryPolicy;
use crate::types::{HubScanOutcome, VersionResponse};
use crate::HubError;

/// Operations the rest of the system needs from the Hub.
#[async_trait]
pub trait HubApi: Send + Sync + 'static {
    /// Probe the Hub version.
    async fn version(&self) -> Result<String, HubError>;

    /// Tell the Hub a scan job for `sha` has been handed to a worker.
    async fn start_scan_job(&self, sha: &ImageSha) -> Result<(), HubError>;

    /// Tell the Hub the worker has uploaded its scan for `sha`.
    async fn finish_scan_job(&self, sha: &ImageSha) -> Result<(), HubError>;

    /// Ask the Hub how analysis of `sha` is going.
    async fn fetch_scan_outcome(&self, sha: &ImageSha) -> Result<HubScanOutcome, HubError>;

    /// Change the per-call timeout.
    fn set_timeout(&self, timeout: Duration);

    /// Current breaker state.
    fn circuit_state(&self) -> CircuitState;
}

/// Issue a single-shot outcome query on its own task.
///
/// The answer arrives on the returned receiver exactly once; the caller is
/// never blocked beyond spawning the task.
pub fn spawn_scan_outcome(
    hub: Arc<dyn HubApi>,
    sha: ImageSha,
) -> oneshot::Receiver<Result<HubScanOutcome, HubError>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = hub.fetch_scan_outcome(&sha).await;
        let _ = tx.send(result);
    });
    rx
}

/// Connection settings for [`HubClient`].
#[derive(Debug, Clone)]
pub struct HubClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
}

impl HubClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(20),
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// reqwest-backed Hub client.
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout_ms: AtomicU64,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl HubClient {
    pub fn new(config: HubClientConfig) -> Result<Self, HubError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| HubError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            timeout_ms: AtomicU64::new(config.timeout.as_millis() as u64),
            breaker: CircuitBreaker::new(config.breaker),
            retry: config.retry,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Run one logical call with retry, breaker and per-call timeout.
    async fn execute<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, HubError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, HubError>>,
    {
        let mut attempt = 0;
        loop {
            let timeout = self.timeout();
            let result = self
                .breaker
                .call(async {
                    match tokio::time::timeout(timeout, call()).await {
                        Ok(result) => result,
                        Err(_) => Err(HubError::Timeout(timeout)),
                    }
                })
                .await;

            match result {
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.backoff.delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Hub call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn post_empty(&self, path: String) -> Result<(), HubError> {
        let response = self.request(reqwest::Method::POST, &path).send().await?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, HubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HubError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl HubApi for HubClient {
    async fn version(&self) -> Result<String, HubError> {
        self.execute("version", move || async move {
            let response = self
                .request(reqwest::Method::GET, "/api/version")
                .send()
                .await?;
            let body: VersionResponse = check_status(response).await?.json().await?;
            Ok(body.version)
        })
        .await
    }

    async fn start_scan_job(&self, sha: &ImageSha) -> Result<(), HubError> {
        debug!(sha = %sha, "Notifying hub of scan start");
        self.execute("start_scan_job", move || {
            self.post_empty(format!("/api/scans/{sha}/start"))
        })
        .await
    }

    async fn finish_scan_job(&self, sha: &ImageSha) -> Result<(), HubError> {
        debug!(sha = %sha, "Notifying hub of scan finish");
        self.execute("finish_scan_job", move || {
            self.post_empty(format!("/api/scans/{sha}/finish"))
        })
        .await
    }

    async fn fetch_scan_outcome(&self, sha: &ImageSha) -> Result<HubScanOutcome, HubError> {
        self.execute("fetch_scan_outcome", move || async move {
            let response = self
                .request(reqwest::Method::GET, &format!("/api/scans/{sha}"))
                .send()
                .await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(HubScanOutcome::Pending);
            }
            let outcome: HubScanOutcome = check_status(response).await?.json().await?;
            Ok(outcome)
        })
        .await
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }
}
