//! In-memory Hub for tests.
//!
//! Calls go through a real [`CircuitBreaker`], so fail-fast behaviour can be
//! observed through [`MockHub::network_calls`]: a call rejected by the breaker
//! never reaches the simulated network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scanward_id::ImageSha;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::client::HubApi;
use crate::types::HubScanOutcome;
use crate::HubError;

#[derive(Default)]
struct MockState {
    outcomes: HashMap<ImageSha, HubScanOutcome>,
    failure: Option<HubError>,
    started: Vec<ImageSha>,
    finished: Vec<ImageSha>,
}

/// Scriptable Hub double.
pub struct MockHub {
    state: Mutex<MockState>,
    breaker: CircuitBreaker,
    network_calls: AtomicU64,
    timeout_ms: AtomicU64,
    version: String,
}

impl Default for MockHub {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl MockHub {
    pub fn new(breaker: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            breaker: CircuitBreaker::new(breaker),
            network_calls: AtomicU64::new(0),
            timeout_ms: AtomicU64::new(20_000),
            version: "2024.1.0".to_string(),
        }
    }

    /// Script the outcome returned for `sha`. Unscripted digests are pending.
    pub fn set_outcome(&self, sha: ImageSha, outcome: HubScanOutcome) {
        self.state.lock().outcomes.insert(sha, outcome);
    }

    /// Make every call fail with `error` until [`MockHub::recover`].
    pub fn fail_with(&self, error: HubError) {
        self.state.lock().failure = Some(error);
    }

    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    /// Calls that got past the breaker.
    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::SeqCst)
    }

    pub fn started_jobs(&self) -> Vec<ImageSha> {
        self.state.lock().started.clone()
    }

    pub fn finished_jobs(&self) -> Vec<ImageSha> {
        self.state.lock().finished.clone()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    async fn simulate<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> Result<T, HubError> {
        self.breaker
            .call(async {
                self.network_calls.fetch_add(1, Ordering::SeqCst);
                let mut state = self.state.lock();
                match &state.failure {
                    Some(error) => Err(error.clone()),
                    None => Ok(f(&mut state)),
                }
            })
            .await
    }
}

#[async_trait]
impl HubApi for MockHub {
    async fn version(&self) -> Result<String, HubError> {
        let version = self.version.clone();
        self.simulate(|_| version).await
    }

    async fn start_scan_job(&self, sha: &ImageSha) -> Result<(), HubError> {
        self.simulate(|state| state.started.push(sha.clone())).await
    }

    async fn finish_scan_job(&self, sha: &ImageSha) -> Result<(), HubError> {
        self.simulate(|state| state.finished.push(sha.clone())).await
    }

    async fn fetch_scan_outcome(&self, sha: &ImageSha) -> Result<HubScanOutcome, HubError> {
        self.simulate(|state| {
            state
                .outcomes
                .get(sha)
                .cloned()
                .unwrap_or(HubScanOutcome::Pending)
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
