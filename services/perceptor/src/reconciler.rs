//! Reconciliation loop for converging model state with the Hub.
//!
//! The reconciler:
//! - Polls the Hub for images awaiting analysis and feeds outcomes back,
//!   refreshing the cached Hub version on the same tick
//! - Sweeps leases that outlived their phase timeout
//! - Garbage-collects images nothing references any more
//!
//! Every duty submits ordinary commands through the [`ModelHandle`]; the
//! reconciler has no other access to the model.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use scanward_hub::{spawn_scan_outcome, HubApi, HubError, HubScanOutcome};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::commands::{CommandError, ModelHandle};
use crate::model::SweepReport;
use crate::state::HubVersion;

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between Hub polls.
    pub hub_poll_interval: Duration,

    /// Interval between lease-timeout sweeps.
    pub timeout_sweep_interval: Duration,

    /// Interval between garbage collections.
    pub gc_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            hub_poll_interval: Duration::from_secs(20),
            timeout_sweep_interval: Duration::from_secs(60),
            gc_interval: Duration::from_secs(300),
        }
    }
}

/// Outcome counts of one Hub poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    /// Queries that got no answer: breaker open, timeout or Hub error.
    pub unavailable: usize,
}

pub struct Reconciler {
    model: ModelHandle,
    hub: Arc<dyn HubApi>,
    hub_version: HubVersion,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(model: ModelHandle, hub: Arc<dyn HubApi>, config: ReconcilerConfig) -> Self {
        Self {
            model,
            hub,
            hub_version: HubVersion::default(),
            config,
        }
    }

    /// Keep `hub_version` current on every Hub poll.
    pub fn with_hub_version(mut self, hub_version: HubVersion) -> Self {
        self.hub_version = hub_version;
        self
    }

    /// Run all duties until shutdown.
    ///
    /// The Hub poll runs apart from the sweep and garbage collection, so a
    /// slow Hub delays neither of them nor shutdown.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            hub_poll_interval_secs = self.config.hub_poll_interval.as_secs(),
            timeout_sweep_interval_secs = self.config.timeout_sweep_interval.as_secs(),
            gc_interval_secs = self.config.gc_interval.as_secs(),
            "Starting reconciliation loop"
        );

        tokio::join!(
            self.run_hub_poll(shutdown.clone()),
            self.run_upkeep(shutdown)
        );
        info!("Reconciler shut down");
    }

    async fn run_hub_poll(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.hub_poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            tokio::select! {
                (_, polled) = async {
                    tokio::join!(self.refresh_hub_version(), self.poll_hub())
                } => {
                    if let Err(e) = polled {
                        error!(error = %e, "Hub poll failed");
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Hub poll abandoned for shutdown");
                    break;
                }
            }
        }
    }

    async fn run_upkeep(&self, mut shutdown: watch::Receiver<bool>) {
        let mut sweep_interval = tokio::time::interval(self.config.timeout_sweep_interval);
        let mut gc_interval = tokio::time::interval(self.config.gc_interval);

        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Lease sweep failed");
                    }
                }
                _ = gc_interval.tick() => {
                    if let Err(e) = self.collect_garbage().await {
                        error!(error = %e, "Garbage collection failed");
                    }
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
    }

    /// Re-read the Hub version for annotations.
    pub async fn refresh_hub_version(&self) -> Option<String> {
        match self.hub_version.refresh(self.hub.as_ref()).await {
            Ok(version) => Some(version),
            Err(e) => {
                debug!(error = %e, "Hub version refresh failed");
                None
            }
        }
    }

    /// Fetch outcomes for every image awaiting Hub analysis.
    ///
    /// Queries run concurrently. A digest whose query gets no answer stays
    /// in analysis and is asked about again on the next pass.
    pub async fn poll_hub(&self) -> Result<PollReport, CommandError> {
        let shas = self.model.images_in_analysis().await?;
        let mut report = PollReport::default();
        if shas.is_empty() {
            return Ok(report);
        }

        let queries = shas
            .iter()
            .map(|sha| spawn_scan_outcome(Arc::clone(&self.hub), sha.clone()));
        let answers = join_all(queries).await;

        for (sha, answer) in shas.into_iter().zip(answers) {
            let outcome = match answer {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(sha = %sha, "Hub query task ended without an answer");
                    report.unavailable += 1;
                    continue;
                }
            };

            match outcome {
                Ok(HubScanOutcome::Complete(hub_report)) => {
                    match self.model.set_scan_results(sha.clone(), hub_report.into()).await {
                        Ok(_) => report.completed += 1,
                        Err(CommandError::Model(e)) => {
                            debug!(sha = %sha, error = %e, "Hub result no longer applicable");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(HubScanOutcome::Failed { message }) => {
                    match self.model.hub_scan_failed(sha.clone(), message).await {
                        Ok(_) => report.failed += 1,
                        Err(CommandError::Model(e)) => {
                            debug!(sha = %sha, error = %e, "Hub failure no longer applicable");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(HubScanOutcome::Pending) => report.pending += 1,
                Err(HubError::CircuitOpen) => report.unavailable += 1,
                Err(e) => {
                    warn!(sha = %sha, error = %e, "Hub query failed");
                    report.unavailable += 1;
                }
            }
        }

        if report.unavailable > 0 {
            warn!(
                unavailable = report.unavailable,
                circuit = %self.hub.circuit_state(),
                "Hub unavailable for some queries, will retry next pass"
            );
        }
        debug!(
            completed = report.completed,
            failed = report.failed,
            pending = report.pending,
            "Hub poll finished"
        );
        Ok(report)
    }

    /// Revert or fail leases that outlived their phase timeout.
    pub async fn sweep(&self) -> Result<SweepReport, CommandError> {
        let report = self.model.sweep_timed_out_leases().await?;
        if !report.is_empty() {
            warn!(
                reverted = report.reverted.len(),
                errored = report.errored.len(),
                "Timed out scan leases"
            );
        }
        Ok(report)
    }

    pub async fn collect_garbage(&self) -> Result<usize, CommandError> {
        let removed = self.model.collect_garbage().await?;
        if !removed.is_empty() {
            info!(removed = removed.len(), "Removed unreferenced images");
        }
        Ok(removed.len())
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
