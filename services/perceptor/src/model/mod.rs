//! Scan state model.
//!
//! The model is the single source of truth for pods, images and per-image
//! scan status. It is owned by the command processor (see
//! [`crate::actors::ModelActor`]) and never shared: every mutation and every
//! model-dependent read arrives as a [`crate::commands::Command`] and is
//! applied here one at a time.
//!
//! ## Invariants
//!
//! - One [`Image`] per digest; repeated observations merge metadata.
//! - An image is in the scheduler queue iff its status is `Unscanned`.
//! - An image holds a lease iff its status holds a lease, and a lease is
//!   only granted while fewer images than the concurrency limit are in
//!   flight. Lowering the limit at runtime revokes nothing.
//! - `Complete` implies results are present. Nothing in this module can
//!   produce a violation; the aggregator still checks for one.

mod error;
mod image;
mod pod;
mod snapshot;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use scanward_id::{ImageSha, PodKey};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::scheduler::{Scheduler, SchedulerStats};

pub use error::ModelError;
pub use image::{Image, ImageSpec, PolicyStatus, ScanResults, ScanStatus};
pub use pod::{Container, ContainerSnapshot, Pod, PodSnapshot};
pub use snapshot::{ImageDump, ModelSnapshot, PodDump, SchedulerDump};

/// Scheduling limits and timeouts.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Maximum images simultaneously leased.
    pub concurrent_scan_limit: usize,

    /// Reverts (failures or timeouts) after which an image moves to `Error`.
    pub retry_limit: u32,

    /// Lease timeout for `InQueue` and `RunningScanClient`.
    pub scan_client_timeout: Duration,

    /// Lease timeout for `RunningScanClientAnalysis`.
    pub hub_analysis_timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            concurrent_scan_limit: 2,
            retry_limit: 3,
            scan_client_timeout: Duration::from_secs(30 * 60),
            hub_analysis_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Outcome of a lease-timeout sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Reverted to `Unscanned` for another attempt.
    pub reverted: Vec<ImageSha>,
    /// Out of retries, moved to `Error`.
    pub errored: Vec<ImageSha>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.reverted.is_empty() && self.errored.is_empty()
    }
}

/// Pods, images and scheduler state.
#[derive(Debug)]
pub struct Model {
    config: ModelConfig,
    pods: BTreeMap<PodKey, Pod>,
    images: HashMap<ImageSha, Image>,
    scheduler: Scheduler,
    next_seq: u64,
}

impl Model {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config.concurrent_scan_limit),
            config,
            pods: BTreeMap::new(),
            images: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Pods in key order.
    pub fn pods(&self) -> impl Iterator<Item = &Pod> {
        self.pods.values()
    }

    pub fn pod(&self, key: &PodKey) -> Option<&Pod> {
        self.pods.get(key)
    }

    pub fn image(&self, sha: &ImageSha) -> Option<&Image> {
        self.images.get(sha)
    }

    /// Images in no particular order.
    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.images.values()
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Digests awaiting Hub analysis, sorted.
    pub fn images_in_analysis(&self) -> Vec<ImageSha> {
        let mut shas: Vec<ImageSha> = self
            .images
            .values()
            .filter(|i| i.status == ScanStatus::RunningScanClientAnalysis)
            .map(|i| i.sha.clone())
            .collect();
        shas.sort();
        shas
    }

    pub fn snapshot(&self, now: Instant) -> ModelSnapshot {
        let pods = self
            .pods
            .values()
            .map(|pod| PodDump {
                key: pod.key().clone(),
                containers: pod.containers().to_vec(),
            })
            .collect();

        let mut images: Vec<ImageDump> = self
            .images
            .values()
            .map(|image| ImageDump {
                sha: image.sha.clone(),
                name: image.name.clone(),
                docker_image: image.docker_image.clone(),
                priority: image.priority,
                status: image.status,
                retries: image.retries,
                last_error: image.last_error.clone(),
                registered: image.registered,
                first_observed: image.first_observed,
                results: image.results.clone(),
                phase_age_secs: self
                    .scheduler
                    .lease(&image.sha)
                    .map(|lease| now.saturating_duration_since(lease.phase_started_at).as_secs()),
            })
            .collect();
        images.sort_by(|a, b| a.sha.cmp(&b.sha));

        ModelSnapshot {
            pods,
            images,
            scheduler: SchedulerDump {
                stats: self.scheduler.stats(),
                queue: self.scheduler.queue_order().cloned().collect(),
            },
        }
    }

    // -------------------------------------------------------------------------
    // Inventory
    // -------------------------------------------------------------------------

    /// Replace the whole pod set. Newly referenced images are created
    /// `Unscanned`; images no longer referenced stay until garbage collection.
    pub fn replace_all_pods(&mut self, pods: Vec<PodSnapshot>) {
        let mut next = BTreeMap::new();
        for snapshot in pods {
            let (pod, images) = snapshot.into_parts();
            for spec in images {
                self.observe_image(spec, false);
            }
            next.insert(pod.key().clone(), pod);
        }

        let previous = std::mem::replace(&mut self.pods, next);
        debug!(
            pods = self.pods.len(),
            previous_pods = previous.len(),
            images = self.images.len(),
            "Replaced pod inventory"
        );
    }

    /// Replace the set of directly registered images.
    pub fn replace_all_images(&mut self, images: Vec<ImageSpec>) {
        for image in self.images.values_mut() {
            image.registered = false;
        }
        let count = images.len();
        for spec in images {
            self.observe_image(spec, true);
        }
        debug!(registered = count, images = self.images.len(), "Replaced image registrations");
    }

    /// Register a single image.
    pub fn add_image(&mut self, image: ImageSpec) {
        self.observe_image(image, true);
    }

    fn observe_image(&mut self, spec: ImageSpec, register: bool) {
        match self.images.get_mut(&spec.sha) {
            Some(image) => {
                if !spec.name.is_empty() {
                    image.name = spec.name;
                }
                if !spec.docker_image.is_empty() {
                    image.docker_image = spec.docker_image;
                }
                if register {
                    image.registered = true;
                }
                if spec.priority > image.priority {
                    if image.status == ScanStatus::Unscanned {
                        self.scheduler
                            .dequeue(&image.sha, image.priority, image.observed_seq);
                        self.scheduler
                            .enqueue(&image.sha, spec.priority, image.observed_seq);
                    }
                    image.priority = spec.priority;
                }
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;

                let image = Image::new(spec, seq, register);
                self.scheduler.enqueue(&image.sha, image.priority, seq);
                debug!(
                    sha = %image.sha,
                    name = %image.name,
                    priority = image.priority,
                    "Observed new image"
                );
                self.images.insert(image.sha.clone(), image);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Scan lifecycle
    // -------------------------------------------------------------------------

    /// Lease the highest-priority, earliest-observed `Unscanned` image, if the
    /// concurrency budget has room.
    pub fn next_image_to_scan(&mut self, now: Instant) -> Option<ImageSpec> {
        let sha = self.scheduler.peek_next()?.clone();
        self.transition(&sha, ScanStatus::InQueue, now);
        self.images.get(&sha).map(Image::spec)
    }

    /// A worker has picked up the leased image.
    pub fn scan_client_started(&mut self, sha: &ImageSha, now: Instant) -> Result<(), ModelError> {
        match self.status_of(sha)? {
            ScanStatus::InQueue => {
                self.transition(sha, ScanStatus::RunningScanClient, now);
                Ok(())
            }
            ScanStatus::RunningScanClient => Ok(()),
            status => Err(ModelError::InvalidTransition {
                sha: sha.clone(),
                status,
                action: "start scan client",
            }),
        }
    }

    /// A worker reports the end of its scan.
    ///
    /// Success stages the image for Hub reconciliation. Failure reverts it
    /// for another attempt, or moves it to `Error` once out of retries.
    pub fn scan_did_finish(
        &mut self,
        sha: &ImageSha,
        success: bool,
        error: Option<String>,
        now: Instant,
    ) -> Result<ScanStatus, ModelError> {
        let status = self.status_of(sha)?;
        match (status, success) {
            (ScanStatus::InQueue | ScanStatus::RunningScanClient, true) => {
                self.transition(sha, ScanStatus::RunningScanClientAnalysis, now);
                Ok(ScanStatus::RunningScanClientAnalysis)
            }
            (ScanStatus::InQueue | ScanStatus::RunningScanClient, false) => {
                let error = error.unwrap_or_else(|| "scan client failed".to_string());
                self.revert_or_fail(sha, error, now)
            }
            (ScanStatus::RunningScanClientAnalysis | ScanStatus::Complete, true) => Ok(status),
            (status, _) => Err(ModelError::InvalidTransition {
                sha: sha.clone(),
                status,
                action: "finish scan",
            }),
        }
    }

    /// The Hub reports that its analysis of the image failed.
    pub fn hub_scan_failed(
        &mut self,
        sha: &ImageSha,
        message: String,
        now: Instant,
    ) -> Result<ScanStatus, ModelError> {
        match self.status_of(sha)? {
            ScanStatus::RunningScanClientAnalysis => self.revert_or_fail(sha, message, now),
            status => Err(ModelError::InvalidTransition {
                sha: sha.clone(),
                status,
                action: "fail hub analysis",
            }),
        }
    }

    /// Attach Hub results and mark the image `Complete`.
    ///
    /// Returns `false` when the image already holds identical results.
    pub fn set_scan_results(
        &mut self,
        sha: &ImageSha,
        results: ScanResults,
        now: Instant,
    ) -> Result<bool, ModelError> {
        let image = self
            .images
            .get_mut(sha)
            .ok_or_else(|| ModelError::UnknownImage(sha.clone()))?;

        if image.status == ScanStatus::Complete && image.results.as_ref() == Some(&results) {
            return Ok(false);
        }

        debug!(
            sha = %sha,
            policy_status = %results.policy_status,
            violations = results.policy_violations,
            vulnerabilities = results.vulnerabilities,
            "Scan results recorded"
        );
        image.results = Some(results);
        image.last_error = None;
        self.transition(sha, ScanStatus::Complete, now);
        Ok(true)
    }

    /// Operator reset of an image in `Error`.
    pub fn reset_image(&mut self, sha: &ImageSha, now: Instant) -> Result<(), ModelError> {
        let image = self
            .images
            .get_mut(sha)
            .ok_or_else(|| ModelError::UnknownImage(sha.clone()))?;

        if image.status != ScanStatus::Error {
            return Err(ModelError::InvalidTransition {
                sha: sha.clone(),
                status: image.status,
                action: "reset",
            });
        }

        image.retries = 0;
        image.last_error = None;
        self.transition(sha, ScanStatus::Unscanned, now);
        info!(sha = %sha, "Image reset for rescanning");
        Ok(())
    }

    /// Revert or fail every lease whose current phase outlived its timeout.
    pub fn sweep_timed_out_leases(&mut self, now: Instant) -> SweepReport {
        let images = &self.images;
        let config = &self.config;
        let expired = self.scheduler.expired(now, |sha| {
            match images.get(sha).map(|i| i.status) {
                Some(ScanStatus::RunningScanClientAnalysis) => config.hub_analysis_timeout,
                _ => config.scan_client_timeout,
            }
        });

        let mut report = SweepReport::default();
        for sha in expired {
            let status = self.images.get(&sha).map(|i| i.status);
            let reason = match status {
                Some(status) => format!("lease timed out in {status}"),
                None => "lease timed out".to_string(),
            };
            match self.revert_or_fail(&sha, reason, now) {
                Ok(ScanStatus::Error) => report.errored.push(sha),
                Ok(_) => report.reverted.push(sha),
                Err(e) => warn!(sha = %sha, error = %e, "Lease held by unknown image"),
            }
        }
        report
    }

    /// Change the concurrency limit (clamped to at least 1).
    pub fn set_concurrent_scan_limit(&mut self, limit: usize) -> SchedulerStats {
        let previous = self.scheduler.set_limit(limit);
        let stats = self.scheduler.stats();
        self.config.concurrent_scan_limit = stats.concurrent_scan_limit;
        info!(
            previous,
            limit = stats.concurrent_scan_limit,
            in_flight = stats.in_flight,
            "Concurrent scan limit changed"
        );
        stats
    }

    /// Remove images referenced by no pod, not directly registered, and not
    /// leased. Returns the removed digests, sorted.
    pub fn collect_garbage(&mut self) -> Vec<ImageSha> {
        let referenced: HashSet<&ImageSha> =
            self.pods.values().flat_map(|pod| pod.image_shas()).collect();

        let mut doomed: Vec<ImageSha> = self
            .images
            .values()
            .filter(|i| !i.registered && !i.status.holds_lease() && !referenced.contains(&i.sha))
            .map(|i| i.sha.clone())
            .collect();
        doomed.sort();

        for sha in &doomed {
            if let Some(image) = self.images.remove(sha) {
                if image.status == ScanStatus::Unscanned {
                    self.scheduler
                        .dequeue(&image.sha, image.priority, image.observed_seq);
                }
            }
        }

        if !doomed.is_empty() {
            debug!(removed = doomed.len(), remaining = self.images.len(), "Collected unreferenced images");
        }
        doomed
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn status_of(&self, sha: &ImageSha) -> Result<ScanStatus, ModelError> {
        self.images
            .get(sha)
            .map(|i| i.status)
            .ok_or_else(|| ModelError::UnknownImage(sha.clone()))
    }

    /// Count a failed attempt: back to `Unscanned`, or `Error` once the retry
    /// limit is reached.
    fn revert_or_fail(
        &mut self,
        sha: &ImageSha,
        error: String,
        now: Instant,
    ) -> Result<ScanStatus, ModelError> {
        let image = self
            .images
            .get_mut(sha)
            .ok_or_else(|| ModelError::UnknownImage(sha.clone()))?;

        image.retries += 1;
        let retries = image.retries;
        let next = if retries >= self.config.retry_limit {
            ScanStatus::Error
        } else {
            ScanStatus::Unscanned
        };
        warn!(
            sha = %sha,
            from = %image.status,
            to = %next,
            retries,
            error = %error,
            "Scan attempt failed"
        );
        image.last_error = Some(error);

        self.transition(sha, next, now);
        Ok(next)
    }

    /// The only place an image's status changes. Keeps the queue and the
    /// lease table in step with the status.
    fn transition(&mut self, sha: &ImageSha, next: ScanStatus, now: Instant) {
        let Some(image) = self.images.get_mut(sha) else {
            return;
        };
        let previous = image.status;
        if previous == next {
            return;
        }

        if previous == ScanStatus::Unscanned {
            self.scheduler
                .dequeue(&image.sha, image.priority, image.observed_seq);
        }

        match (previous.holds_lease(), next.holds_lease()) {
            (false, true) => self.scheduler.acquire(sha, now),
            (true, true) => self.scheduler.restart_phase(sha, now),
            (true, false) => {
                self.scheduler.release(sha);
            }
            (false, false) => {}
        }

        if next == ScanStatus::Unscanned {
            self.scheduler
                .enqueue(&image.sha, image.priority, image.observed_seq);
        }

        image.status = next;
        debug!(sha = %sha, from = %previous, to = %next, "Image status changed");
    }

    #[cfg(test)]
    pub(crate) fn image_mut(&mut self, sha: &ImageSha) -> Option<&mut Image> {
        self.images.get_mut(sha)
    }

    /// Panics if the queue or lease table disagree with image statuses.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let queued: HashSet<&ImageSha> = self.scheduler.queue_order().collect();
        for image in self.images.values() {
            assert_eq!(
                queued.contains(&image.sha),
                image.status == ScanStatus::Unscanned,
                "queue membership of {} disagrees with status {}",
                image.sha,
                image.status
            );
            assert_eq!(
                self.scheduler.lease(&image.sha).is_some(),
                image.status.holds_lease(),
                "lease of {} disagrees with status {}",
                image.sha,
                image.status
            );
            if image.status == ScanStatus::Complete {
                assert!(image.results.is_some(), "{} Complete without results", image.sha);
            }
        }
        let stats = self.scheduler.stats();
        assert_eq!(stats.queued, queued.len());
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn sha(n: u8) -> ImageSha {
        ImageSha::parse(&format!("{:02x}", n).repeat(32)).unwrap()
    }

    pub(crate) fn spec(n: u8, priority: i32) -> ImageSpec {
        ImageSpec {
            name: format!("registry.local/app-{n}"),
            sha: sha(n),
            docker_image: format!("registry.local/app-{n}@sha256:{}", sha(n)),
            priority,
        }
    }

    pub(crate) fn pod(ns: &str, name: &str, images: &[u8]) -> PodSnapshot {
        PodSnapshot {
            key: PodKey::new(ns, name).unwrap(),
            containers: images
                .iter()
                .enumerate()
                .map(|(i, n)| ContainerSnapshot {
                    name: format!("c{i}"),
                    image: spec(*n, 0),
                })
                .collect(),
        }
    }

    pub(crate) fn results(violations: u32, vulns: u32, status: PolicyStatus) -> ScanResults {
        ScanResults {
            policy_status: status,
            policy_violations: violations,
            vulnerabilities: vulns,
            components_url: "https://hub.local/components".to_string(),
        }
    }

    fn model(limit: usize, retries: u32) -> Model {
        Model::new(ModelConfig {
            concurrent_scan_limit: limit,
            retry_limit: retries,
            scan_client_timeout: Duration::from_secs(60),
            hub_analysis_timeout: Duration::from_secs(600),
        })
    }

    #[test]
    fn test_same_digest_in_two_snapshots_is_one_image() {
        let mut m = model(2, 3);
        m.replace_all_pods(vec![pod("ns", "a", &[1, 2])]);
        m.replace_all_pods(vec![pod("ns", "b", &[2]), pod("other", "c", &[1, 1])]);

        assert_eq!(m.image_count(), 2);
        assert_eq!(m.pod_count(), 2);
        assert!(m.pod(&PodKey::new("ns", "a").unwrap()).is_none());
        m.assert_consistent();
    }

    #[test]
    fn test_reobservation_merges_metadata() {
        let mut m = model(2, 3);
        m.add_image(spec(1, 0));
        m.add_image(ImageSpec {
            name: "mirror.local/app-1".to_string(),
            sha: sha(1),
            docker_image: String::new(),
            priority: 7,
        });

        let image = m.image(&sha(1)).unwrap();
        assert_eq!(image.name(), "mirror.local/app-1");
        assert_eq!(image.docker_image(), spec(1, 0).docker_image);
        assert_eq!(image.priority(), 7);
        assert_eq!(m.image_count(), 1);
        m.assert_consistent();
    }

    #[test]
    fn test_priority_never_lowered_by_reobservation() {
        let mut m = model(2, 3);
        m.add_image(spec(1, 9));
        m.add_image(spec(1, 1));
        assert_eq!(m.image(&sha(1)).unwrap().priority(), 9);
    }

    #[test]
    fn test_selection_prefers_priority_then_fifo() {
        let mut m = model(10, 3);
        let now = Instant::now();
        m.add_image(spec(1, 0));
        m.add_image(spec(2, 0));
        m.add_image(spec(3, 5));
        // Raising priority keeps first-observation order among equals.
        m.add_image(spec(2, 5));

        let order: Vec<_> = std::iter::from_fn(|| m.next_image_to_scan(now))
            .map(|s| s.sha)
            .collect();
        assert_eq!(order, vec![sha(2), sha(3), sha(1)]);
        m.assert_consistent();
    }

    #[test]
    fn test_budget_blocks_selection_until_release() {
        let mut m = model(1, 3);
        let now = Instant::now();
        m.add_image(spec(1, 0));
        m.add_image(spec(2, 0));

        assert_eq!(m.next_image_to_scan(now).unwrap().sha, sha(1));
        assert!(m.next_image_to_scan(now).is_none());

        m.scan_client_started(&sha(1), now).unwrap();
        m.scan_did_finish(&sha(1), true, None, now).unwrap();
        // Analysis still holds the lease.
        assert!(m.next_image_to_scan(now).is_none());

        m.set_scan_results(&sha(1), results(0, 0, PolicyStatus::NotInViolation), now)
            .unwrap();
        assert_eq!(m.next_image_to_scan(now).unwrap().sha, sha(2));
        m.assert_consistent();
    }

    #[test]
    fn test_full_lifecycle() {
        let mut m = model(2, 3);
        let now = Instant::now();
        m.replace_all_pods(vec![pod("ns", "p1", &[1])]);

        let job = m.next_image_to_scan(now).unwrap();
        assert_eq!(job.sha, sha(1));
        assert_eq!(m.image(&sha(1)).unwrap().status(), ScanStatus::InQueue);

        m.scan_client_started(&sha(1), now).unwrap();
        assert_eq!(m.image(&sha(1)).unwrap().status(), ScanStatus::RunningScanClient);

        let status = m.scan_did_finish(&sha(1), true, None, now).unwrap();
        assert_eq!(status, ScanStatus::RunningScanClientAnalysis);
        assert_eq!(m.images_in_analysis(), vec![sha(1)]);

        assert!(m
            .set_scan_results(&sha(1), results(2, 5, PolicyStatus::InViolation), now)
            .unwrap());
        let image = m.image(&sha(1)).unwrap();
        assert_eq!(image.status(), ScanStatus::Complete);
        assert_eq!(image.results().unwrap().vulnerabilities, 5);
        assert_eq!(m.scheduler_stats().in_flight, 0);
        m.assert_consistent();
    }

    #[test]
    fn test_failed_scans_retry_then_error() {
        let mut m = model(1, 2);
        let now = Instant::now();
        m.add_image(spec(1, 0));

        m.next_image_to_scan(now).unwrap();
        let status = m
            .scan_did_finish(&sha(1), false, Some("pull failed".into()), now)
            .unwrap();
        assert_eq!(status, ScanStatus::Unscanned);
        assert_eq!(m.image(&sha(1)).unwrap().last_error(), Some("pull failed"));

        m.next_image_to_scan(now).unwrap();
        let status = m.scan_did_finish(&sha(1), false, None, now).unwrap();
        assert_eq!(status, ScanStatus::Error);
        assert!(m.next_image_to_scan(now).is_none());
        m.assert_consistent();
    }

    #[test]
    fn test_timeouts_revert_then_error_and_never_reschedule() {
        let mut m = model(1, 3);
        let start = Instant::now();
        m.add_image(spec(1, 0));

        let mut now = start;
        for attempt in 1..=3 {
            assert_eq!(m.next_image_to_scan(now).unwrap().sha, sha(1));
            m.scan_client_started(&sha(1), now).unwrap();
            now += Duration::from_secs(61);
            let report = m.sweep_timed_out_leases(now);
            if attempt < 3 {
                assert_eq!(report.reverted, vec![sha(1)]);
            } else {
                assert_eq!(report.errored, vec![sha(1)]);
            }
        }

        assert_eq!(m.image(&sha(1)).unwrap().status(), ScanStatus::Error);
        assert!(m.next_image_to_scan(now + Duration::from_secs(3600)).is_none());
        m.assert_consistent();
    }

    #[test]
    fn test_analysis_uses_its_own_timeout() {
        let mut m = model(1, 3);
        let start = Instant::now();
        m.add_image(spec(1, 0));
        m.next_image_to_scan(start).unwrap();
        m.scan_did_finish(&sha(1), true, None, start).unwrap();

        assert!(m.sweep_timed_out_leases(start + Duration::from_secs(120)).is_empty());
        let report = m.sweep_timed_out_leases(start + Duration::from_secs(600));
        assert_eq!(report.reverted, vec![sha(1)]);
    }

    #[test]
    fn test_phase_change_restarts_lease_timer() {
        let mut m = model(1, 3);
        let start = Instant::now();
        m.add_image(spec(1, 0));
        m.next_image_to_scan(start).unwrap();
        m.scan_client_started(&sha(1), start + Duration::from_secs(50)).unwrap();

        assert!(m.sweep_timed_out_leases(start + Duration::from_secs(90)).is_empty());
    }

    #[test]
    fn test_set_scan_results_replay_is_noop() {
        let mut m = model(1, 3);
        let now = Instant::now();
        m.add_image(spec(1, 0));
        m.next_image_to_scan(now).unwrap();
        m.scan_did_finish(&sha(1), true, None, now).unwrap();

        let r = results(2, 5, PolicyStatus::InViolation);
        assert!(m.set_scan_results(&sha(1), r.clone(), now).unwrap());
        let before = format!("{:?}", m.image(&sha(1)).unwrap());
        let stats_before = m.scheduler_stats();

        assert!(!m.set_scan_results(&sha(1), r, now).unwrap());
        assert_eq!(format!("{:?}", m.image(&sha(1)).unwrap()), before);
        assert_eq!(m.scheduler_stats(), stats_before);
    }

    #[test]
    fn test_finish_replay_is_noop() {
        let mut m = model(1, 3);
        let now = Instant::now();
        m.add_image(spec(1, 0));
        m.next_image_to_scan(now).unwrap();
        m.scan_did_finish(&sha(1), true, None, now).unwrap();

        assert_eq!(
            m.scan_did_finish(&sha(1), true, None, now).unwrap(),
            ScanStatus::RunningScanClientAnalysis
        );
        assert_eq!(m.image(&sha(1)).unwrap().retries(), 0);
    }

    #[test]
    fn test_stale_reports_rejected() {
        let mut m = model(1, 3);
        let now = Instant::now();
        m.add_image(spec(1, 0));

        let err = m.scan_did_finish(&sha(1), true, None, now).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidTransition { status: ScanStatus::Unscanned, .. }
        ));
        assert!(matches!(
            m.scan_client_started(&sha(1), now),
            Err(ModelError::InvalidTransition { .. })
        ));
        assert!(matches!(
            m.hub_scan_failed(&sha(1), "x".into(), now),
            Err(ModelError::InvalidTransition { .. })
        ));
        assert_eq!(
            m.scan_did_finish(&sha(9), true, None, now),
            Err(ModelError::UnknownImage(sha(9)))
        );
        m.assert_consistent();
    }

    #[test]
    fn test_hub_failure_counts_as_retry() {
        let mut m = model(1, 3);
        let now = Instant::now();
        m.add_image(spec(1, 0));
        m.next_image_to_scan(now).unwrap();
        m.scan_did_finish(&sha(1), true, None, now).unwrap();

        let status = m.hub_scan_failed(&sha(1), "analysis failed".into(), now).unwrap();
        assert_eq!(status, ScanStatus::Unscanned);
        assert_eq!(m.image(&sha(1)).unwrap().retries(), 1);
        m.assert_consistent();
    }

    #[test]
    fn test_reset_error_image() {
        let mut m = model(1, 1);
        let now = Instant::now();
        m.add_image(spec(1, 0));
        m.next_image_to_scan(now).unwrap();
        m.scan_did_finish(&sha(1), false, None, now).unwrap();
        assert_eq!(m.image(&sha(1)).unwrap().status(), ScanStatus::Error);

        m.reset_image(&sha(1), now).unwrap();
        let image = m.image(&sha(1)).unwrap();
        assert_eq!(image.status(), ScanStatus::Unscanned);
        assert_eq!(image.retries(), 0);
        assert_eq!(m.next_image_to_scan(now).unwrap().sha, sha(1));

        assert!(matches!(
            m.reset_image(&sha(1), now),
            Err(ModelError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_results_accepted_for_unleased_image() {
        let mut m = model(1, 3);
        let now = Instant::now();
        m.add_image(spec(1, 0));

        m.set_scan_results(&sha(1), results(0, 1, PolicyStatus::NotInViolation), now)
            .unwrap();
        assert_eq!(m.image(&sha(1)).unwrap().status(), ScanStatus::Complete);
        assert!(m.next_image_to_scan(now).is_none());
        m.assert_consistent();
    }

    #[test]
    fn test_garbage_collection() {
        let mut m = model(1, 3);
        let now = Instant::now();
        m.replace_all_pods(vec![pod("ns", "a", &[1, 2, 3])]);
        m.add_image(spec(4, 0));
        m.next_image_to_scan(now).unwrap(); // leases sha(1)

        m.replace_all_pods(vec![]);
        assert_eq!(m.image_count(), 4, "collection is not eager");

        let removed = m.collect_garbage();
        assert_eq!(removed, vec![sha(2), sha(3)]);
        assert!(m.image(&sha(1)).is_some(), "leased image retained");
        assert!(m.image(&sha(4)).is_some(), "registered image retained");
        m.assert_consistent();

        m.replace_all_images(vec![]);
        m.scan_did_finish(&sha(1), false, None, now).unwrap();
        assert_eq!(m.collect_garbage(), vec![sha(1), sha(4)]);
        assert_eq!(m.image_count(), 0);
        assert_eq!(m.scheduler_stats().queued, 0);
    }

    #[test]
    fn test_dropped_and_readded_image_is_rescheduled() {
        let mut m = model(1, 3);
        let now = Instant::now();
        m.replace_all_pods(vec![pod("ns", "a", &[1])]);
        m.next_image_to_scan(now).unwrap();
        m.scan_did_finish(&sha(1), false, None, now).unwrap();
        m.replace_all_pods(vec![]);
        m.collect_garbage();

        m.replace_all_pods(vec![pod("ns", "a", &[1])]);
        let image = m.image(&sha(1)).unwrap();
        assert_eq!(image.status(), ScanStatus::Unscanned);
        assert_eq!(image.retries(), 0);
    }

    #[test]
    fn test_snapshot_lists_queue_in_order() {
        let mut m = model(1, 3);
        let now = Instant::now();
        m.add_image(spec(1, 0));
        m.add_image(spec(2, 3));
        m.add_image(spec(3, 0));
        m.next_image_to_scan(now).unwrap();

        let snap = m.snapshot(now);
        assert_eq!(snap.scheduler.queue, vec![sha(1), sha(3)]);
        assert_eq!(snap.scheduler.stats.in_flight, 1);
        assert_eq!(snap.images.len(), 3);
        let leased = snap.images.iter().find(|i| i.sha == sha(2)).unwrap();
        assert_eq!(leased.status, ScanStatus::InQueue);
        assert_eq!(leased.phase_age_secs, Some(0));
    }

    #[test]
    fn test_lowering_limit_blocks_new_leases_until_in_flight_drops() {
        let mut m = model(3, 3);
        let now = Instant::now();
        for n in 1..=5 {
            m.add_image(spec(n, 0));
        }
        for _ in 0..3 {
            assert!(m.next_image_to_scan(now).is_some());
        }

        let stats = m.set_concurrent_scan_limit(1);
        assert_eq!(stats.concurrent_scan_limit, 1);
        assert_eq!(stats.in_flight, 3);
        assert_eq!(m.config().concurrent_scan_limit, 1);
        assert!(m.next_image_to_scan(now).is_none());

        m.scan_did_finish(&sha(1), true, None, now).unwrap();
        m.set_scan_results(&sha(1), results(0, 0, PolicyStatus::NotInViolation), now)
            .unwrap();
        m.scan_did_finish(&sha(2), false, Some("pull failed".into()), now)
            .unwrap();
        assert!(m.next_image_to_scan(now).is_none(), "one lease still held");

        m.set_scan_results(&sha(3), results(0, 0, PolicyStatus::NotInViolation), now)
            .unwrap();
        assert_eq!(m.next_image_to_scan(now).map(|s| s.sha), Some(sha(2)));
        assert!(m.next_image_to_scan(now).is_none());

        assert_eq!(m.set_concurrent_scan_limit(0).concurrent_scan_limit, 1);
        assert_eq!(m.set_concurrent_scan_limit(2).in_flight, 1);
        assert_eq!(m.next_image_to_scan(now).map(|s| s.sha), Some(sha(4)));
        m.assert_consistent();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, i32),
        Pods(Vec<u8>),
        Next,
        Started(u8),
        Finish(u8, bool),
        HubFailed(u8),
        Results(u8),
        Sweep(u64),
        Gc,
        Reset(u8),
        Limit(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        let n = 0u8..6;
        prop_oneof![
            (n.clone(), -2i32..3).prop_map(|(n, p)| Op::Add(n, p)),
            proptest::collection::vec(0u8..6, 0..4).prop_map(Op::Pods),
            Just(Op::Next),
            Just(Op::Next),
            n.clone().prop_map(Op::Started),
            (n.clone(), any::<bool>()).prop_map(|(n, ok)| Op::Finish(n, ok)),
            n.clone().prop_map(Op::HubFailed),
            n.clone().prop_map(Op::Results),
            (0u64..120).prop_map(Op::Sweep),
            Just(Op::Gc),
            n.prop_map(Op::Reset),
            (0usize..4).prop_map(Op::Limit),
        ]
    }

    proptest! {
        #[test]
        fn prop_budget_and_indexes_hold_under_any_command_sequence(
            limit in 1usize..4,
            ops in proptest::collection::vec(op(), 1..60),
        ) {
            let mut m = model(limit, 2);
            let mut now = Instant::now();
            let mut ceiling = limit;
            for op in ops {
                let in_flight_before = m.scheduler_stats().in_flight;
                match op {
                    Op::Add(n, p) => m.add_image(spec(n, p)),
                    Op::Pods(ns) => m.replace_all_pods(vec![pod("ns", "p", &ns)]),
                    Op::Next => {
                        if m.next_image_to_scan(now).is_some() {
                            prop_assert!(in_flight_before < m.scheduler_stats().concurrent_scan_limit);
                        }
                    }
                    Op::Started(n) => { let _ = m.scan_client_started(&sha(n), now); }
                    Op::Finish(n, ok) => { let _ = m.scan_did_finish(&sha(n), ok, None, now); }
                    Op::HubFailed(n) => { let _ = m.hub_scan_failed(&sha(n), "x".into(), now); }
                    Op::Results(n) => {
                        let _ = m.set_scan_results(&sha(n), results(1, 1, PolicyStatus::Unknown), now);
                    }
                    Op::Sweep(secs) => {
                        now += Duration::from_secs(secs);
                        m.sweep_timed_out_leases(now);
                    }
                    Op::Gc => { m.collect_garbage(); }
                    Op::Reset(n) => { let _ = m.reset_image(&sha(n), now); }
                    Op::Limit(l) => {
                        let stats = m.set_concurrent_scan_limit(l);
                        prop_assert_eq!(stats.in_flight, in_flight_before);
                        ceiling = ceiling.max(stats.concurrent_scan_limit);
                    }
                }
                m.assert_consistent();
                let in_flight = m
                    .images()
                    .filter(|i| i.status().holds_lease())
                    .count();
                prop_assert_eq!(in_flight, m.scheduler_stats().in_flight);
                prop_assert!(in_flight <= ceiling);
            }
        }

        #[test]
        fn prop_one_image_per_digest(
            snapshots in proptest::collection::vec(proptest::collection::vec(0u8..8, 0..5), 1..6),
        ) {
            let mut m = model(2, 3);
            let mut seen = HashSet::new();
            for (i, images) in snapshots.iter().enumerate() {
                seen.extend(images.iter().copied());
                m.replace_all_pods(vec![pod("ns", &format!("p{i}"), images)]);
            }
            prop_assert_eq!(m.image_count(), seen.len());
        }
    }
}
