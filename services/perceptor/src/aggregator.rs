//! Result aggregation.
//!
//! A pure projection from the model to per-pod and per-image scan summaries.
//! A pod is reported only once every image it references is `Complete`;
//! partially scanned pods are left out rather than reported with stale or
//! partial numbers. Consistency violations found along the way are
//! collected and the offending entity skipped, so callers always get the
//! degraded result plus the list of what went wrong.

use scanward_id::ImageSha;
use serde::Serialize;

use crate::model::{Image, Model, ModelError, Pod, PolicyStatus, ScanResults, ScanStatus};

/// Aggregate scan of one pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PodScan {
    pub namespace: String,
    pub name: String,
    pub policy_violations: u32,
    pub vulnerabilities: u32,
    pub overall_status: PolicyStatus,
}

/// Scan of one completed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageScan {
    pub repository: String,
    pub sha: ImageSha,
    pub policy_violations: u32,
    pub vulnerabilities: u32,
    pub overall_status: PolicyStatus,
    #[serde(rename = "ComponentsURL")]
    pub components_url: String,
}

/// The `{pods, images}` projection served by `GET /scanresults`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub pods: Vec<PodScan>,
    pub images: Vec<ImageScan>,
}

/// Aggregation output: the summary plus any consistency errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub summary: ScanSummary,
    pub errors: Vec<ModelError>,
}

/// Project the model into scan summaries. Pods come out in key order and
/// images in digest order.
pub fn scan_results(model: &Model) -> ScanReport {
    let mut errors = Vec::new();

    let mut completed: Vec<&Image> = model
        .images()
        .filter(|image| image.status() == ScanStatus::Complete)
        .collect();
    completed.sort_by(|a, b| a.sha().cmp(b.sha()));

    let mut images = Vec::with_capacity(completed.len());
    for image in completed {
        match complete_results(image) {
            Ok(results) => images.push(ImageScan {
                repository: image.name().to_string(),
                sha: image.sha().clone(),
                policy_violations: results.policy_violations,
                vulnerabilities: results.vulnerabilities,
                overall_status: results.policy_status,
                components_url: results.components_url.clone(),
            }),
            Err(e) => record(&mut errors, e),
        }
    }

    let mut pods = Vec::new();
    for pod in model.pods() {
        match aggregate_pod(model, pod) {
            Ok(Some(scan)) => pods.push(scan),
            Ok(None) => {}
            Err(e) => record(&mut errors, e),
        }
    }

    ScanReport {
        summary: ScanSummary { pods, images },
        errors,
    }
}

/// `Ok(None)` while any of the pod's images is still unfinished.
fn aggregate_pod(model: &Model, pod: &Pod) -> Result<Option<PodScan>, ModelError> {
    let mut overall = PolicyStatus::Unknown;
    let mut policy_violations = 0u32;
    let mut vulnerabilities = 0u32;

    for sha in pod.image_shas() {
        let image = model.image(sha).ok_or_else(|| ModelError::DanglingImage {
            pod: pod.key().clone(),
            sha: sha.clone(),
        })?;
        if image.status() != ScanStatus::Complete {
            return Ok(None);
        }
        let results = complete_results(image)?;
        overall = overall.max(results.policy_status);
        policy_violations = policy_violations.saturating_add(results.policy_violations);
        vulnerabilities = vulnerabilities.saturating_add(results.vulnerabilities);
    }

    Ok(Some(PodScan {
        namespace: pod.key().namespace().to_string(),
        name: pod.key().name().to_string(),
        policy_violations,
        vulnerabilities,
        overall_status: overall,
    }))
}

fn complete_results(image: &Image) -> Result<&ScanResults, ModelError> {
    image
        .results()
        .ok_or_else(|| ModelError::MissingResults(image.sha().clone()))
}

fn record(errors: &mut Vec<ModelError>, error: ModelError) {
    if !errors.contains(&error) {
        errors.push(error);
    }
}
