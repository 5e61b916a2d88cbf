//! Image records and their scan lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use scanward_hub::{HubPolicyStatus, HubScanReport};
use scanward_id::ImageSha;
use serde::{Deserialize, Serialize};

/// Scan lifecycle of an image.
///
/// ```text
/// Unscanned ─▶ InQueue ─▶ RunningScanClient ─▶ RunningScanClientAnalysis ─▶ Complete
///     ▲           │               │                       │
///     └───────────┴───────────────┴── failure / timeout ──┘   (any) ─▶ Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanStatus {
    Unscanned,
    InQueue,
    RunningScanClient,
    RunningScanClientAnalysis,
    Complete,
    Error,
}

impl ScanStatus {
    /// States that occupy a slot of the concurrency budget.
    pub fn holds_lease(self) -> bool {
        matches!(
            self,
            ScanStatus::InQueue | ScanStatus::RunningScanClient | ScanStatus::RunningScanClientAnalysis
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Unscanned => "Unscanned",
            ScanStatus::InQueue => "InQueue",
            ScanStatus::RunningScanClient => "RunningScanClient",
            ScanStatus::RunningScanClientAnalysis => "RunningScanClientAnalysis",
            ScanStatus::Complete => "Complete",
            ScanStatus::Error => "Error",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy verdict. Variants are declared in ascending severity, so `max()`
/// over a set of verdicts yields the most severe one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyStatus {
    Unknown,
    NotInViolation,
    InViolation,
}

impl PolicyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyStatus::Unknown => "unknown",
            PolicyStatus::NotInViolation => "notInViolation",
            PolicyStatus::InViolation => "inViolation",
        }
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HubPolicyStatus> for PolicyStatus {
    fn from(status: HubPolicyStatus) -> Self {
        match status {
            HubPolicyStatus::Unknown => PolicyStatus::Unknown,
            HubPolicyStatus::NotInViolation => PolicyStatus::NotInViolation,
            HubPolicyStatus::InViolation => PolicyStatus::InViolation,
        }
    }
}

/// Hub-derived results for a completed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResults {
    pub policy_status: PolicyStatus,
    pub policy_violations: u32,
    pub vulnerabilities: u32,
    #[serde(default)]
    pub components_url: String,
}

impl From<HubScanReport> for ScanResults {
    fn from(report: HubScanReport) -> Self {
        Self {
            policy_status: report.policy_status.into(),
            policy_violations: report.policy_violations,
            vulnerabilities: report.vulnerabilities,
            components_url: report.components_url,
        }
    }
}

/// An observation of an image, as reported by an inventory producer. Also
/// the job description handed to scanner workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Repository name, e.g. `docker.io/library/nginx`.
    #[serde(default)]
    pub name: String,
    pub sha: ImageSha,
    /// Pull reference for the scanner.
    #[serde(default)]
    pub docker_image: String,
    #[serde(default)]
    pub priority: i32,
}

/// An image as held by the model.
#[derive(Debug, Clone)]
pub struct Image {
    pub(crate) sha: ImageSha,
    pub(crate) name: String,
    pub(crate) docker_image: String,
    pub(crate) priority: i32,
    /// Position in first-observation order; the FIFO tie-breaker.
    pub(crate) observed_seq: u64,
    pub(crate) first_observed: DateTime<Utc>,
    pub(crate) status: ScanStatus,
    pub(crate) results: Option<ScanResults>,
    pub(crate) retries: u32,
    pub(crate) last_error: Option<String>,
    /// Directly registered (not only referenced by pods).
    pub(crate) registered: bool,
}

impl Image {
    pub(crate) fn new(spec: ImageSpec, observed_seq: u64, registered: bool) -> Self {
        Self {
            sha: spec.sha,
            name: spec.name,
            docker_image: spec.docker_image,
            priority: spec.priority,
            observed_seq,
            first_observed: Utc::now(),
            status: ScanStatus::Unscanned,
            results: None,
            retries: 0,
            last_error: None,
            registered,
        }
    }

    pub fn sha(&self) -> &ImageSha {
        &self.sha
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn docker_image(&self) -> &str {
        &self.docker_image
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn results(&self) -> Option<&ScanResults> {
        self.results.as_ref()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn first_observed(&self) -> DateTime<Utc> {
        self.first_observed
    }

    pub fn spec(&self) -> ImageSpec {
        ImageSpec {
            name: self.name.clone(),
            sha: self.sha.clone(),
            docker_image: self.docker_image.clone(),
            priority: self.priority,
        }
    }
}
