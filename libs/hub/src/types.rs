//! Hub wire types.

use serde::{Deserialize, Serialize};

/// Overall policy verdict the Hub assigns to a scanned image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HubPolicyStatus {
    NotInViolation,
    InViolation,
    Unknown,
}

/// Analysis results for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubScanReport {
    pub policy_status: HubPolicyStatus,
    pub policy_violations: u32,
    pub vulnerabilities: u32,
    #[serde(default)]
    pub components_url: String,
}

/// Where the Hub is with analysing an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum HubScanOutcome {
    /// Still analysing, or the Hub has not seen the scan yet.
    Pending,
    /// Analysis failed on the Hub side.
    Failed {
        #[serde(default)]
        message: String,
    },
    /// Analysis finished.
    Complete(HubScanReport),
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionResponse {
    pub version: String,
}
