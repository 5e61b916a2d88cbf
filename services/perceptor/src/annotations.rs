//! Cluster annotations derived from scan summaries.
//!
//! Produces the label and annotation maps a cluster-side writer applies to
//! pods and images, following the OpenShift container-content annotation
//! format. Pure: the caller supplies the timestamp and scanner version.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use scanward_id::ImageSha;
use serde::{Deserialize, Serialize};

use crate::aggregator::{ImageScan, PodScan, ScanSummary};
use crate::model::PolicyStatus;

pub const POD_LABEL_PREFIX: &str = "com.blackducksoftware.pod";
pub const IMAGE_LABEL_PREFIX: &str = "com.blackducksoftware.image";
pub const POD_ANNOTATION_PREFIX: &str = "quality.pod.openshift.io";
pub const IMAGE_ANNOTATION_PREFIX: &str = "quality.image.openshift.io";

const ANNOTATION_NAME: &str = "BlackDucksoftware";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEntry {
    pub label: String,
    pub data: String,
    pub severity_index: u32,
    pub reference: String,
}

/// One annotation document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlackDuckAnnotation {
    pub name: String,
    pub description: String,
    pub timestamp: String,
    pub reference: String,
    pub scanner_version: String,
    pub compliant: bool,
    pub summary: Vec<SummaryEntry>,
}

impl BlackDuckAnnotation {
    pub fn vulnerability(
        count: u32,
        reference: &str,
        scanner_version: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new("Vulnerability Info", "high", count, reference, scanner_version, at)
    }

    pub fn policy(count: u32, reference: &str, scanner_version: &str, at: DateTime<Utc>) -> Self {
        Self::new("Policy Info", "important", count, reference, scanner_version, at)
    }

    fn new(
        description: &str,
        label: &str,
        count: u32,
        reference: &str,
        scanner_version: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: ANNOTATION_NAME.to_string(),
            description: description.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            reference: reference.to_string(),
            scanner_version: scanner_version.to_string(),
            compliant: count == 0,
            summary: vec![SummaryEntry {
                label: label.to_string(),
                data: count.to_string(),
                severity_index: 1,
                reference: String::new(),
            }],
        }
    }

    /// Equal in every field except the timestamp. Used to skip rewriting
    /// annotations whose content has not changed.
    pub fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.reference == other.reference
            && self.scanner_version == other.scanner_version
            && self.compliant == other.compliant
            && self.summary == other.summary
    }

    /// Compare two serialized documents; unparsable input never matches.
    pub fn same_content_json(a: &str, b: &str) -> bool {
        match (
            serde_json::from_str::<Self>(a),
            serde_json::from_str::<Self>(b),
        ) {
            (Ok(a), Ok(b)) => a.same_content(&b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodAnnotations {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnnotations {
    pub sha: ImageSha,
    pub repository: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanAnnotations {
    pub pods: Vec<PodAnnotations>,
    pub images: Vec<ImageAnnotations>,
}

/// Project a scan summary into labels and annotations.
pub fn annotate(
    summary: &ScanSummary,
    scanner_version: &str,
    at: DateTime<Utc>,
) -> Result<ScanAnnotations, serde_json::Error> {
    let pods = summary
        .pods
        .iter()
        .map(|pod| pod_annotations(pod, scanner_version, at))
        .collect::<Result<_, _>>()?;
    let images = summary
        .images
        .iter()
        .map(|image| image_annotations(image, scanner_version, at))
        .collect::<Result<_, _>>()?;
    Ok(ScanAnnotations { pods, images })
}

fn pod_annotations(
    pod: &PodScan,
    scanner_version: &str,
    at: DateTime<Utc>,
) -> Result<PodAnnotations, serde_json::Error> {
    let vulnerability =
        BlackDuckAnnotation::vulnerability(pod.vulnerabilities, "", scanner_version, at);
    let policy = BlackDuckAnnotation::policy(pod.policy_violations, "", scanner_version, at);

    let mut annotations = BTreeMap::new();
    annotations.insert(
        format!("{POD_ANNOTATION_PREFIX}/vulnerability.blackduck"),
        serde_json::to_string(&vulnerability)?,
    );
    annotations.insert(
        format!("{POD_ANNOTATION_PREFIX}/policy.blackduck"),
        serde_json::to_string(&policy)?,
    );

    Ok(PodAnnotations {
        namespace: pod.namespace.clone(),
        name: pod.name.clone(),
        labels: labels(
            POD_LABEL_PREFIX,
            pod.policy_violations,
            pod.vulnerabilities,
            pod.overall_status,
        ),
        annotations,
    })
}

fn image_annotations(
    image: &ImageScan,
    scanner_version: &str,
    at: DateTime<Utc>,
) -> Result<ImageAnnotations, serde_json::Error> {
    let url = image.components_url.as_str();
    let vulnerability = BlackDuckAnnotation::vulnerability(image.vulnerabilities, url, scanner_version, at);
    let policy = BlackDuckAnnotation::policy(image.policy_violations, url, scanner_version, at);

    let mut annotations = BTreeMap::new();
    annotations.insert(
        "blackducksoftware.com/hub-scanner-version".to_string(),
        scanner_version.to_string(),
    );
    annotations.insert("blackducksoftware.com/project-endpoint".to_string(), url.to_string());
    annotations.insert(
        format!("{IMAGE_ANNOTATION_PREFIX}/vulnerability.blackduck"),
        serde_json::to_string(&vulnerability)?,
    );
    annotations.insert(
        format!("{IMAGE_ANNOTATION_PREFIX}/policy.blackduck"),
        serde_json::to_string(&policy)?,
    );

    Ok(ImageAnnotations {
        sha: image.sha.clone(),
        repository: image.repository.clone(),
        labels: labels(
            IMAGE_LABEL_PREFIX,
            image.policy_violations,
            image.vulnerabilities,
            image.overall_status,
        ),
        annotations,
    })
}

fn labels(
    prefix: &str,
    policy_violations: u32,
    vulnerabilities: u32,
    overall: PolicyStatus,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (format!("{prefix}.policy-violations"), policy_violations.to_string()),
        (format!("{prefix}.has-policy-violations"), (policy_violations > 0).to_string()),
        (format!("{prefix}.vulnerabilities"), vulnerabilities.to_string()),
        (format!("{prefix}.has-vulnerabilities"), (vulnerabilities > 0).to_string()),
        (format!("{prefix}.overall-status"), overall.to_string()),
    ])
}
