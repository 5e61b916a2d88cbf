//! Serializable dump of the whole model.

use chrono::{DateTime, Utc};
use scanward_id::{ImageSha, PodKey};
use serde::Serialize;

use super::image::{ScanResults, ScanStatus};
use super::pod::Container;
use crate::scheduler::SchedulerStats;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSnapshot {
    pub pods: Vec<PodDump>,
    pub images: Vec<ImageDump>,
    pub scheduler: SchedulerDump,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodDump {
    pub key: PodKey,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDump {
    pub sha: ImageSha,
    pub name: String,
    pub docker_image: String,
    pub priority: i32,
    pub status: ScanStatus,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub registered: bool,
    pub first_observed: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ScanResults>,
    /// Seconds since the current lease phase began, for leased images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerDump {
    #[serde(flatten)]
    pub stats: SchedulerStats,
    /// Queued digests in the order they will be handed out.
    pub queue: Vec<ImageSha>,
}
