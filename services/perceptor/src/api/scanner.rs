//! Scanner worker job protocol and operator controls.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use scanward_hub::HubApi;
use scanward_id::ImageSha;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{ApiError, FieldError};
use crate::model::{ImageSpec, ScanStatus};
use crate::scheduler::SchedulerStats;
use crate::state::AppState;

/// `GET /nextimage` response. `image` is null when there is no job.
#[derive(Debug, Serialize, Deserialize)]
pub struct NextImageResponse {
    pub image: Option<ImageSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishScanPayload {
    pub sha: String,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinishScanResponse {
    pub sha: ImageSha,
    pub status: ScanStatus,
}

#[derive(Debug, Deserialize)]
pub struct ResetImagePayload {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct ConcurrentScanLimitPayload {
    pub limit: usize,
}

fn parse_sha(raw: &str) -> Result<ImageSha, ApiError> {
    ImageSha::parse(raw).map_err(|e| {
        ApiError::bad_request("validation_failed", "invalid image digest")
            .with_details(vec![FieldError::new("sha", e.to_string())])
    })
}

/// Fire a Hub notification without holding up the request.
fn notify_hub(hub: &Arc<dyn HubApi>, sha: ImageSha, started: bool) {
    let hub = Arc::clone(hub);
    tokio::spawn(async move {
        let result = if started {
            hub.start_scan_job(&sha).await
        } else {
            hub.finish_scan_job(&sha).await
        };
        if let Err(e) = result {
            warn!(sha = %sha, started, error = %e, "Hub scan job notification failed");
        }
    });
}

/// `GET /nextimage`
pub async fn get_next_image(
    State(state): State<AppState>,
) -> Result<Json<NextImageResponse>, ApiError> {
    let Some(image) = state.model().next_image_to_scan().await? else {
        debug!("No image available to scan");
        return Ok(Json(NextImageResponse { image: None }));
    };

    state.model().scan_client_started(image.sha.clone()).await?;
    notify_hub(state.hub(), image.sha.clone(), true);

    info!(sha = %image.sha, name = %image.name, "Scan job handed out");
    Ok(Json(NextImageResponse { image: Some(image) }))
}

/// `POST /finishscan`
pub async fn post_finish_scan(
    State(state): State<AppState>,
    payload: Result<Json<FinishScanPayload>, JsonRejection>,
) -> Result<Json<FinishScanResponse>, ApiError> {
    let Json(payload) = payload?;
    let sha = parse_sha(&payload.sha)?;
    let error = payload.error_message.filter(|m| !m.is_empty());

    let status = state
        .model()
        .scan_did_finish(sha.clone(), payload.success, error)
        .await?;

    if payload.success {
        notify_hub(state.hub(), sha.clone(), false);
    }
    info!(sha = %sha, success = payload.success, status = %status, "Scan finished");
    Ok(Json(FinishScanResponse { sha, status }))
}

/// `POST /resetimage`
pub async fn post_reset_image(
    State(state): State<AppState>,
    payload: Result<Json<ResetImagePayload>, JsonRejection>,
) -> Result<Json<FinishScanResponse>, ApiError> {
    let Json(payload) = payload?;
    let sha = parse_sha(&payload.sha)?;

    state.model().reset_image(sha.clone()).await?;
    Ok(Json(FinishScanResponse {
        sha,
        status: ScanStatus::Unscanned,
    }))
}

/// `POST /concurrentscanlimit`
///
/// Leases already handed out are kept when the limit drops.
pub async fn post_concurrent_scan_limit(
    State(state): State<AppState>,
    payload: Result<Json<ConcurrentScanLimitPayload>, JsonRejection>,
) -> Result<Json<SchedulerStats>, ApiError> {
    let Json(payload) = payload?;
    if payload.limit == 0 {
        return Err(
            ApiError::bad_request("validation_failed", "invalid concurrent scan limit")
                .with_details(vec![FieldError::new("limit", "must be at least 1")]),
        );
    }

    let stats = state.model().set_concurrent_scan_limit(payload.limit).await?;
    info!(
        limit = stats.concurrent_scan_limit,
        in_flight = stats.in_flight,
        "Concurrent scan limit set"
    );
    Ok(Json(stats))
}
