//! Read-only query endpoints.

use axum::{extract::State, Json};
use chrono::Utc;
use tracing::warn;

use super::error::ApiError;
use crate::aggregator::{ScanReport, ScanSummary};
use crate::annotations::{self, ScanAnnotations};
use crate::model::ModelSnapshot;
use crate::state::AppState;

async fn report(state: &AppState) -> Result<ScanReport, ApiError> {
    let report = state.model().scan_results().await?;
    for error in &report.errors {
        warn!(error = %error, "Model inconsistency skipped in scan results");
    }
    Ok(report)
}

/// `GET /scanresults`
pub async fn get_scan_results(State(state): State<AppState>) -> Result<Json<ScanSummary>, ApiError> {
    Ok(Json(report(&state).await?.summary))
}

/// `GET /scanresults/annotations`
pub async fn get_annotations(
    State(state): State<AppState>,
) -> Result<Json<ScanAnnotations>, ApiError> {
    let report = report(&state).await?;
    let scanner_version = state.hub_version().get_or_unknown();

    let annotations = annotations::annotate(&report.summary, &scanner_version, Utc::now())
        .map_err(|e| ApiError::internal("serialization_failed", e.to_string()))?;
    Ok(Json(annotations))
}

/// `GET /model`
pub async fn get_model(State(state): State<AppState>) -> Result<Json<ModelSnapshot>, ApiError> {
    Ok(Json(state.model().snapshot().await?))
}
