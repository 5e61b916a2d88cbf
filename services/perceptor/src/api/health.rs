//! Liveness and readiness probes.
//!
//! Ready means the command processor answers and the Hub breaker is not
//! open. A half-open breaker is reported as degraded but still ready.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use scanward_hub::CircuitState;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    Degraded,
    Unavailable,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ProbeStatus,
    pub service: &'static str,
    pub version: &'static str,
    /// RFC 3339.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub processor: ComponentStatus,
    pub hub: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub status: ProbeStatus,
    pub message: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

impl HealthResponse {
    fn new(status: ProbeStatus, components: Option<ComponentHealth>) -> Self {
        Self {
            status,
            service: "perceptor",
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now().to_rfc3339(),
            components,
        }
    }
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse::new(ProbeStatus::Ok, None))
}

async fn livez() -> StatusCode {
    StatusCode::OK
}

async fn probe_processor(state: &AppState) -> ComponentStatus {
    match state.model().scheduler_stats().await {
        Ok(stats) => ComponentStatus {
            status: ProbeStatus::Ok,
            message: format!(
                "{}/{} leases in flight, {} queued",
                stats.in_flight, stats.concurrent_scan_limit, stats.queued
            ),
        },
        Err(e) => ComponentStatus {
            status: ProbeStatus::Unavailable,
            message: e.to_string(),
        },
    }
}

fn probe_hub(state: &AppState) -> ComponentStatus {
    let circuit = state.hub().circuit_state();
    ComponentStatus {
        status: match circuit {
            CircuitState::Closed => ProbeStatus::Ok,
            CircuitState::HalfOpen => ProbeStatus::Degraded,
            CircuitState::Open => ProbeStatus::Unavailable,
        },
        message: format!("circuit {circuit}"),
    }
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let processor = probe_processor(&state).await;
    let hub = probe_hub(&state);

    let ready = processor.status == ProbeStatus::Ok && hub.status != ProbeStatus::Unavailable;
    let (code, status) = if ready {
        (StatusCode::OK, ProbeStatus::Ok)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, ProbeStatus::Degraded)
    };
    let body = HealthResponse::new(status, Some(ComponentHealth { processor, hub }));
    (code, Json(body))
}
