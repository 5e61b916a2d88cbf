//! HTTP API handlers and routing.

pub mod error;
mod health;
mod inventory;
mod results;
mod scanner;

use axum::{
    http::{header, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

pub use health::{ComponentHealth, ComponentStatus, HealthResponse, ProbeStatus};
pub use inventory::{ContainerPayload, ImagePayload, PodPayload};
pub use scanner::{
    ConcurrentScanLimitPayload, FinishScanPayload, FinishScanResponse, NextImageResponse,
    ResetImagePayload,
};

/// Create the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .merge(health::routes())
        // Inventory producers
        .route("/allpods", put(inventory::put_all_pods))
        .route("/allimages", put(inventory::put_all_images))
        .route("/image", post(inventory::post_image))
        // Scanner workers
        .route("/nextimage", get(scanner::get_next_image))
        .route("/finishscan", post(scanner::post_finish_scan))
        // Operators
        .route("/resetimage", post(scanner::post_reset_image))
        .route("/concurrentscanlimit", post(scanner::post_concurrent_scan_limit))
        .route("/scanresults", get(results::get_scan_results))
        .route("/scanresults/annotations", get(results::get_annotations))
        .route("/model", get(results::get_model))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
