//! Inventory endpoints: pod and image snapshots from cluster watchers and
//! registry crawlers.
//!
//! Payloads are validated in full before any command is sent, so a
//! malformed request never touches the model.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use scanward_id::{ImageSha, PodKey};
use serde::Deserialize;
use tracing::{debug, info};

use super::error::{ApiError, FieldError};
use crate::model::{ContainerSnapshot, ImageSpec, PodSnapshot};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    #[serde(default)]
    pub name: String,
    pub sha: String,
    #[serde(default)]
    pub docker_image: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Deserialize)]
pub struct ContainerPayload {
    pub name: String,
    pub image: ImagePayload,
}

#[derive(Debug, Deserialize)]
pub struct PodPayload {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub containers: Vec<ContainerPayload>,
}

impl ImagePayload {
    fn validate(self, field: &str, errors: &mut Vec<FieldError>) -> Option<ImageSpec> {
        match ImageSha::parse(&self.sha) {
            Ok(sha) => Some(ImageSpec {
                name: self.name,
                sha,
                docker_image: self.docker_image,
                priority: self.priority,
            }),
            Err(e) => {
                errors.push(FieldError::new(format!("{field}.sha"), e.to_string()));
                None
            }
        }
    }
}

impl PodPayload {
    fn validate(self, field: &str, errors: &mut Vec<FieldError>) -> Option<PodSnapshot> {
        let key = PodKey::new(self.namespace, self.name)
            .map_err(|e| errors.push(FieldError::new(field, e.to_string())))
            .ok();

        let mut containers = Vec::with_capacity(self.containers.len());
        for (i, container) in self.containers.into_iter().enumerate() {
            let image_field = format!("{field}.containers[{i}].image");
            if let Some(image) = container.image.validate(&image_field, errors) {
                containers.push(ContainerSnapshot {
                    name: container.name,
                    image,
                });
            }
        }

        Some(PodSnapshot {
            key: key?,
            containers,
        })
    }
}

fn rejected(errors: Vec<FieldError>) -> ApiError {
    ApiError::bad_request(
        "validation_failed",
        format!("{} invalid field(s)", errors.len()),
    )
    .with_details(errors)
}

fn validate_pods(payload: Vec<PodPayload>) -> Result<Vec<PodSnapshot>, ApiError> {
    let mut errors = Vec::new();
    let pods: Vec<PodSnapshot> = payload
        .into_iter()
        .enumerate()
        .filter_map(|(i, pod)| pod.validate(&format!("[{i}]"), &mut errors))
        .collect();
    if errors.is_empty() {
        Ok(pods)
    } else {
        Err(rejected(errors))
    }
}

fn validate_images(payload: Vec<ImagePayload>) -> Result<Vec<ImageSpec>, ApiError> {
    let mut errors = Vec::new();
    let images: Vec<ImageSpec> = payload
        .into_iter()
        .enumerate()
        .filter_map(|(i, image)| image.validate(&format!("[{i}]"), &mut errors))
        .collect();
    if errors.is_empty() {
        Ok(images)
    } else {
        Err(rejected(errors))
    }
}

/// `PUT /allpods`
pub async fn put_all_pods(
    State(state): State<AppState>,
    payload: Result<Json<Vec<PodPayload>>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload?;
    let pods = validate_pods(payload)?;
    let count = pods.len();

    state.model().replace_all_pods(pods).await?;
    info!(pods = count, "Pod inventory replaced");
    Ok(StatusCode::OK)
}

/// `PUT /allimages`
pub async fn put_all_images(
    State(state): State<AppState>,
    payload: Result<Json<Vec<ImagePayload>>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload?;
    let images = validate_images(payload)?;
    let count = images.len();

    state.model().replace_all_images(images).await?;
    info!(images = count, "Image registrations replaced");
    Ok(StatusCode::OK)
}

/// `POST /image`
pub async fn post_image(
    State(state): State<AppState>,
    payload: Result<Json<ImagePayload>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload?;
    let mut errors = Vec::new();
    let Some(image) = payload.validate("image", &mut errors) else {
        return Err(rejected(errors));
    };

    debug!(sha = %image.sha, name = %image.name, priority = image.priority, "Image registered");
    state.model().add_image(image).await?;
    Ok(StatusCode::OK)
}
