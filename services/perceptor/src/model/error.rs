//! Model errors.

use scanward_id::{ImageSha, PodKey};
use thiserror::Error;

use super::image::ScanStatus;

/// Errors produced by model commands and by result aggregation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// No image with this digest is known.
    #[error("unknown image {0}")]
    UnknownImage(ImageSha),

    /// The image is not in a state that accepts this command.
    #[error("image {sha} is {status}, cannot {action}")]
    InvalidTransition {
        sha: ImageSha,
        status: ScanStatus,
        action: &'static str,
    },

    /// Consistency violation: `Complete` without results.
    #[error("image {0} is Complete but has no scan results")]
    MissingResults(ImageSha),

    /// Consistency violation: a pod references a digest the model does not hold.
    #[error("pod {pod} references unknown image {sha}")]
    DanglingImage { pod: PodKey, sha: ImageSha },
}

impl ModelError {
    /// Consistency errors indicate model corruption rather than a bad request.
    pub fn is_consistency_error(&self) -> bool {
        matches!(
            self,
            ModelError::MissingResults(_) | ModelError::DanglingImage { .. }
        )
    }
}
