//! # scanward-id
//!
//! Typed identifiers shared by the scanward services.
//!
//! ## Identifier Kinds
//!
//! - [`ImageSha`]: content digest of a container image. This is the only key
//!   an image is ever known by; two observations with the same digest are the
//!   same image no matter which repository or tag they were seen under.
//! - [`PodKey`]: `namespace/name` identity of a pod. Immutable once a pod is
//!   created; the pod's containers may change, its key never does.
//! - [`RequestId`]: ULID-backed identifier attached to API error responses.
//!
//! All identifiers have a canonical string form with strict parsing and
//! serialize as that string.

mod error;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
