//! Error types for identifier parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identifier string is empty.
    #[error("identifier cannot be empty")]
    Empty,

    /// A digest had the wrong number of hex characters.
    #[error("digest must be {expected} hex characters, got {actual}")]
    InvalidDigestLength { expected: usize, actual: usize },

    /// A digest contained something other than hex characters.
    #[error("digest is not valid hex: {0}")]
    InvalidDigest(String),

    /// A digest carried an algorithm prefix other than `sha256:`.
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// A pod key was not of the form `namespace/name`.
    #[error("invalid pod key '{0}': expected namespace/name")]
    InvalidPodKey(String),

    /// The prefix of a prefixed identifier did not match.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The ULID portion of the identifier is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error concerns an image digest.
    pub fn is_digest_error(&self) -> bool {
        matches!(
            self,
            IdError::InvalidDigestLength { .. }
                | IdError::InvalidDigest(_)
                | IdError::UnsupportedAlgorithm(_)
        )
    }
}
