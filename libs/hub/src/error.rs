//! Hub client errors.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by Hub calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    /// The breaker is open; no request was sent.
    #[error("hub circuit breaker is open")]
    CircuitOpen,

    /// The call did not complete within the per-call timeout.
    #[error("hub call timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure.
    #[error("hub transport error: {0}")]
    Transport(String),

    /// The Hub answered with a non-success status.
    #[error("hub returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The Hub answered with a body we could not decode.
    #[error("invalid hub response: {0}")]
    Decode(String),

    /// The client could not be constructed.
    #[error("hub client configuration error: {0}")]
    Config(String),
}

impl HubError {
    /// Transient failures are retried and count against the breaker. A 429
    /// is the Hub shedding load and is treated like a 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            HubError::Timeout(_) | HubError::Transport(_) => true,
            HubError::Status { status, .. } => *status >= 500 || *status == 429,
            HubError::CircuitOpen | HubError::Decode(_) | HubError::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            HubError::Decode(e.to_string())
        } else {
            HubError::Transport(e.to_string())
        }
    }
}
