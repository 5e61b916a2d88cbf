//! # scanward-hub
//!
//! Client for the external scan-analysis service ("the Hub").
//!
//! Every outbound call passes through three layers, outermost first:
//!
//! ```text
//! retry (BackoffPolicy)  ->  CircuitBreaker  ->  per-call timeout  ->  HTTP
//! ```
//!
//! The breaker fails calls immediately while the Hub is considered down, so a
//! Hub outage stalls only result finalization and never the callers that
//! schedule or inventory work.
//!
//! ## Modules
//!
//! - `breaker`: Closed/Open/HalfOpen circuit breaker
//! - `client`: `HubApi` trait and the reqwest-backed `HubClient`
//! - `mock`: in-memory Hub used by tests across the workspace
//! - `retry`: exponential backoff for transient failures
//! - `types`: Hub wire types

pub mod breaker;
pub mod client;
pub mod error;
pub mod mock;
pub mod retry;
pub mod types;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{spawn_scan_outcome, HubApi, HubClient, HubClientConfig};
pub use error::HubError;
pub use mock::MockHub;
pub use retry::{BackoffPolicy, RetryPolicy};
pub use types::{HubPolicyStatus, HubScanOutcome, HubScanReport};
