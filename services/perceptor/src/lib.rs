//! Scanward Perceptor
//!
//! The perceptor tracks which container images run in a cluster, schedules
//! each distinct image for vulnerability scanning under a global
//! concurrency budget, and reconciles Hub analysis results back into a
//! per-pod security posture.
//!
//! ## Architecture
//!
//! ```text
//! inventory producers ─┐                      ┌─ GET /scanresults
//! scanner workers ─────┼─▶ ModelHandle ─▶ ModelActor (owns Model + Scheduler)
//! Reconciler ──────────┘        ▲
//!     │                         └── set results / hub failures / sweeps / gc
//!     └─▶ HubApi (breaker + timeout + retry)
//! ```
//!
//! ## Modules
//!
//! - `model`: pods, images, scan status and the transition rules
//! - `scheduler`: priority/FIFO queue and the lease table
//! - `commands`: the command set and the typed `ModelHandle`
//! - `actors`: actor framework and the command processor
//! - `aggregator`: per-pod and per-image scan summaries
//! - `annotations`: cluster labels and annotations derived from summaries
//! - `reconciler`: Hub polling, lease sweeps and garbage collection
//! - `api`: HTTP surface

pub mod actors;
pub mod aggregator;
pub mod annotations;
pub mod api;
pub mod commands;
pub mod config;
pub mod model;
pub mod reconciler;
pub mod scheduler;
pub mod state;

pub use actors::spawn_model_actor;
pub use commands::{CommandError, ModelHandle};
pub use config::Config;
pub use model::{Model, ModelConfig};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use state::{AppState, HubVersion};
