//! Application state shared across request handlers.

use std::sync::Arc;

use parking_lot::RwLock;
use scanward_hub::{HubApi, HubError};

use crate::commands::ModelHandle;

/// Reported when the Hub version has not been learned yet.
pub const UNKNOWN_HUB_VERSION: &str = "unknown";

/// Last Hub version seen, refreshed in the background.
///
/// Request handlers only read the cached value; they never call the Hub.
#[derive(Debug, Clone, Default)]
pub struct HubVersion {
    inner: Arc<RwLock<Option<String>>>,
}

impl HubVersion {
    pub fn get(&self) -> Option<String> {
        self.inner.read().clone()
    }

    /// The cached version, or `"unknown"`.
    pub fn get_or_unknown(&self) -> String {
        self.get()
            .unwrap_or_else(|| UNKNOWN_HUB_VERSION.to_string())
    }

    pub fn set(&self, version: impl Into<String>) {
        *self.inner.write() = Some(version.into());
    }

    /// Ask the Hub and cache the answer. A failed call keeps the old value.
    pub async fn refresh(&self, hub: &dyn HubApi) -> Result<String, HubError> {
        let version = hub.version().await?;
        self.set(version.clone());
        Ok(version)
    }
}

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    model: ModelHandle,
    hub: Arc<dyn HubApi>,
    hub_version: HubVersion,
}

impl AppState {
    pub fn new(model: ModelHandle, hub: Arc<dyn HubApi>, hub_version: HubVersion) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                model,
                hub,
                hub_version,
            }),
        }
    }

    /// Handle to the command processor.
    pub fn model(&self) -> &ModelHandle {
        &self.inner.model
    }

    pub fn hub(&self) -> &Arc<dyn HubApi> {
        &self.inner.hub
    }

    pub fn hub_version(&self) -> &HubVersion {
        &self.inner.hub_version
    }
}
