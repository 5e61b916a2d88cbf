//! Configuration for the perceptor.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use scanward_hub::{CircuitBreakerConfig, HubClientConfig, RetryPolicy};

use crate::model::ModelConfig;
use crate::reconciler::ReconcilerConfig;

const PREFIX: &str = "SCANWARD_";

/// Perceptor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,

    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Hub base URL.
    pub hub_url: String,

    /// Bearer token sent to the Hub.
    pub hub_token: Option<String>,

    pub hub_timeout: Duration,
    pub hub_failure_threshold: u32,
    pub hub_cooldown: Duration,
    pub hub_max_retries: u32,

    /// Maximum images leased at once.
    pub concurrent_scan_limit: usize,

    /// Reverts before an image moves to `Error`.
    pub scan_retry_limit: u32,

    pub scan_client_timeout: Duration,
    pub hub_analysis_timeout: Duration,

    pub hub_poll_interval: Duration,
    pub timeout_sweep_interval: Duration,
    pub gc_interval: Duration,

    /// Command queue capacity.
    pub mailbox_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let secs = |name: &str, default: u64| -> Result<Duration> {
            let value: u64 = parse(name, get(name), default)?;
            if value == 0 {
                bail!("{PREFIX}{name} must be greater than zero");
            }
            Ok(Duration::from_secs(value))
        };

        let concurrent_scan_limit: usize =
            parse("CONCURRENT_SCAN_LIMIT", get("CONCURRENT_SCAN_LIMIT"), 2)?;
        if concurrent_scan_limit == 0 {
            bail!("{PREFIX}CONCURRENT_SCAN_LIMIT must be at least 1");
        }
        let scan_retry_limit: u32 = parse("SCAN_RETRY_LIMIT", get("SCAN_RETRY_LIMIT"), 3)?;
        if scan_retry_limit == 0 {
            bail!("{PREFIX}SCAN_RETRY_LIMIT must be at least 1");
        }
        let hub_failure_threshold: u32 =
            parse("HUB_FAILURE_THRESHOLD", get("HUB_FAILURE_THRESHOLD"), 5)?;
        if hub_failure_threshold == 0 {
            bail!("{PREFIX}HUB_FAILURE_THRESHOLD must be at least 1");
        }

        Ok(Self {
            listen_addr: parse(
                "LISTEN_ADDR",
                get("LISTEN_ADDR"),
                SocketAddr::from(([127, 0, 0, 1], 3001)),
            )?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            hub_url: get("HUB_URL").unwrap_or_else(|| "http://127.0.0.1:8443".to_string()),
            hub_token: get("HUB_TOKEN"),
            hub_timeout: secs("HUB_TIMEOUT_SECS", 20)?,
            hub_failure_threshold,
            hub_cooldown: secs("HUB_COOLDOWN_SECS", 30)?,
            hub_max_retries: parse("HUB_MAX_RETRIES", get("HUB_MAX_RETRIES"), 2)?,
            concurrent_scan_limit,
            scan_retry_limit,
            scan_client_timeout: secs("SCAN_CLIENT_TIMEOUT_SECS", 30 * 60)?,
            hub_analysis_timeout: secs("HUB_ANALYSIS_TIMEOUT_SECS", 2 * 60 * 60)?,
            hub_poll_interval: secs("HUB_POLL_INTERVAL_SECS", 20)?,
            timeout_sweep_interval: secs("TIMEOUT_SWEEP_INTERVAL_SECS", 60)?,
            gc_interval: secs("GC_INTERVAL_SECS", 300)?,
            mailbox_size: parse("MAILBOX_SIZE", get("MAILBOX_SIZE"), 1024)?,
        })
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            concurrent_scan_limit: self.concurrent_scan_limit,
            retry_limit: self.scan_retry_limit,
            scan_client_timeout: self.scan_client_timeout,
            hub_analysis_timeout: self.hub_analysis_timeout,
        }
    }

    pub fn hub_config(&self) -> HubClientConfig {
        HubClientConfig {
            base_url: self.hub_url.clone(),
            token: self.hub_token.clone(),
            timeout: self.hub_timeout,
            breaker: CircuitBreakerConfig {
                failure_threshold: self.hub_failure_threshold,
                cooldown: self.hub_cooldown,
            },
            retry: RetryPolicy {
                max_retries: self.hub_max_retries,
                ..RetryPolicy::default()
            },
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            hub_poll_interval: self.hub_poll_interval,
            timeout_sweep_interval: self.timeout_sweep_interval,
            gc_interval: self.gc_interval,
        }
    }
}

fn parse<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid {PREFIX}{name}: {raw:?}")),
        None => Ok(default),
    }
}
