//! Scanward Perceptor
//!
//! Serves the inventory, scanner-worker and results APIs, runs the command
//! processor that owns the scan model, and reconciles scan state with the
//! Hub in the background.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use scanward_hub::{HubApi, HubClient};
use scanward_perceptor::{
    api, spawn_model_actor, AppState, Config, HubVersion, Model, Reconciler,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to SCANWARD_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting scanward perceptor");
    info!(
        listen_addr = %config.listen_addr,
        hub_url = %config.hub_url,
        concurrent_scan_limit = config.concurrent_scan_limit,
        scan_retry_limit = config.scan_retry_limit,
        "Configuration loaded"
    );

    let hub: Arc<dyn HubApi> = Arc::new(HubClient::new(config.hub_config())?);
    let hub_version = HubVersion::default();
    match hub_version.refresh(hub.as_ref()).await {
        Ok(version) => info!(hub_version = %version, "Hub reachable"),
        Err(e) => warn!(error = %e, "Hub not reachable at startup, continuing"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (model, processor_handle) = spawn_model_actor(
        Model::new(config.model_config()),
        config.mailbox_size,
        shutdown_rx.clone(),
    );

    let reconciler = Reconciler::new(model.clone(), Arc::clone(&hub), config.reconciler_config())
        .with_hub_version(hub_version.clone());
    let reconciler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            reconciler.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(AppState::new(model, hub, hub_version));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::pin!(server_handle);
    let server_done = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = &mut server_handle => {
            log_server_exit(result);
            true
        }
    };

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if !server_done {
        match tokio::time::timeout(shutdown_timeout, &mut server_handle).await {
            Ok(result) => log_server_exit(result),
            Err(_) => warn!("HTTP server did not shut down in time"),
        }
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, reconciler_handle).await {
        warn!(error = %e, "Reconciler did not shut down in time");
    }

    // The processor drains queued commands before it stops.
    if let Err(e) = tokio::time::timeout(shutdown_timeout, processor_handle).await {
        warn!(error = %e, "Command processor did not shut down in time");
    }

    info!("Perceptor shutdown complete");
    Ok(())
}

fn log_server_exit(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("Server exited normally"),
        Ok(Err(e)) => error!(error = %e, "Server error"),
        Err(e) => error!(error = %e, "Server task panicked"),
    }
}
