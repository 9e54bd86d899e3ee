// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `palaver serve` command implementation.
//!
//! Opens the SQLite store, recovers conversations left open by a previous
//! run, starts the idle expiry loop and the gateway, then waits for
//! SIGINT/SIGTERM and shuts everything down in order.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use palaver_chat::{ChatService, shutdown};
use palaver_config::model::PalaverConfig;
use palaver_core::{ConversationStore, PalaverError, PluginAdapter};
use palaver_gateway::Gateway;
use palaver_gateway::server::MetricsRender;
use palaver_storage::SqliteStore;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the `palaver serve` command until a shutdown signal arrives.
pub async fn run_serve(config: PalaverConfig) -> Result<(), PalaverError> {
    init_tracing(&config.server.log_level);
    info!("starting palaver serve");

    let store = Arc::new(SqliteStore::new(config.storage.clone()));
    store.initialize().await?;
    info!(path = %config.storage.database_path, "storage ready");

    let prometheus_render = init_metrics(&config);

    let service = Arc::new(ChatService::new(store.clone(), config.chat.clone()));
    let report = service.recover().await?;
    info!(
        resumed = report.resumed,
        expired = report.expired,
        "startup recovery complete"
    );

    let cancel = shutdown::install_signal_handler();
    let expiry = tokio::spawn(service.clone().run_expiry_loop(cancel.clone()));

    let mut gateway = Gateway::new(&config, service.clone());
    if let Some(render) = prometheus_render {
        gateway = gateway.with_metrics(render);
    }
    let addr = match gateway.start(cancel.clone()).await {
        Ok(addr) => addr,
        Err(e) => {
            cancel.cancel();
            shutdown::drain_tasks(vec![expiry], DRAIN_TIMEOUT).await;
            store.shutdown().await?;
            return Err(e);
        }
    };
    info!(%addr, "palaver serving");

    cancel.cancelled().await;
    info!("shutdown requested, draining");

    if tokio::time::timeout(DRAIN_TIMEOUT, gateway.wait()).await.is_err() {
        warn!("gateway did not stop in time, aborting");
        gateway.shutdown().await?;
    }
    shutdown::drain_tasks(vec![expiry], DRAIN_TIMEOUT).await;
    store.shutdown().await?;

    info!("palaver serve shutdown complete");
    Ok(())
}

/// Install the Prometheus recorder when metrics are enabled and compiled in.
#[cfg(feature = "prometheus")]
fn init_metrics(config: &PalaverConfig) -> Option<MetricsRender> {
    if !config.gateway.metrics_enabled {
        debug!("prometheus metrics disabled by configuration");
        return None;
    }
    match palaver_prometheus::PrometheusAdapter::new() {
        Ok(adapter) => {
            info!("prometheus metrics enabled");
            let handle = adapter.handle().clone();
            Some(Arc::new(move || handle.render()) as MetricsRender)
        }
        Err(e) => {
            warn!(error = %e, "prometheus initialization failed, continuing without metrics");
            None
        }
    }
}

#[cfg(not(feature = "prometheus"))]
fn init_metrics(_config: &PalaverConfig) -> Option<MetricsRender> {
    debug!("prometheus support not compiled in");
    None
}

/// Initializes the tracing subscriber with the given log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("palaver={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
