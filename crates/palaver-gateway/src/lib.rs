// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection gateway: WebSocket transport and read-only REST for the chat
//! service.
//!
//! Each socket gets a reader loop that dispatches request frames to the
//! [`ChatService`] and a writer task that drains the connection's outbound
//! queue. The gateway runs as a background task until its shutdown token is
//! cancelled.

pub mod handlers;
pub mod server;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use palaver_chat::ChatService;
use palaver_config::model::PalaverConfig;
use palaver_core::{AdapterType, HealthStatus, PalaverError, PluginAdapter};

use crate::server::{GatewayState, MetricsRender};
use crate::ws::ConnectionSettings;

/// The HTTP/WebSocket front end.
pub struct Gateway {
    host: String,
    port: u16,
    settings: ConnectionSettings,
    service: Arc<ChatService>,
    prometheus_render: Option<MetricsRender>,
    server_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(config: &PalaverConfig, service: Arc<ChatService>) -> Self {
        Self {
            host: config.gateway.host.clone(),
            port: config.gateway.port,
            settings: ConnectionSettings {
                outbound_buffer: config.gateway.outbound_buffer,
                heartbeat_interval: config.chat.heartbeat_interval(),
                heartbeat_timeout: config.chat.heartbeat_timeout(),
            },
            service,
            prometheus_render: None,
            server_handle: Mutex::new(None),
        }
    }

    /// Serve the Prometheus exposition rendered by `render` on `/metrics`.
    pub fn with_metrics(mut self, render: MetricsRender) -> Self {
        self.prometheus_render = Some(render);
        self
    }

    /// Bind and start serving in the background. Returns the bound address.
    ///
    /// Cancelling `shutdown` stops accepting, closes every socket and lets
    /// the server task finish.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<SocketAddr, PalaverError> {
        let listener = server::bind(&self.host, self.port).await?;
        let addr = listener
            .local_addr()
            .map_err(|e| PalaverError::Internal(format!("gateway address unavailable: {e}")))?;
        let state = GatewayState::new(
            self.service.clone(),
            self.settings,
            shutdown,
            self.prometheus_render.clone(),
        );

        let handle = tokio::spawn(async move {
            if let Err(e) = server::serve(listener, state).await {
                tracing::error!(error = %e, "gateway server error");
            }
        });
        *self.server_handle.lock().await = Some(handle);

        tracing::info!(%addr, "gateway started");
        Ok(addr)
    }

    /// Wait for a started server to finish.
    pub async fn wait(&self) {
        let handle = self.server_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "gateway task ended abnormally");
            }
        }
    }
}

#[async_trait]
impl PluginAdapter for Gateway {
    fn name(&self) -> &str {
        "gateway"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Gateway
    }

    async fn health_check(&self) -> Result<HealthStatus, PalaverError> {
        let handle = self.server_handle.lock().await;
        Ok(match handle.as_ref() {
            Some(h) if !h.is_finished() => HealthStatus::Healthy,
            Some(_) => HealthStatus::Unhealthy("server stopped".to_string()),
            None => HealthStatus::Unhealthy("server not started".to_string()),
        })
    }

    async fn shutdown(&self) -> Result<(), PalaverError> {
        let mut handle = self.server_handle.lock().await;
        if let Some(h) = handle.take() {
            h.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_test_utils::{MemoryStore, test_config};

    fn gateway() -> Gateway {
        let mut config = test_config();
        config.gateway.port = 0;
        let service = Arc::new(ChatService::new(
            Arc::new(MemoryStore::new()),
            config.chat.clone(),
        ));
        Gateway::new(&config, service)
    }

    #[test]
    fn gateway_identity() {
        let gateway = gateway();
        assert_eq!(gateway.name(), "gateway");
        assert_eq!(gateway.adapter_type(), AdapterType::Gateway);
        assert_eq!(gateway.version(), semver::Version::new(0, 1, 0));
        assert_eq!(gateway.settings.heartbeat_interval.as_secs(), 1);
    }

    #[tokio::test]
    async fn health_check_before_start() {
        match gateway().health_check().await.unwrap() {
            HealthStatus::Unhealthy(msg) => assert!(msg.contains("not started")),
            other => panic!("expected Unhealthy before start, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_then_cancel() {
        let gateway = gateway();
        let shutdown = CancellationToken::new();
        let addr = gateway.start(shutdown.clone()).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(gateway.health_check().await.unwrap(), HealthStatus::Healthy);

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), gateway.wait())
            .await
            .expect("gateway should stop");
    }
}
