// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::{routing::get, Router};
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use palaver_chat::ChatService;
use palaver_core::PalaverError;

use crate::handlers;
use crate::ws::{self, ConnectionSettings};

/// Render function for the Prometheus text exposition.
pub type MetricsRender = Arc<dyn Fn() -> String + Send + Sync>;

/// Health state for the unauthenticated health/metrics endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Optional Prometheus metrics render function.
    pub prometheus_render: Option<MetricsRender>,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub service: Arc<ChatService>,
    pub settings: ConnectionSettings,
    /// Close switch of every live socket, by connection id.
    pub connections: Arc<DashMap<String, CancellationToken>>,
    /// Parent of every connection's close switch.
    pub shutdown: CancellationToken,
    pub health: HealthState,
}

impl GatewayState {
    pub fn new(
        service: Arc<ChatService>,
        settings: ConnectionSettings,
        shutdown: CancellationToken,
        prometheus_render: Option<MetricsRender>,
    ) -> Self {
        Self {
            service,
            settings,
            connections: Arc::new(DashMap::new()),
            shutdown,
            health: HealthState {
                start_time: std::time::Instant::now(),
                prometheus_render,
            },
        }
    }
}

/// All gateway routes:
/// - GET /ws (identity via query params from the auth layer)
/// - GET /health, GET /metrics
/// - GET /v1/presence, /v1/conversations, /v1/conversations/{id},
///   /v1/conversations/{id}/messages
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(handlers::get_health))
        .route("/metrics", get(handlers::get_metrics))
        .route("/v1/presence", get(handlers::get_presence))
        .route("/v1/conversations", get(handlers::list_conversations))
        .route("/v1/conversations/{id}", get(handlers::get_conversation))
        .route(
            "/v1/conversations/{id}/messages",
            get(handlers::list_messages),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the listening socket.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, PalaverError> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|e| PalaverError::Internal(format!("failed to bind gateway to {addr}: {e}")))
}

/// Serve until the state's shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<(), PalaverError> {
    let shutdown = state.shutdown.clone();
    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".into());
    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| PalaverError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway stopped");
    Ok(())
}
