// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-only REST handlers for dashboards.
//!
//! Handles GET /health, /metrics, /v1/presence, /v1/conversations and a
//! conversation's transcript.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palaver_core::{
    Conversation, ConversationFilter, ConversationStatus, ConversationStore, ErrorKind,
    HealthStatus, Message, PalaverError, Participant, PluginAdapter, Role,
};

use crate::server::GatewayState;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub error: String,
}

/// A [`PalaverError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub PalaverError);

impl From<PalaverError> for ApiError {
    fn from(e: PalaverError) -> Self {
        Self(e)
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidConversationState => StatusCode::CONFLICT,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ConnectionLost => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        (
            status_for(kind),
            Json(ErrorResponse {
                kind,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub storage: String,
    pub online_clients: usize,
    pub online_agents: usize,
}

/// GET /health
///
/// 200 while the store answers, 503 otherwise.
pub async fn get_health(State(state): State<GatewayState>) -> Response {
    let storage = match state.service.store().health_check().await {
        Ok(status) => status,
        Err(e) => HealthStatus::Unhealthy(e.to_string()),
    };
    let (status, code, storage) = match storage {
        HealthStatus::Healthy => ("ok", StatusCode::OK, "healthy".to_string()),
        HealthStatus::Degraded(why) => ("degraded", StatusCode::OK, format!("degraded: {why}")),
        HealthStatus::Unhealthy(why) => (
            "unavailable",
            StatusCode::SERVICE_UNAVAILABLE,
            format!("unhealthy: {why}"),
        ),
    };
    let presence = state.service.presence();
    let body = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
        storage,
        online_clients: presence.online_count(Role::Client),
        online_agents: presence.online_count(Role::Agent),
    };
    (code, Json(body)).into_response()
}

/// GET /metrics
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PresenceQuery {
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub participants: Vec<Participant>,
}

/// GET /v1/presence?role=
pub async fn get_presence(
    State(state): State<GatewayState>,
    Query(query): Query<PresenceQuery>,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        participants: state.service.online(query.role),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationQuery {
    #[serde(default)]
    pub status: Option<ConversationStatus>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<Conversation>,
}

/// GET /v1/conversations?status=&agent_id=&client_id=
pub async fn list_conversations(
    State(state): State<GatewayState>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let filter = ConversationFilter {
        status: query.status,
        agent_id: query.agent_id,
        client_id: query.client_id,
    };
    let conversations = state.service.conversations(&filter).await?;
    Ok(Json(ConversationListResponse { conversations }))
}

/// GET /v1/conversations/{id}
pub async fn get_conversation(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(state.service.conversation(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub conversation_id: String,
    pub messages: Vec<Message>,
}

/// GET /v1/conversations/{id}/messages?since=
pub async fn list_messages(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessageListResponse>, ApiError> {
    // 404 for unknown ids rather than an empty transcript.
    state.service.conversation(&id).await?;
    let messages = state.service.store().list_messages(&id, query.since).await?;
    Ok(Json(MessageListResponse {
        conversation_id: id,
        messages,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_status() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::InvalidConversationState),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(ErrorKind::InvalidRequest), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::StorageUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn api_error_uses_kind_status() {
        let response = ApiError(PalaverError::not_found("conversation", "x")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn error_response_serializes() {
        let body = ErrorResponse {
            kind: ErrorKind::InvalidRequest,
            error: "rating must be between 1 and 5".into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"kind\":\"invalid_request\""));
        assert!(json.contains("rating must be between 1 and 5"));
    }

    #[test]
    fn conversation_query_parses_status() {
        let query: ConversationQuery =
            serde_json::from_str(r#"{"status": "waiting"}"#).unwrap();
        assert_eq!(query.status, Some(ConversationStatus::Waiting));
        assert!(query.agent_id.is_none());
    }
}
