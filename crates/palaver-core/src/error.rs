// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Palaver chat relay.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// The primary error type used across the store trait, the chat core and the gateway.
#[derive(Debug, Error)]
pub enum PalaverError {
    /// A referenced conversation, participant or message does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation is not permitted in the conversation's current state
    /// (sending into an ended conversation, claiming an already-claimed one).
    #[error("invalid conversation state: {0}")]
    InvalidConversationState(String),

    /// The store backend could not complete the call.
    #[error("storage unavailable: {source}")]
    StorageUnavailable {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The transport to a participant went away.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The request itself is malformed (bad rating, wrong role for the operation).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors (invalid TOML, failed validation).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PalaverError {
    /// Shorthand for a [`PalaverError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wrap any backend error as [`PalaverError::StorageUnavailable`].
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::StorageUnavailable {
            source: source.into(),
        }
    }

    /// The structured reason presented to front ends.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidConversationState(_) => ErrorKind::InvalidConversationState,
            Self::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            Self::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Config(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Serializable error classification returned across the API boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidConversationState,
    StorageUnavailable,
    ConnectionLost,
    InvalidRequest,
    Internal,
}
