// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Palaver chat relay.
//!
//! This crate provides the data model (participants, conversations,
//! messages), the error taxonomy, the events pushed to connected
//! participants, and the [`ConversationStore`] trait the chat core
//! persists through.

pub mod connection;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use connection::{ConnectionHandle, Outbound};
pub use error::{ErrorKind, PalaverError};
pub use events::{EndReason, PresenceEvent, ServerEvent};
pub use types::{
    AdapterType, Conversation, ConversationFilter, ConversationPatch, ConversationStatus,
    HealthStatus, Message, MessageType, NewConversation, Participant, Role, SenderRole,
    SYSTEM_SENDER_ID,
};

pub use traits::{ConversationStore, PluginAdapter};
