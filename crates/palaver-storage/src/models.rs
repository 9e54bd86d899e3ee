// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! The canonical types are defined in `palaver-core::types` for use across
//! the store trait boundary. This module re-exports them for convenience
//! within the storage crate.

pub use palaver_core::types::{
    Conversation, ConversationFilter, ConversationPatch, ConversationStatus, Message,
    NewConversation, Participant,
};
