// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store adapter trait for durable conversations, participants and messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PalaverError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Conversation, ConversationFilter, ConversationPatch, ConversationStatus, Message,
    NewConversation, Participant,
};

/// Durable storage the chat core depends on.
///
/// Any call may fail with [`PalaverError::StorageUnavailable`]. Implementations
/// must make single-record operations atomic; in particular
/// [`transition_conversation`](ConversationStore::transition_conversation) is
/// the compare-and-swap that resolves claim races.
#[async_trait]
pub trait ConversationStore: PluginAdapter {
    /// Prepares the backend (migrations, connection).
    async fn initialize(&self) -> Result<(), PalaverError>;

    /// Flushes pending writes and releases the backend.
    async fn close(&self) -> Result<(), PalaverError>;

    // --- Participants ---

    /// Insert or replace the persisted snapshot of a participant.
    async fn upsert_participant(&self, participant: &Participant) -> Result<(), PalaverError>;

    async fn get_participant(&self, id: &str) -> Result<Option<Participant>, PalaverError>;

    // --- Conversations ---

    /// Create a conversation in `waiting` (or `active` if `agent_id` is set).
    ///
    /// If the client already has an open conversation, that one is returned
    /// unchanged instead of creating a duplicate.
    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, PalaverError>;

    /// Apply `patch` unconditionally. Fails with `NotFound` for unknown ids.
    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, PalaverError>;

    /// Apply `patch` only if the current status is one of `from`.
    ///
    /// Fails with `NotFound` for unknown ids and `InvalidConversationState`
    /// when the status does not match.
    async fn transition_conversation(
        &self,
        id: &str,
        from: &[ConversationStatus],
        patch: &ConversationPatch,
    ) -> Result<Conversation, PalaverError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, PalaverError>;

    /// The client's conversation in `waiting` or `active`, if any.
    async fn find_active_conversation(
        &self,
        client_id: &str,
    ) -> Result<Option<Conversation>, PalaverError>;

    /// Conversations matching `filter`, oldest first.
    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, PalaverError>;

    // --- Messages ---

    async fn append_message(&self, message: &Message) -> Result<Message, PalaverError>;

    /// Messages of a conversation ordered by `created_at` then `message_id`.
    /// With `since`, only messages created strictly after it.
    async fn list_messages(
        &self,
        conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, PalaverError>;
}
