// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory conversation store for deterministic testing.
//!
//! `MemoryStore` implements `ConversationStore` with the same atomicity and
//! duplicate-open semantics as the SQLite store, plus switches that make
//! calls fail with `StorageUnavailable` to exercise degraded paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use palaver_core::types::{
    AdapterType, Conversation, ConversationFilter, ConversationPatch, ConversationStatus,
    HealthStatus, Message, NewConversation, Participant,
};
use palaver_core::{ConversationStore, PalaverError, PluginAdapter};

#[derive(Default)]
struct State {
    participants: HashMap<String, Participant>,
    /// Insertion order doubles as `started_at` order.
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

impl State {
    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|c| c.conversation_id == id)
    }
}

/// A store that keeps everything in process memory.
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    fail_message_writes: AtomicBool,
    appended: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            unavailable: AtomicBool::new(false),
            fail_message_writes: AtomicBool::new(false),
            appended: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with `StorageUnavailable` while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only `append_message` fail while `true`.
    pub fn set_fail_message_writes(&self, fail: bool) {
        self.fail_message_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of messages successfully appended.
    pub fn appended_count(&self) -> usize {
        self.appended.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored conversation.
    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().await.conversations.clone()
    }

    /// Insert a message with no validation, for seeding history.
    pub async fn seed_message(&self, message: Message) {
        self.state.lock().await.messages.push(message);
    }

    fn check_available(&self) -> Result<(), PalaverError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PalaverError::storage("memory store marked unavailable"));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, PalaverError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Ok(HealthStatus::Unhealthy("marked unavailable".into()));
        }
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), PalaverError> {
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn initialize(&self) -> Result<(), PalaverError> {
        self.check_available()
    }

    async fn close(&self) -> Result<(), PalaverError> {
        Ok(())
    }

    async fn upsert_participant(&self, participant: &Participant) -> Result<(), PalaverError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let mut snapshot = participant.clone();
        snapshot.connection_id = None;
        if let Some(existing) = state.participants.get(&snapshot.participant_id) {
            if snapshot.last_seen.is_none() {
                snapshot.last_seen = existing.last_seen;
            }
            if snapshot.contact.is_none() {
                snapshot.contact = existing.contact.clone();
            }
        }
        state
            .participants
            .insert(snapshot.participant_id.clone(), snapshot);
        Ok(())
    }

    async fn get_participant(&self, id: &str) -> Result<Option<Participant>, PalaverError> {
        self.check_available()?;
        Ok(self.state.lock().await.participants.get(id).cloned())
    }

    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, PalaverError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if let Some(open) = state
            .conversations
            .iter()
            .find(|c| c.client_id == new.client_id && c.status.is_open())
        {
            return Ok(open.clone());
        }
        let conversation = Conversation {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            status: if new.agent_id.is_some() {
                ConversationStatus::Active
            } else {
                ConversationStatus::Waiting
            },
            client_id: new.client_id,
            client_name: new.client_name,
            agent_id: new.agent_id,
            category: new.category,
            started_at: Utc::now(),
            ended_at: None,
            rating: None,
            feedback: None,
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, PalaverError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let conversation = state
            .conversation_mut(id)
            .ok_or_else(|| PalaverError::not_found("conversation", id))?;
        patch.apply_to(conversation);
        Ok(conversation.clone())
    }

    async fn transition_conversation(
        &self,
        id: &str,
        from: &[ConversationStatus],
        patch: &ConversationPatch,
    ) -> Result<Conversation, PalaverError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let conversation = state
            .conversation_mut(id)
            .ok_or_else(|| PalaverError::not_found("conversation", id))?;
        if !from.contains(&conversation.status) {
            return Err(PalaverError::InvalidConversationState(format!(
                "conversation {id} is {}",
                conversation.status
            )));
        }
        patch.apply_to(conversation);
        Ok(conversation.clone())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, PalaverError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .conversations
            .iter()
            .find(|c| c.conversation_id == id)
            .cloned())
    }

    async fn find_active_conversation(
        &self,
        client_id: &str,
    ) -> Result<Option<Conversation>, PalaverError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .conversations
            .iter()
            .find(|c| c.client_id == client_id && c.status.is_open())
            .cloned())
    }

    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, PalaverError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .conversations
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn append_message(&self, message: &Message) -> Result<Message, PalaverError> {
        self.check_available()?;
        if self.fail_message_writes.load(Ordering::SeqCst) {
            return Err(PalaverError::storage("message writes disabled"));
        }
        let mut state = self.state.lock().await;
        if !state
            .conversations
            .iter()
            .any(|c| c.conversation_id == message.conversation_id)
        {
            return Err(PalaverError::not_found(
                "conversation",
                message.conversation_id.clone(),
            ));
        }
        state.messages.push(message.clone());
        self.appended.fetch_add(1, Ordering::SeqCst);
        Ok(message.clone())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, PalaverError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| since.is_none_or(|s| m.created_at > s))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        Ok(messages)
    }
}
