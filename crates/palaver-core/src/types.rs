// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data model shared by the store, the chat core and the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Sender id used for messages generated by the relay itself.
pub const SYSTEM_SENDER_ID: &str = "system";

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`PluginAdapter`](crate::PluginAdapter).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Store,
    Gateway,
    Observability,
}

/// Which side of a conversation a connected participant is on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Agent,
}

/// Author of a message. `System` covers relay-generated notices.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Client,
    Agent,
    System,
}

impl From<Role> for SenderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Client => SenderRole::Client,
            Role::Agent => SenderRole::Agent,
        }
    }
}

/// Conversation state machine: `waiting -> active -> ended`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Waiting,
    Active,
    Ended,
}

impl ConversationStatus {
    /// States in which a client may have at most one conversation.
    pub const OPEN: [ConversationStatus; 2] = [ConversationStatus::Waiting, ConversationStatus::Active];

    /// Returns true for `waiting` and `active`.
    pub fn is_open(self) -> bool {
        self != ConversationStatus::Ended
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    System,
}

/// A client or agent known to the relay.
///
/// `connection_id` is only set while the participant is connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Participant {
    /// A participant with no contact details and no connection.
    pub fn new(
        participant_id: impl Into<String>,
        display_name: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            role,
            contact: None,
            connection_id: None,
            last_seen: None,
        }
    }

    /// Returns true while a connection is bound to this participant.
    pub fn is_online(&self) -> bool {
        self.connection_id.is_some()
    }
}

/// A support conversation between one client and (once claimed) one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub client_id: String,
    pub client_name: String,
    pub agent_id: Option<String>,
    pub status: ConversationStatus,
    pub category: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub feedback: Option<String>,
}

impl Conversation {
    /// Returns true if `participant_id` is the client or the assigned agent.
    pub fn involves(&self, participant_id: &str) -> bool {
        self.client_id == participant_id || self.agent_id.as_deref() == Some(participant_id)
    }

    /// The other party of `participant_id`, if any is assigned.
    pub fn counterpart(&self, participant_id: &str) -> Option<&str> {
        if self.client_id == participant_id {
            self.agent_id.as_deref()
        } else if self.agent_id.as_deref() == Some(participant_id) {
            Some(&self.client_id)
        } else {
            None
        }
    }
}

/// Input for [`ConversationStore::create_conversation`](crate::ConversationStore::create_conversation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub client_id: String,
    pub client_name: String,
    pub agent_id: Option<String>,
    pub category: String,
}

/// Partial update of a conversation record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationPatch {
    pub status: Option<ConversationStatus>,
    pub agent_id: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    /// `Some(None)` clears the feedback; `None` leaves it as is.
    pub feedback: Option<Option<String>>,
}

impl ConversationPatch {
    /// `waiting -> active` with the claiming agent.
    pub fn claim(agent_id: impl Into<String>) -> Self {
        Self {
            status: Some(ConversationStatus::Active),
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }

    /// Any open state `-> ended`.
    pub fn end(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ConversationStatus::Ended),
            ended_at: Some(at),
            ..Self::default()
        }
    }

    /// Rating and feedback; the only fields writable after `ended`.
    ///
    /// Both are written together, so a new rating never keeps the feedback
    /// of an earlier one.
    pub fn rating(rating: u8, feedback: Option<String>) -> Self {
        Self {
            rating: Some(rating),
            feedback: Some(feedback),
            ..Self::default()
        }
    }

    /// Apply the patch to an in-memory record.
    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(status) = self.status {
            conversation.status = status;
        }
        if let Some(agent_id) = &self.agent_id {
            conversation.agent_id = Some(agent_id.clone());
        }
        if let Some(ended_at) = self.ended_at {
            conversation.ended_at = Some(ended_at);
        }
        if let Some(rating) = self.rating {
            conversation.rating = Some(rating);
        }
        if let Some(feedback) = &self.feedback {
            conversation.feedback = feedback.clone();
        }
    }
}

/// Filter for listing conversations. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    pub agent_id: Option<String>,
    pub client_id: Option<String>,
}

impl ConversationFilter {
    pub fn status(status: ConversationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, conversation: &Conversation) -> bool {
        self.status.is_none_or(|s| s == conversation.status)
            && self
                .agent_id
                .as_deref()
                .is_none_or(|a| conversation.agent_id.as_deref() == Some(a))
            && self
                .client_id
                .as_deref()
                .is_none_or(|c| conversation.client_id == c)
    }
}

/// An immutable chat message.
///
/// Ordering within a conversation is `created_at`, then `message_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Sort key matching the store's ordering.
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, &self.message_id)
    }
}
