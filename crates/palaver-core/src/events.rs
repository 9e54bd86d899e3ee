// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-initiated events pushed to connected participants.
//!
//! Serialized as JSON objects tagged by `type`, e.g.
//! ```json
//! {"type": "message", "message": {"message_id": "...", "content": "Bonjour", ...}}
//! {"type": "conversation_ended", "conversation": {...}, "reason": "idle_timeout"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::{Conversation, Message, Participant, Role};

/// Why a conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ClosedByClient,
    ClosedByAgent,
    IdleTimeout,
}

impl EndReason {
    /// The reason recorded when a participant of `role` closes the conversation.
    pub fn closed_by(role: Role) -> Self {
        match role {
            Role::Client => EndReason::ClosedByClient,
            Role::Agent => EndReason::ClosedByAgent,
        }
    }
}

/// A participant came online or went offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub participant: Participant,
    pub online: bool,
}

impl PresenceEvent {
    /// Dashboard topic such as `client:online` or `agent:offline`.
    pub fn topic(&self) -> String {
        let state = if self.online { "online" } else { "offline" };
        format!("{}:{state}", self.participant.role)
    }
}

/// Events pushed from the relay to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake complete. `conversation` is the resumed open conversation, if any.
    Connected {
        participant: Participant,
        conversation: Option<Conversation>,
    },
    /// Replayed transcript, ordered.
    History {
        conversation_id: String,
        messages: Vec<Message>,
    },
    /// A message relayed from the other party (or the system).
    Message { message: Message },
    /// Acknowledges the sender's own message.
    MessageSent {
        message: Message,
        persisted: bool,
        warning: Option<ErrorKind>,
    },
    Typing {
        conversation_id: String,
        sender_id: String,
    },
    /// A new conversation is waiting in the agent queue.
    ConversationWaiting { conversation: Conversation },
    ConversationClaimed { conversation: Conversation },
    ConversationEnded {
        conversation: Conversation,
        reason: EndReason,
    },
    ConversationRated { conversation: Conversation },
    Presence { event: PresenceEvent },
    /// Reply to a presence query.
    Online { participants: Vec<Participant> },
    /// Agent queue snapshot sent on agent connect.
    Queue { conversations: Vec<Conversation> },
    Error { kind: ErrorKind, message: String },
    Ping,
    Pong,
}

impl ServerEvent {
    /// Build an [`ServerEvent::Error`] from a rejected operation.
    pub fn error(err: &crate::PalaverError) -> Self {
        ServerEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// The wire name of this event (the `type` tag).
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::History { .. } => "history",
            ServerEvent::Message { .. } => "message",
            ServerEvent::MessageSent { .. } => "message_sent",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::ConversationWaiting { .. } => "conversation_waiting",
            ServerEvent::ConversationClaimed { .. } => "conversation_claimed",
            ServerEvent::ConversationEnded { .. } => "conversation_ended",
            ServerEvent::ConversationRated { .. } => "conversation_rated",
            ServerEvent::Presence { .. } => "presence",
            ServerEvent::Online { .. } => "online",
            ServerEvent::Queue { .. } => "queue",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Ping => "ping",
            ServerEvent::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_topic_uses_role_and_state() {
        let participant = Participant::new("c1", "Camille", Role::Client);
        let online = PresenceEvent {
            participant: participant.clone(),
            online: true,
        };
        let offline = PresenceEvent {
            participant,
            online: false,
        };
        assert_eq!(online.topic(), "client:online");
        assert_eq!(offline.topic(), "client:offline");
    }

    #[test]
    fn events_are_tagged_by_type() {
        let json = serde_json::to_value(ServerEvent::Typing {
            conversation_id: "conv-1".into(),
            sender_id: "a1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["conversation_id"], "conv-1");

        let pong = serde_json::to_value(ServerEvent::Pong).unwrap();
        assert_eq!(pong["type"], "pong");
    }

    #[test]
    fn name_matches_serialized_tag() {
        let events = [
            ServerEvent::Ping,
            ServerEvent::Online {
                participants: vec![],
            },
            ServerEvent::Error {
                kind: ErrorKind::NotFound,
                message: "x".into(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.name());
        }
    }

    #[test]
    fn end_reason_from_role() {
        assert_eq!(EndReason::closed_by(Role::Client), EndReason::ClosedByClient);
        assert_eq!(EndReason::closed_by(Role::Agent), EndReason::ClosedByAgent);
    }
}
