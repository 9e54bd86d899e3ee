// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message relay: persist, then deliver to the other side.
//!
//! Sends into one conversation are serialized through a per-conversation
//! lane, which assigns strictly increasing timestamps and delivers while
//! still holding the lane. Different conversations never contend.
//!
//! A failed store write does not fail the send. The message is still
//! delivered live and the outcome carries a `storage_unavailable` warning.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use palaver_core::{
    Conversation, ConversationStore, ErrorKind, Message, MessageType, PalaverError, Participant,
    SYSTEM_SENDER_ID, SenderRole, ServerEvent,
};

use crate::lifecycle::LifecycleManager;
use crate::presence::PresenceRegistry;

/// Result of relaying one message.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub message: Message,
    pub persisted: bool,
    /// Set when the message was delivered but something non-fatal failed.
    pub warning: Option<ErrorKind>,
}

impl SendOutcome {
    /// The acknowledgement pushed back to the sender.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::MessageSent {
            message: self.message.clone(),
            persisted: self.persisted,
            warning: self.warning,
        }
    }
}

#[derive(Default)]
struct Lane {
    last_created_at: Option<DateTime<Utc>>,
}

pub struct MessageRelay {
    store: Arc<dyn ConversationStore>,
    presence: Arc<PresenceRegistry>,
    lifecycle: Arc<LifecycleManager>,
    lanes: DashMap<String, Arc<Mutex<Lane>>>,
}

impl MessageRelay {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        presence: Arc<PresenceRegistry>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            store,
            presence,
            lifecycle,
            lanes: DashMap::new(),
        }
    }

    /// Relay a text message from a party of the conversation.
    pub async fn send(
        &self,
        conversation_id: &str,
        sender: &Participant,
        content: String,
    ) -> Result<SendOutcome, PalaverError> {
        if content.trim().is_empty() {
            return Err(PalaverError::InvalidRequest("message content is empty".into()));
        }
        // No lane for conversations that cannot be sent into.
        self.party_conversation(conversation_id, sender).await?;

        let lane_ref = self.lane(conversation_id);
        let mut lane = lane_ref.lock().await;

        // Checked again under the lane so an ordered burst sees one state.
        let conversation = match self.party_conversation(conversation_id, sender).await {
            Ok(conversation) => conversation,
            Err(e) => {
                drop(lane);
                drop(lane_ref);
                self.lanes
                    .remove_if(conversation_id, |_, lane| Arc::strong_count(lane) == 1);
                return Err(e);
            }
        };

        let outcome = self
            .relay(
                &mut lane,
                &conversation,
                &sender.participant_id,
                SenderRole::from(sender.role),
                MessageType::Text,
                content,
            )
            .await;
        drop(lane);

        self.lifecycle.touch(conversation_id);
        Ok(outcome)
    }

    /// Relay a system notice to both parties.
    pub async fn send_system(
        &self,
        conversation: &Conversation,
        content: String,
    ) -> SendOutcome {
        let lane = self.lane(&conversation.conversation_id);
        let mut lane = lane.lock().await;
        self.relay(
            &mut lane,
            conversation,
            SYSTEM_SENDER_ID,
            SenderRole::System,
            MessageType::System,
            content,
        )
        .await
    }

    /// Forward a typing indicator to the other party. Never persisted;
    /// delivery failures are ignored.
    pub async fn typing(&self, conversation_id: &str, sender: &Participant) -> Result<(), PalaverError> {
        let conversation = self.lifecycle.open_conversation(conversation_id).await?;
        if let Some(target) = conversation.counterpart(&sender.participant_id) {
            self.presence.push_to(
                target,
                ServerEvent::Typing {
                    conversation_id: conversation_id.to_string(),
                    sender_id: sender.participant_id.clone(),
                },
            );
        }
        Ok(())
    }

    async fn party_conversation(
        &self,
        conversation_id: &str,
        sender: &Participant,
    ) -> Result<Conversation, PalaverError> {
        let conversation = self.lifecycle.open_conversation(conversation_id).await?;
        if !conversation.involves(&sender.participant_id) {
            return Err(PalaverError::InvalidRequest(format!(
                "{} is not a party to conversation {conversation_id}",
                sender.participant_id
            )));
        }
        Ok(conversation)
    }

    /// Drop the ordering lane of a finished conversation.
    pub fn forget(&self, conversation_id: &str) {
        self.lanes.remove(conversation_id);
    }

    fn lane(&self, conversation_id: &str) -> Arc<Mutex<Lane>> {
        self.lanes
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    async fn relay(
        &self,
        lane: &mut Lane,
        conversation: &Conversation,
        sender_id: &str,
        sender_role: SenderRole,
        message_type: MessageType,
        content: String,
    ) -> SendOutcome {
        // Microseconds are what the store keeps; bump past the previous
        // message so the lane order is also the timestamp order.
        let mut created_at = Utc::now().trunc_subsecs(6);
        if let Some(last) = lane.last_created_at {
            if created_at <= last {
                created_at = last + Duration::microseconds(1);
            }
        }
        lane.last_created_at = Some(created_at);

        let message = Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation.conversation_id.clone(),
            sender_id: sender_id.to_string(),
            sender_role,
            content,
            message_type,
            created_at,
        };

        let (persisted, warning) = match self.store.append_message(&message).await {
            Ok(_) => (true, None),
            Err(e) => {
                warn!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.message_id,
                    error = %e,
                    "message not persisted, delivering live only"
                );
                #[cfg(feature = "prometheus")]
                palaver_prometheus::record_unpersisted_message();
                (false, Some(e.kind()))
            }
        };

        let recipients: Vec<&str> = match sender_role {
            SenderRole::System => std::iter::once(conversation.client_id.as_str())
                .chain(conversation.agent_id.as_deref())
                .collect(),
            _ => conversation.counterpart(sender_id).into_iter().collect(),
        };
        for recipient in recipients {
            let delivered = self.presence.push_to(
                recipient,
                ServerEvent::Message {
                    message: message.clone(),
                },
            );
            debug!(
                conversation_id = %message.conversation_id,
                participant_id = recipient,
                delivered,
                "message relayed"
            );
        }

        #[cfg(feature = "prometheus")]
        palaver_prometheus::record_message(&sender_role.to_string());

        SendOutcome {
            message,
            persisted,
            warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use palaver_core::Role;
    use palaver_test_utils::{MemoryStore, TestConnection};

    use crate::watchdog::IdleWatchdog;

    struct Fixture {
        store: Arc<MemoryStore>,
        presence: Arc<PresenceRegistry>,
        lifecycle: Arc<LifecycleManager>,
        relay: Arc<MessageRelay>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let presence = Arc::new(PresenceRegistry::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            presence.clone(),
            IdleWatchdog::new(StdDuration::from_secs(60)),
            "general",
        ));
        let relay = Arc::new(MessageRelay::new(
            store.clone(),
            presence.clone(),
            lifecycle.clone(),
        ));
        Fixture {
            store,
            presence,
            lifecycle,
            relay,
        }
    }

    fn client() -> Participant {
        Participant::new("c1", "Alice", Role::Client)
    }

    fn agent() -> Participant {
        Participant::new("a1", "Bob", Role::Agent)
    }

    async fn active_conversation(f: &Fixture) -> Conversation {
        let (conv, _) = f.lifecycle.open_or_resume(&client(), None).await.unwrap();
        f.lifecycle.claim(&conv.conversation_id, &agent()).await.unwrap()
    }

    #[tokio::test]
    async fn delivers_to_counterpart_and_persists() {
        let f = fixture();
        let mut agent_conn = TestConnection::new();
        f.presence.register(agent(), agent_conn.handle());
        let conv = active_conversation(&f).await;

        let outcome = f
            .relay
            .send(&conv.conversation_id, &client(), "Bonjour".into())
            .await
            .unwrap();
        assert!(outcome.persisted);
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.message.sender_role, SenderRole::Client);

        match agent_conn.recv_named("message").await {
            Some(ServerEvent::Message { message }) => assert_eq!(message.content, "Bonjour"),
            other => panic!("expected message, got {other:?}"),
        }
        let stored = f.store.list_messages(&conv.conversation_id, None).await.unwrap();
        assert_eq!(stored, vec![outcome.message]);
    }

    #[tokio::test]
    async fn offline_recipient_gets_it_from_history() {
        let f = fixture();
        let conv = active_conversation(&f).await;
        f.relay
            .send(&conv.conversation_id, &agent(), "Are you there?".into())
            .await
            .unwrap();
        let history = f
            .lifecycle
            .history(&conv.conversation_id, &client(), None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Are you there?");
    }

    #[tokio::test]
    async fn single_sender_order_is_preserved() {
        let f = fixture();
        let mut agent_conn = TestConnection::new();
        f.presence.register(agent(), agent_conn.handle());
        let conv = active_conversation(&f).await;
        agent_conn.drain();

        for i in 0..50 {
            f.relay
                .send(&conv.conversation_id, &client(), format!("m{i}"))
                .await
                .unwrap();
        }

        let stored: Vec<String> = f
            .store
            .list_messages(&conv.conversation_id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        let expected: Vec<String> = (0..50).map(|i| format!("m{i}")).collect();
        assert_eq!(stored, expected);

        let delivered: Vec<String> = agent_conn
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Message { message } => Some(message.content),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, expected);
    }

    #[tokio::test]
    async fn timestamps_strictly_increase_within_conversation() {
        let f = fixture();
        let conv = active_conversation(&f).await;
        let mut last = None;
        for i in 0..20 {
            let outcome = f
                .relay
                .send(&conv.conversation_id, &agent(), format!("{i}"))
                .await
                .unwrap();
            if let Some(prev) = last {
                assert!(outcome.message.created_at > prev);
            }
            last = Some(outcome.message.created_at);
        }
    }

    #[tokio::test]
    async fn storage_failure_degrades_to_live_delivery() {
        let f = fixture();
        let mut agent_conn = TestConnection::new();
        f.presence.register(agent(), agent_conn.handle());
        let conv = active_conversation(&f).await;

        f.store.set_fail_message_writes(true);
        let outcome = f
            .relay
            .send(&conv.conversation_id, &client(), "still there?".into())
            .await
            .unwrap();
        assert!(!outcome.persisted);
        assert_eq!(outcome.warning, Some(ErrorKind::StorageUnavailable));
        assert!(agent_conn.recv_named("message").await.is_some());
        assert_eq!(f.store.appended_count(), 0);
    }

    #[tokio::test]
    async fn sending_into_ended_conversation_fails() {
        let f = fixture();
        let conv = active_conversation(&f).await;
        f.lifecycle.end(&conv.conversation_id, &client()).await.unwrap();

        let err = f
            .relay
            .send(&conv.conversation_id, &agent(), "late".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConversationState);

        let err = f
            .relay
            .send("does-not-exist", &agent(), "hello".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConversationState);
    }

    #[tokio::test]
    async fn non_party_and_empty_sends_are_rejected() {
        let f = fixture();
        let conv = active_conversation(&f).await;
        let stranger = Participant::new("a2", "Eve", Role::Agent);
        let err = f
            .relay
            .send(&conv.conversation_id, &stranger, "hi".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = f
            .relay
            .send(&conv.conversation_id, &client(), "   ".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn rejected_sends_leave_no_lanes() {
        let f = fixture();
        for i in 0..100 {
            let err = f
                .relay
                .send(&format!("bogus-{i}"), &client(), "hello".into())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConversationState);
        }
        assert_eq!(f.relay.lanes.len(), 0);

        let conv = active_conversation(&f).await;
        let stranger = Participant::new("a2", "Eve", Role::Agent);
        assert!(f
            .relay
            .send(&conv.conversation_id, &stranger, "hi".into())
            .await
            .is_err());
        assert_eq!(f.relay.lanes.len(), 0);

        f.relay
            .send(&conv.conversation_id, &client(), "hi".into())
            .await
            .unwrap();
        assert_eq!(f.relay.lanes.len(), 1);
        f.lifecycle.end(&conv.conversation_id, &client()).await.unwrap();
        f.relay.forget(&conv.conversation_id);
        assert!(f
            .relay
            .send(&conv.conversation_id, &client(), "late".into())
            .await
            .is_err());
        assert_eq!(f.relay.lanes.len(), 0);
    }

    #[tokio::test]
    async fn slow_recipient_is_dropped_instead_of_skipping_messages() {
        let f = fixture();
        let conv = active_conversation(&f).await;
        let mut agent_conn = TestConnection::with_capacity(2);
        f.presence.register(agent(), agent_conn.handle());

        for i in 0..5 {
            let outcome = f
                .relay
                .send(&conv.conversation_id, &client(), format!("m{i}"))
                .await
                .unwrap();
            assert!(outcome.persisted);
        }

        // The agent got an unbroken prefix, then was taken offline.
        let received: Vec<String> = agent_conn
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Message { message } => Some(message.content),
                _ => None,
            })
            .collect();
        assert_eq!(received, ["m0", "m1"]);
        assert!(agent_conn.is_lost());
        assert!(!f.presence.is_online("a1"));

        // Everything is in the transcript for the reconnect replay.
        let stored = f.store.list_messages(&conv.conversation_id, None).await.unwrap();
        assert_eq!(stored.len(), 5);
    }

    #[tokio::test]
    async fn system_message_reaches_both_parties() {
        let f = fixture();
        let mut client_conn = TestConnection::new();
        let mut agent_conn = TestConnection::new();
        f.presence.register(client(), client_conn.handle());
        f.presence.register(agent(), agent_conn.handle());
        let conv = active_conversation(&f).await;

        let outcome = f.relay.send_system(&conv, "notice".into()).await;
        assert_eq!(outcome.message.sender_id, SYSTEM_SENDER_ID);
        assert_eq!(outcome.message.message_type, MessageType::System);
        for conn in [&mut client_conn, &mut agent_conn] {
            assert!(conn.recv_named("message").await.is_some());
        }
    }

    #[tokio::test]
    async fn typing_is_forwarded_but_not_stored() {
        let f = fixture();
        let mut client_conn = TestConnection::new();
        f.presence.register(client(), client_conn.handle());
        let conv = active_conversation(&f).await;

        f.relay.typing(&conv.conversation_id, &agent()).await.unwrap();
        match client_conn.recv_named("typing").await {
            Some(ServerEvent::Typing { sender_id, .. }) => assert_eq!(sender_id, "a1"),
            other => panic!("expected typing, got {other:?}"),
        }
        assert!(f.store.list_messages(&conv.conversation_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn parallel_conversations_do_not_interfere() {
        let f = fixture();
        let mut tasks = Vec::new();
        for i in 0..4 {
            let client = Participant::new(format!("c{i}"), "C", Role::Client);
            let (conv, _) = f.lifecycle.open_or_resume(&client, None).await.unwrap();
            let relay = f.relay.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..10 {
                    relay
                        .send(&conv.conversation_id, &client, format!("{n}"))
                        .await
                        .unwrap();
                }
                conv.conversation_id
            }));
        }
        for task in tasks {
            let id = task.await.unwrap();
            let messages = f.store.list_messages(&id, None).await.unwrap();
            let contents: Vec<_> = messages.iter().map(|m| m.content.clone()).collect();
            let expected: Vec<_> = (0..10).map(|n| n.to_string()).collect();
            assert_eq!(contents, expected);
        }
    }
}
