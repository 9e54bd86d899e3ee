// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation lifecycle: `waiting -> active -> ended`.
//!
//! Every state change goes through the store's conditional transition, so a
//! claim race has exactly one winner no matter how many relay processes share
//! the database. In-process, conversation creation is serialized per client
//! so one client never ends up with two open conversations.
//!
//! The manager also keeps a cache of open conversations. The relay validates
//! sends against it first, which keeps live delivery working while the store
//! is unavailable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use palaver_core::{
    Conversation, ConversationFilter, ConversationPatch, ConversationStatus, ConversationStore,
    EndReason, Message, NewConversation, PalaverError, Participant, Role, ServerEvent,
};

use crate::presence::PresenceRegistry;
use crate::watchdog::IdleWatchdog;

/// Outcome of [`LifecycleManager::recover`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Conversations re-armed with their remaining idle time.
    pub resumed: usize,
    /// Conversations already idle past the timeout, ended on the spot.
    pub expired: usize,
}

pub struct LifecycleManager {
    store: Arc<dyn ConversationStore>,
    presence: Arc<PresenceRegistry>,
    watchdog: IdleWatchdog,
    open: DashMap<String, Conversation>,
    /// client id -> its cached open conversation id
    open_by_client: DashMap<String, String>,
    client_locks: DashMap<String, Arc<Mutex<()>>>,
    default_category: String,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        presence: Arc<PresenceRegistry>,
        watchdog: IdleWatchdog,
        default_category: impl Into<String>,
    ) -> Self {
        Self {
            store,
            presence,
            watchdog,
            open: DashMap::new(),
            open_by_client: DashMap::new(),
            client_locks: DashMap::new(),
            default_category: default_category.into(),
        }
    }

    pub fn watchdog(&self) -> &IdleWatchdog {
        &self.watchdog
    }

    /// Return the client's open conversation, creating a waiting one if
    /// there is none. The flag is true when a conversation was created.
    ///
    /// A conversation already in the open cache is returned without asking
    /// the store, so a client keeps chatting while the store is down.
    pub async fn open_or_resume(
        &self,
        client: &Participant,
        category: Option<String>,
    ) -> Result<(Conversation, bool), PalaverError> {
        if client.role != Role::Client {
            return Err(PalaverError::InvalidRequest(
                "only clients open conversations".into(),
            ));
        }

        let lock = self
            .client_locks
            .entry(client.participant_id.clone())
            .or_default()
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.resume_or_create(client, category).await
        };
        drop(lock);
        // Last one out removes the lock.
        self.client_locks
            .remove_if(&client.participant_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn resume_or_create(
        &self,
        client: &Participant,
        category: Option<String>,
    ) -> Result<(Conversation, bool), PalaverError> {
        if let Some(cached) = self.cached_open_for(&client.participant_id) {
            return Ok((cached, false));
        }
        if let Some(existing) = self
            .store
            .find_active_conversation(&client.participant_id)
            .await?
        {
            self.track(&existing);
            return Ok((existing, false));
        }

        let conversation = self
            .store
            .create_conversation(NewConversation {
                client_id: client.participant_id.clone(),
                client_name: client.display_name.clone(),
                agent_id: None,
                category: category.unwrap_or_else(|| self.default_category.clone()),
            })
            .await?;
        self.track(&conversation);

        info!(
            conversation_id = %conversation.conversation_id,
            participant_id = %client.participant_id,
            "conversation waiting for an agent"
        );
        #[cfg(feature = "prometheus")]
        palaver_prometheus::record_conversation_event("created");

        self.presence.push_to_role(
            Role::Agent,
            &ServerEvent::ConversationWaiting {
                conversation: conversation.clone(),
            },
            None,
        );
        Ok((conversation, true))
    }

    /// Start tracking an open conversation found in the store (resume after
    /// reconnect). Arms the idle timer if it is not running yet.
    pub fn track(&self, conversation: &Conversation) {
        if !conversation.status.is_open() {
            return;
        }
        self.cache(conversation);
        if !self.watchdog.is_armed(&conversation.conversation_id) {
            self.watchdog.arm(&conversation.conversation_id);
        }
    }

    /// Assign a waiting conversation to `agent`.
    ///
    /// Fails with `InvalidConversationState` if another agent got there first.
    pub async fn claim(
        &self,
        conversation_id: &str,
        agent: &Participant,
    ) -> Result<Conversation, PalaverError> {
        if agent.role != Role::Agent {
            return Err(PalaverError::InvalidRequest(
                "only agents can claim conversations".into(),
            ));
        }

        let claimed = match self
            .store
            .transition_conversation(
                conversation_id,
                &[ConversationStatus::Waiting],
                &ConversationPatch::claim(agent.participant_id.clone()),
            )
            .await
        {
            Ok(conversation) => conversation,
            Err(PalaverError::InvalidConversationState(reason)) => {
                #[cfg(feature = "prometheus")]
                palaver_prometheus::record_claim_conflict();
                let claimed_by_other = matches!(
                    self.store.get_conversation(conversation_id).await,
                    Ok(Some(ref c)) if c.status == ConversationStatus::Active
                );
                debug!(
                    conversation_id,
                    participant_id = %agent.participant_id,
                    "claim rejected"
                );
                return Err(PalaverError::InvalidConversationState(if claimed_by_other {
                    format!("conversation {conversation_id} already claimed")
                } else {
                    reason
                }));
            }
            Err(e) => return Err(e),
        };

        self.cache(&claimed);
        if !self.watchdog.touch(conversation_id) {
            self.watchdog.arm(conversation_id);
        }

        info!(
            conversation_id,
            participant_id = %agent.participant_id,
            "conversation claimed"
        );
        #[cfg(feature = "prometheus")]
        palaver_prometheus::record_conversation_event("claimed");

        let event = ServerEvent::ConversationClaimed {
            conversation: claimed.clone(),
        };
        self.presence.push_to(&claimed.client_id, event.clone());
        // Every agent, the claimant included, drops it from the queue.
        self.presence.push_to_role(Role::Agent, &event, None);
        Ok(claimed)
    }

    /// Close a conversation on behalf of one of its parties.
    pub async fn end(
        &self,
        conversation_id: &str,
        by: &Participant,
    ) -> Result<Conversation, PalaverError> {
        let conversation = self.conversation(conversation_id).await?;
        if !conversation.involves(&by.participant_id) {
            return Err(PalaverError::InvalidRequest(format!(
                "{} is not a party to conversation {conversation_id}",
                by.participant_id
            )));
        }
        self.finish(conversation_id, EndReason::closed_by(by.role))
            .await
    }

    /// End a conversation whose idle timer fired.
    ///
    /// Already-ended conversations are ignored. If the store is unavailable
    /// the timer is re-armed so the expiry is retried.
    pub async fn expire(&self, conversation_id: &str) -> Result<Option<Conversation>, PalaverError> {
        match self.finish(conversation_id, EndReason::IdleTimeout).await {
            Ok(conversation) => Ok(Some(conversation)),
            Err(PalaverError::InvalidConversationState(_) | PalaverError::NotFound { .. }) => {
                self.forget(conversation_id);
                Ok(None)
            }
            Err(e @ PalaverError::StorageUnavailable { .. }) => {
                warn!(conversation_id, error = %e, "idle expiry failed, retrying later");
                self.watchdog.arm(conversation_id);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn finish(
        &self,
        conversation_id: &str,
        reason: EndReason,
    ) -> Result<Conversation, PalaverError> {
        let ended = self
            .store
            .transition_conversation(
                conversation_id,
                &ConversationStatus::OPEN,
                &ConversationPatch::end(Utc::now()),
            )
            .await?;
        self.forget(conversation_id);

        info!(conversation_id, ?reason, "conversation ended");
        #[cfg(feature = "prometheus")]
        palaver_prometheus::record_conversation_event(match reason {
            EndReason::IdleTimeout => "expired",
            _ => "ended",
        });

        let event = ServerEvent::ConversationEnded {
            conversation: ended.clone(),
            reason,
        };
        self.presence.push_to(&ended.client_id, event.clone());
        match &ended.agent_id {
            Some(agent_id) => {
                self.presence.push_to(agent_id, event);
            }
            // Still queued: agents drop it from their queue.
            None => {
                self.presence.push_to_role(Role::Agent, &event, None);
            }
        }
        Ok(ended)
    }

    fn cache(&self, conversation: &Conversation) {
        self.open_by_client.insert(
            conversation.client_id.clone(),
            conversation.conversation_id.clone(),
        );
        self.open
            .insert(conversation.conversation_id.clone(), conversation.clone());
    }

    fn forget(&self, conversation_id: &str) {
        if let Some((_, conversation)) = self.open.remove(conversation_id) {
            self.open_by_client
                .remove_if(&conversation.client_id, |_, id| id == conversation_id);
        }
        self.watchdog.disarm(conversation_id);
    }

    /// The client's open conversation, if the cache has it.
    pub fn cached_open_for(&self, client_id: &str) -> Option<Conversation> {
        let conversation_id = self.open_by_client.get(client_id)?.clone();
        self.open.get(&conversation_id).map(|c| c.clone())
    }

    /// Record a rating on an ended conversation. Later ratings overwrite.
    pub async fn rate(
        &self,
        conversation_id: &str,
        by: &Participant,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<Conversation, PalaverError> {
        let conversation = self.conversation(conversation_id).await?;
        if by.role != Role::Client || conversation.client_id != by.participant_id {
            return Err(PalaverError::InvalidRequest(
                "only the conversation's client can rate it".into(),
            ));
        }
        if conversation.status != ConversationStatus::Ended {
            return Err(PalaverError::InvalidConversationState(format!(
                "conversation {conversation_id} is {}, rating requires ended",
                conversation.status
            )));
        }
        if !(1..=5).contains(&rating) {
            return Err(PalaverError::InvalidRequest(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }

        let rated = self
            .store
            .update_conversation(conversation_id, &ConversationPatch::rating(rating, feedback))
            .await?;
        info!(conversation_id, rating, "conversation rated");
        if let Some(agent_id) = &rated.agent_id {
            self.presence.push_to(
                agent_id,
                ServerEvent::ConversationRated {
                    conversation: rated.clone(),
                },
            );
        }
        Ok(rated)
    }

    /// A conversation by id, from the open cache or the store.
    pub async fn conversation(&self, conversation_id: &str) -> Result<Conversation, PalaverError> {
        if let Some(cached) = self.open.get(conversation_id) {
            return Ok(cached.clone());
        }
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| PalaverError::not_found("conversation", conversation_id))
    }

    /// An open conversation, for sending into.
    ///
    /// Unknown and ended conversations are both `InvalidConversationState`.
    /// Falls back to the store only on a cache miss, so sends keep working
    /// while the store is down.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<Conversation, PalaverError> {
        if let Some(cached) = self.open.get(conversation_id) {
            return Ok(cached.clone());
        }
        match self.store.get_conversation(conversation_id).await? {
            Some(conversation) if conversation.status.is_open() => {
                self.track(&conversation);
                Ok(conversation)
            }
            Some(conversation) => Err(PalaverError::InvalidConversationState(format!(
                "conversation {conversation_id} is {}",
                conversation.status
            ))),
            None => Err(PalaverError::InvalidConversationState(format!(
                "conversation {conversation_id} does not exist"
            ))),
        }
    }

    /// Reset the idle timer after activity.
    pub fn touch(&self, conversation_id: &str) {
        self.watchdog.touch(conversation_id);
    }

    /// Ordered transcript of a conversation.
    ///
    /// Clients may only read their own conversations; agents may read any.
    pub async fn history(
        &self,
        conversation_id: &str,
        requester: &Participant,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, PalaverError> {
        let conversation = self.conversation(conversation_id).await?;
        if requester.role == Role::Client && conversation.client_id != requester.participant_id {
            return Err(PalaverError::InvalidRequest(format!(
                "{} is not a party to conversation {conversation_id}",
                requester.participant_id
            )));
        }
        self.store.list_messages(conversation_id, since).await
    }

    /// Conversations waiting for an agent, oldest first.
    pub async fn queue(&self) -> Result<Vec<Conversation>, PalaverError> {
        self.store
            .list_conversations(&ConversationFilter::status(ConversationStatus::Waiting))
            .await
    }

    /// Active conversations assigned to an agent.
    pub async fn assigned_to(&self, agent_id: &str) -> Result<Vec<Conversation>, PalaverError> {
        self.store
            .list_conversations(&ConversationFilter {
                status: Some(ConversationStatus::Active),
                agent_id: Some(agent_id.to_string()),
                client_id: None,
            })
            .await
    }

    /// Re-arm idle timers for every open conversation after a restart.
    ///
    /// The idle period counts from the last message (or the start, if there
    /// are none). Conversations already past it are ended immediately.
    pub async fn recover(&self) -> Result<RecoveryReport, PalaverError> {
        let timeout = chrono::Duration::from_std(self.watchdog.timeout())
            .map_err(|e| PalaverError::Internal(format!("idle timeout out of range: {e}")))?;
        let mut report = RecoveryReport::default();

        for status in ConversationStatus::OPEN {
            let conversations = self
                .store
                .list_conversations(&ConversationFilter::status(status))
                .await?;
            for conversation in conversations {
                let id = conversation.conversation_id.clone();
                let last_activity = self
                    .store
                    .list_messages(&id, None)
                    .await?
                    .last()
                    .map_or(conversation.started_at, |m| m.created_at);
                let idle_for = Utc::now() - last_activity;

                if idle_for >= timeout {
                    self.finish(&id, EndReason::IdleTimeout).await?;
                    report.expired += 1;
                } else {
                    let remaining = (timeout - idle_for).to_std().unwrap_or_default();
                    self.cache(&conversation);
                    self.watchdog
                        .arm_until(&id, tokio::time::Instant::now() + remaining);
                    report.resumed += 1;
                }
            }
        }

        info!(
            resumed = report.resumed,
            expired = report.expired,
            "open conversations recovered"
        );
        Ok(report)
    }
}
