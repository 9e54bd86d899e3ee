// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The operations exposed to front ends, wired over presence, lifecycle and
//! relay.
//!
//! Every operation takes the acting [`Participant`] as the identity supplied
//! by the external auth layer at connect time. Events for the other party
//! are pushed through the presence registry; replies are returned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use palaver_config::model::ChatConfig;
use palaver_core::{
    ConnectionHandle, Conversation, ConversationFilter, ConversationStore, Message, PalaverError,
    Participant, Role, ServerEvent,
};

use crate::lifecycle::{LifecycleManager, RecoveryReport};
use crate::presence::PresenceRegistry;
use crate::relay::{MessageRelay, SendOutcome};
use crate::watchdog::IdleWatchdog;

pub struct ChatService {
    config: ChatConfig,
    store: Arc<dyn ConversationStore>,
    presence: Arc<PresenceRegistry>,
    lifecycle: Arc<LifecycleManager>,
    relay: MessageRelay,
}

impl ChatService {
    pub fn new(store: Arc<dyn ConversationStore>, config: ChatConfig) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            presence.clone(),
            IdleWatchdog::new(config.idle_timeout()),
            config.default_category.clone(),
        ));
        let relay = MessageRelay::new(store.clone(), presence.clone(), lifecycle.clone());
        Self {
            config,
            store,
            presence,
            lifecycle,
            relay,
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Bind a new connection and bring the participant up to date.
    ///
    /// Pushes `connected`, then for a client with an open conversation its
    /// history; for an agent its active conversations with history and the
    /// waiting queue. Returns the handle this connection superseded, if any.
    ///
    /// The catch-up frames wait for queue room rather than overflowing it. A
    /// connection that goes away mid-replay ends the replay; it is not an
    /// error.
    pub async fn connect(
        &self,
        participant: Participant,
        handle: ConnectionHandle,
    ) -> Result<Option<ConnectionHandle>, PalaverError> {
        let superseded = self.presence.register(participant.clone(), handle.clone());

        if let Err(e) = self.store.upsert_participant(&participant).await {
            warn!(
                participant_id = %participant.participant_id,
                error = %e,
                "participant snapshot not persisted"
            );
        }

        if let Err(e) = self.catch_up(&participant, &handle).await {
            warn!(
                participant_id = %participant.participant_id,
                connection_id = %handle.id(),
                error = %e,
                "connect replay interrupted"
            );
        }
        Ok(superseded)
    }

    async fn catch_up(
        &self,
        participant: &Participant,
        handle: &ConnectionHandle,
    ) -> Result<(), PalaverError> {
        let mut connected = participant.clone();
        connected.connection_id = Some(handle.id().to_string());

        match participant.role {
            Role::Client => {
                let open = match self
                    .store
                    .find_active_conversation(&participant.participant_id)
                    .await
                {
                    Ok(open) => open,
                    Err(e) => {
                        warn!(
                            participant_id = %participant.participant_id,
                            error = %e,
                            "could not look up open conversation"
                        );
                        self.lifecycle.cached_open_for(&participant.participant_id)
                    }
                };
                handle
                    .reply(
                        None,
                        ServerEvent::Connected {
                            participant: connected,
                            conversation: open.clone(),
                        },
                    )
                    .await?;
                if let Some(conversation) = open {
                    info!(
                        conversation_id = %conversation.conversation_id,
                        participant_id = %participant.participant_id,
                        "client resumed conversation"
                    );
                    self.lifecycle.track(&conversation);
                    self.replay(handle, &conversation).await?;
                }
            }
            Role::Agent => {
                handle
                    .reply(
                        None,
                        ServerEvent::Connected {
                            participant: connected,
                            conversation: None,
                        },
                    )
                    .await?;
                match self.lifecycle.assigned_to(&participant.participant_id).await {
                    Ok(assigned) => {
                        for conversation in assigned {
                            self.lifecycle.track(&conversation);
                            handle
                                .reply(
                                    None,
                                    ServerEvent::ConversationClaimed {
                                        conversation: conversation.clone(),
                                    },
                                )
                                .await?;
                            self.replay(handle, &conversation).await?;
                        }
                    }
                    Err(e) => warn!(error = %e, "could not load assigned conversations"),
                }
                match self.lifecycle.queue().await {
                    Ok(conversations) => {
                        handle
                            .reply(None, ServerEvent::Queue { conversations })
                            .await?
                    }
                    Err(e) => warn!(error = %e, "could not load waiting queue"),
                }
            }
        }
        Ok(())
    }

    async fn replay(
        &self,
        handle: &ConnectionHandle,
        conversation: &Conversation,
    ) -> Result<(), PalaverError> {
        let messages = match self
            .store
            .list_messages(&conversation.conversation_id, None)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(
                    conversation_id = %conversation.conversation_id,
                    error = %e,
                    "history replay unavailable"
                );
                return Ok(());
            }
        };
        let skip = messages.len().saturating_sub(self.config.history_replay_limit);
        handle
            .reply(
                None,
                ServerEvent::History {
                    conversation_id: conversation.conversation_id.clone(),
                    messages: messages.into_iter().skip(skip).collect(),
                },
            )
            .await
    }

    /// Drop a connection. Its conversations stay open.
    pub async fn disconnect(&self, connection_id: &str) {
        let Some(participant) = self.presence.unregister(connection_id) else {
            debug!(connection_id, "disconnect of unbound connection ignored");
            return;
        };
        if let Err(e) = self.store.upsert_participant(&participant).await {
            warn!(
                participant_id = %participant.participant_id,
                error = %e,
                "last_seen not persisted"
            );
        }
    }

    /// Send a chat message.
    ///
    /// A client may omit `conversation_id`: its open conversation is used, or
    /// a new waiting one is created and the welcome notice follows the
    /// client's first message.
    pub async fn send_message(
        &self,
        sender: &Participant,
        conversation_id: Option<&str>,
        content: String,
    ) -> Result<SendOutcome, PalaverError> {
        if let Some(id) = conversation_id {
            return self.relay.send(id, sender, content).await;
        }
        if sender.role != Role::Client {
            return Err(PalaverError::InvalidRequest(
                "conversation_id is required for agents".into(),
            ));
        }

        let (conversation, created) = self.lifecycle.open_or_resume(sender, None).await?;
        let outcome = self
            .relay
            .send(&conversation.conversation_id, sender, content)
            .await?;
        if created {
            self.relay
                .send_system(&conversation, self.config.welcome_message.clone())
                .await;
        }
        Ok(outcome)
    }

    /// Forward a typing indicator. Failures are only logged.
    pub async fn typing(&self, sender: &Participant, conversation_id: &str) {
        if let Err(e) = self.relay.typing(conversation_id, sender).await {
            debug!(conversation_id, error = %e, "typing indicator dropped");
        }
    }

    pub async fn claim(
        &self,
        agent: &Participant,
        conversation_id: &str,
    ) -> Result<Conversation, PalaverError> {
        self.lifecycle.claim(conversation_id, agent).await
    }

    pub async fn end(
        &self,
        participant: &Participant,
        conversation_id: &str,
    ) -> Result<Conversation, PalaverError> {
        let ended = self.lifecycle.end(conversation_id, participant).await?;
        self.relay.forget(conversation_id);
        Ok(ended)
    }

    pub async fn rate(
        &self,
        client: &Participant,
        conversation_id: &str,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<Conversation, PalaverError> {
        self.lifecycle
            .rate(conversation_id, client, rating, feedback)
            .await
    }

    pub async fn history(
        &self,
        requester: &Participant,
        conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, PalaverError> {
        self.lifecycle
            .history(conversation_id, requester, since)
            .await
    }

    /// Online participants, for agent dashboards.
    pub fn online(&self, role: Option<Role>) -> Vec<Participant> {
        self.presence.list_online(role)
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Conversation, PalaverError> {
        self.lifecycle.conversation(conversation_id).await
    }

    pub async fn conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, PalaverError> {
        self.store.list_conversations(filter).await
    }

    /// Re-arm idle timers for conversations left open by a previous run.
    pub async fn recover(&self) -> Result<RecoveryReport, PalaverError> {
        self.lifecycle.recover().await
    }

    /// End conversations as their idle timers fire, until cancelled.
    pub async fn run_expiry_loop(self: Arc<Self>, cancel: CancellationToken) {
        let Some(mut expired) = self.lifecycle.watchdog().take_expirations() else {
            warn!("idle expiry loop already running");
            return;
        };
        loop {
            tokio::select! {
                next = expired.recv() => {
                    let Some(conversation_id) = next else { break };
                    match self.lifecycle.expire(&conversation_id).await {
                        Ok(_) => self.relay.forget(&conversation_id),
                        Err(e) => warn!(conversation_id = %conversation_id, error = %e, "idle expiry failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("idle expiry loop shutting down");
                    break;
                }
            }
        }
    }
}
