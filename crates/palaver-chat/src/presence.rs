// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Presence registry: which participants are connected, and through which handle.
//!
//! Each participant is bound to at most one live connection. A second
//! connection for the same participant replaces the first
//! (last-connect-wins); the superseded handle is returned so the gateway can
//! close it. Presence changes are published on a broadcast channel and pushed
//! to every online agent.

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use palaver_core::{ConnectionHandle, Participant, PresenceEvent, Role, ServerEvent};

const EVENT_CAPACITY: usize = 256;

struct Presence {
    participant: Participant,
    handle: ConnectionHandle,
}

/// Concurrent map of online participants.
///
/// All methods take `&self`; calls for different participants never block
/// each other beyond a shard lock.
pub struct PresenceRegistry {
    online: DashMap<String, Presence>,
    /// connection id -> participant id
    connections: DashMap<String, String>,
    events: broadcast::Sender<PresenceEvent>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            online: DashMap::new(),
            connections: DashMap::new(),
            events,
        }
    }

    /// Receive every presence change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// Bind `handle` to the participant.
    ///
    /// Returns the handle this one superseded, if the participant was already
    /// connected through a different one.
    pub fn register(
        &self,
        mut participant: Participant,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let participant_id = participant.participant_id.clone();
        let connection_id = handle.id().to_string();
        participant.connection_id = Some(connection_id.clone());

        self.connections
            .insert(connection_id.clone(), participant_id.clone());
        let previous = self.online.insert(
            participant_id.clone(),
            Presence {
                participant: participant.clone(),
                handle,
            },
        );

        let superseded = match previous {
            Some(prev) if prev.handle.id() != connection_id => {
                self.connections
                    .remove_if(prev.handle.id(), |_, owner| *owner == participant_id);
                warn!(
                    participant_id = %participant_id,
                    stale_connection_id = %prev.handle.id(),
                    connection_id = %connection_id,
                    "participant reconnected, superseding stale connection"
                );
                prev.handle.close();
                Some(prev.handle)
            }
            Some(_) => None,
            None => {
                info!(
                    participant_id = %participant_id,
                    role = %participant.role,
                    connection_id = %connection_id,
                    "participant online"
                );
                self.publish(PresenceEvent {
                    participant: participant.clone(),
                    online: true,
                });
                None
            }
        };
        self.record_online(participant.role);
        superseded
    }

    /// Remove whichever participant is bound to `connection_id`.
    ///
    /// Idempotent: unknown or superseded connections are ignored. Returns the
    /// participant with `last_seen` stamped when one was removed.
    pub fn unregister(&self, connection_id: &str) -> Option<Participant> {
        let (_, participant_id) = self.connections.remove(connection_id)?;
        let (_, presence) = self
            .online
            .remove_if(&participant_id, |_, p| p.handle.id() == connection_id)?;

        let mut participant = presence.participant;
        participant.connection_id = None;
        participant.last_seen = Some(Utc::now());
        info!(
            participant_id = %participant.participant_id,
            connection_id,
            "participant offline"
        );
        self.publish(PresenceEvent {
            participant: participant.clone(),
            online: false,
        });
        self.record_online(participant.role);
        Some(participant)
    }

    /// The live connection of a participant, if connected.
    pub fn lookup(&self, participant_id: &str) -> Option<ConnectionHandle> {
        self.online.get(participant_id).map(|p| p.handle.clone())
    }

    /// The connected participant record, if connected.
    pub fn participant(&self, participant_id: &str) -> Option<Participant> {
        self.online
            .get(participant_id)
            .map(|p| p.participant.clone())
    }

    pub fn is_online(&self, participant_id: &str) -> bool {
        self.online.contains_key(participant_id)
    }

    /// Online participants, optionally only those of `role`, ordered by id.
    pub fn list_online(&self, role: Option<Role>) -> Vec<Participant> {
        let mut participants: Vec<Participant> = self
            .online
            .iter()
            .filter(|p| role.is_none_or(|r| p.participant.role == r))
            .map(|p| p.participant.clone())
            .collect();
        participants.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        participants
    }

    pub fn online_count(&self, role: Role) -> usize {
        self.online
            .iter()
            .filter(|p| p.participant.role == role)
            .count()
    }

    /// Best-effort push to one participant. Returns false if offline or the
    /// push failed.
    pub fn push_to(&self, participant_id: &str, event: ServerEvent) -> bool {
        let Some(handle) = self.lookup(participant_id) else {
            return false;
        };
        self.deliver(participant_id, &handle, event)
    }

    /// Best-effort push to every online participant of `role` except `skip`.
    /// Returns how many were reached.
    pub fn push_to_role(&self, role: Role, event: &ServerEvent, skip: Option<&str>) -> usize {
        // Collect first so no shard lock is held while pushing.
        let targets: Vec<(String, ConnectionHandle)> = self
            .online
            .iter()
            .filter(|p| p.participant.role == role)
            .filter(|p| skip != Some(p.key().as_str()))
            .map(|p| (p.key().clone(), p.handle.clone()))
            .collect();

        targets
            .into_iter()
            .filter(|(participant_id, handle)| self.deliver(participant_id, handle, event.clone()))
            .count()
    }

    /// A connection that overflowed has a gap in its stream; it goes offline
    /// now so nothing more is routed to it.
    fn deliver(&self, participant_id: &str, handle: &ConnectionHandle, event: ServerEvent) -> bool {
        match handle.push(event) {
            Ok(()) => true,
            Err(e) if handle.is_lost() => {
                warn!(
                    participant_id,
                    connection_id = %handle.id(),
                    error = %e,
                    "connection fell behind, dropping it"
                );
                self.unregister(handle.id());
                false
            }
            Err(e) => {
                debug!(participant_id, error = %e, "push failed");
                false
            }
        }
    }

    fn publish(&self, event: PresenceEvent) {
        debug!(topic = %event.topic(), "presence change");
        let subject = event.participant.participant_id.clone();
        self.push_to_role(
            Role::Agent,
            &ServerEvent::Presence {
                event: event.clone(),
            },
            Some(&subject),
        );
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn record_online(&self, role: Role) {
        #[cfg(feature = "prometheus")]
        palaver_prometheus::set_online_participants(&role.to_string(), self.online_count(role));
        #[cfg(not(feature = "prometheus"))]
        let _ = role;
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
