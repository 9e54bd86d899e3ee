// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket transport: one reader loop and one writer task per connection.
//!
//! Client -> Server (JSON, tagged by `type`, optional `request_id`):
//! ```json
//! {"type": "send", "content": "Bonjour", "request_id": "r1"}
//! {"type": "claim", "conversation_id": "..."}
//! {"type": "rate", "conversation_id": "...", "rating": 5, "feedback": "merci"}
//! ```
//!
//! Server -> Client: every [`ServerEvent`], with `request_id` echoed on the
//! reply to a request that carried one.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use palaver_chat::ChatService;
use palaver_core::{
    ConnectionHandle, EndReason, ErrorKind, Outbound, PalaverError, Participant, Role,
    ServerEvent,
};

use crate::server::GatewayState;

/// Identity supplied by the auth layer in front of the gateway.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub participant_id: String,
    pub role: Role,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

impl ConnectParams {
    fn into_participant(self) -> Participant {
        let display_name = self
            .display_name
            .unwrap_or_else(|| self.participant_id.clone());
        let mut participant = Participant::new(self.participant_id, display_name, self.role);
        participant.contact = self.contact;
        participant
    }
}

/// A request frame with its correlation id.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub frame: ClientFrame,
}

/// Requests a participant can make over its connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Send {
        #[serde(default)]
        conversation_id: Option<String>,
        content: String,
    },
    Typing {
        conversation_id: String,
    },
    Claim {
        conversation_id: String,
    },
    End {
        conversation_id: String,
    },
    Rate {
        conversation_id: String,
        rating: u8,
        #[serde(default)]
        feedback: Option<String>,
    },
    History {
        conversation_id: String,
        #[serde(default)]
        since: Option<DateTime<Utc>>,
    },
    Presence {
        #[serde(default)]
        role: Option<Role>,
    },
    Ping,
}

/// Per-connection transport settings.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub outbound_buffer: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

/// Serialize an event, echoing `request_id` when present.
pub fn encode(event: &ServerEvent, request_id: Option<&str>) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(event)?;
    if let (Some(id), Some(object)) = (request_id, value.as_object_mut()) {
        object.insert("request_id".into(), id.into());
    }
    serde_json::to_string(&value)
}

/// Best-effort `request_id` from a frame that failed to parse.
fn salvage_request_id(text: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("request_id")?
        .as_str()
        .map(str::to_owned)
}

/// Run one request on behalf of `who`. `None` means no reply is due.
pub async fn dispatch(
    service: &ChatService,
    who: &Participant,
    frame: ClientFrame,
) -> Result<Option<ServerEvent>, PalaverError> {
    let reply = match frame {
        ClientFrame::Send {
            conversation_id,
            content,
        } => service
            .send_message(who, conversation_id.as_deref(), content)
            .await?
            .to_event(),
        ClientFrame::Typing { conversation_id } => {
            service.typing(who, &conversation_id).await;
            return Ok(None);
        }
        ClientFrame::Claim { conversation_id } => ServerEvent::ConversationClaimed {
            conversation: service.claim(who, &conversation_id).await?,
        },
        ClientFrame::End { conversation_id } => ServerEvent::ConversationEnded {
            conversation: service.end(who, &conversation_id).await?,
            reason: EndReason::closed_by(who.role),
        },
        ClientFrame::Rate {
            conversation_id,
            rating,
            feedback,
        } => ServerEvent::ConversationRated {
            conversation: service
                .rate(who, &conversation_id, rating, feedback)
                .await?,
        },
        ClientFrame::History {
            conversation_id,
            since,
        } => {
            let messages = service.history(who, &conversation_id, since).await?;
            ServerEvent::History {
                conversation_id,
                messages,
            }
        }
        ClientFrame::Presence { role } => ServerEvent::Online {
            participants: service.online(role),
        },
        ClientFrame::Ping => ServerEvent::Pong,
    };
    Ok(Some(reply))
}

/// `GET /ws?participant_id=&role=&display_name=&contact=`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<GatewayState>,
) -> Response {
    if params.participant_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "participant_id must not be empty").into_response();
    }
    let participant = params.into_participant();
    ws.on_upgrade(move |socket| handle_socket(socket, state, participant))
}

async fn handle_socket(socket: WebSocket, state: GatewayState, participant: Participant) {
    let settings = state.settings;
    // Cancelled on shutdown, on supersede, or when the queue overflows.
    let closing = state.shutdown.child_token();
    let (handle, outbound) = ConnectionHandle::channel_with(settings.outbound_buffer, closing.clone());
    let connection_id = handle.id().to_string();
    state
        .connections
        .insert(connection_id.clone(), closing.clone());

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        settings.heartbeat_interval,
        closing.clone(),
    ));

    info!(
        participant_id = %participant.participant_id,
        connection_id = %connection_id,
        role = %participant.role,
        "connection opened"
    );
    // The replay waits for queue room; a client that reads nothing cannot
    // hold it past the heartbeat timeout.
    let connect = state.service.connect(participant.clone(), handle.clone());
    match tokio::time::timeout(settings.heartbeat_timeout, connect).await {
        Ok(Ok(Some(stale))) => {
            state.connections.remove(stale.id());
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => warn!(connection_id = %connection_id, error = %e, "connect replay incomplete"),
        Err(_) => {
            warn!(connection_id = %connection_id, "connect replay timed out, closing");
            handle.close();
        }
    }

    read_loop(&mut stream, &state.service, &participant, &handle, settings, &closing).await;

    state.connections.remove(&connection_id);
    state.service.disconnect(&connection_id).await;
    closing.cancel();
    if let Err(e) = writer.await {
        warn!(connection_id = %connection_id, error = %e, "writer task failed");
    }
    info!(
        participant_id = %participant.participant_id,
        connection_id = %connection_id,
        "connection closed"
    );
}

async fn read_loop<S>(
    stream: &mut S,
    service: &ChatService,
    participant: &Participant,
    handle: &ConnectionHandle,
    settings: ConnectionSettings,
    closing: &CancellationToken,
) where
    S: futures::Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut deadline = Instant::now() + settings.heartbeat_timeout;
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = tokio::time::sleep_until(deadline) => {
                let e = PalaverError::ConnectionLost(format!(
                    "no traffic from {} for {:?}",
                    participant.participant_id, settings.heartbeat_timeout
                ));
                warn!(participant_id = %participant.participant_id, error = %e, "heartbeat timeout");
                return;
            }
            _ = closing.cancelled() => {
                debug!(participant_id = %participant.participant_id, "connection closed by server");
                return;
            }
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(participant_id = %participant.participant_id, error = %e, "socket error");
                return;
            }
            None => return,
        };
        deadline = Instant::now() + settings.heartbeat_timeout;

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Binary(_) => {
                let reply = ServerEvent::Error {
                    kind: ErrorKind::InvalidRequest,
                    message: "binary frames are not supported".into(),
                };
                if handle.reply(None, reply).await.is_err() {
                    return;
                }
                continue;
            }
        };

        let reply = match serde_json::from_str::<Envelope>(text.as_str()) {
            Ok(Envelope { request_id, frame }) => match dispatch(service, participant, frame).await {
                Ok(Some(event)) => Some((request_id, event)),
                Ok(None) => None,
                Err(e) => {
                    debug!(participant_id = %participant.participant_id, error = %e, "request rejected");
                    Some((request_id, ServerEvent::error(&e)))
                }
            },
            Err(e) => Some((
                salvage_request_id(text.as_str()),
                ServerEvent::Error {
                    kind: ErrorKind::InvalidRequest,
                    message: format!("malformed frame: {e}"),
                },
            )),
        };
        if let Some((request_id, event)) = reply {
            if handle.reply(request_id, event).await.is_err() {
                return;
            }
        }
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    heartbeat_interval: Duration,
    closing: CancellationToken,
) where
    S: futures::Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let Outbound { request_id, event } = tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            Some(out) = outbound.recv() => out,
            _ = ping.tick() => Outbound { request_id: None, event: ServerEvent::Ping },
        };
        let text = match encode(&event, request_id.as_deref()) {
            Ok(text) => text,
            Err(e) => {
                warn!(event = event.name(), error = %e, "event not serializable");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            closing.cancel();
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
