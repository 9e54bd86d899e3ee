// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the assembled relay: SQLite store, chat service and
//! gateway wired as `palaver serve` wires them.
//!
//! Each test uses its own temp database and an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use palaver_chat::ChatService;
use palaver_core::{
    ConversationStatus, ConversationStore, EndReason, NewConversation, SenderRole, ServerEvent,
};
use palaver_gateway::Gateway;
use palaver_test_utils::{TestConnection, TestStore, test_config, text_message};

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct Running {
    addr: SocketAddr,
    service: Arc<ChatService>,
    cancel: CancellationToken,
    gateway: Gateway,
    expiry: tokio::task::JoinHandle<()>,
}

async fn boot(fixture: &TestStore) -> Running {
    let mut config = test_config();
    config.gateway.port = 0;
    let service = Arc::new(ChatService::new(fixture.dyn_store(), config.chat.clone()));
    service.recover().await.unwrap();
    let cancel = CancellationToken::new();
    let expiry = tokio::spawn(service.clone().run_expiry_loop(cancel.clone()));
    let gateway = Gateway::new(&config, service.clone());
    let addr = gateway.start(cancel.clone()).await.unwrap();
    Running {
        addr,
        service,
        cancel,
        gateway,
        expiry,
    }
}

async fn stop(running: Running) {
    running.cancel.cancel();
    running.gateway.wait().await;
    running.expiry.await.unwrap();
}

async fn open(addr: SocketAddr, id: &str, role: &str) -> Ws {
    let url = format!("ws://{addr}/ws?participant_id={id}&role={role}");
    tokio_tungstenite::connect_async(url).await.unwrap().0
}

async fn next_where(ws: &mut Ws, pred: impl Fn(&Value) -> bool) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let WsMessage::Text(text) = msg {
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            if pred(&frame) {
                return frame;
            }
        }
    }
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(WsMessage::Text(frame.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn full_conversation_is_durable_across_restart() {
    let mut fixture = TestStore::open().await.unwrap();
    let running = boot(&fixture).await;

    let mut client = open(running.addr, "C1", "client").await;
    next_where(&mut client, |f| f["type"] == "connected").await;
    send(&mut client, json!({"type": "send", "content": "Bonjour", "request_id": "1"})).await;
    let ack = next_where(&mut client, |f| f["request_id"] == "1").await;
    let id = ack["message"]["conversation_id"].as_str().unwrap().to_string();

    let mut agent = open(running.addr, "A1", "agent").await;
    next_where(&mut agent, |f| f["type"] == "queue").await;
    send(&mut agent, json!({"type": "claim", "conversation_id": id, "request_id": "2"})).await;
    next_where(&mut agent, |f| f["request_id"] == "2").await;
    send(
        &mut agent,
        json!({"type": "send", "conversation_id": id, "content": "Bonjour, je suis Antoine."}),
    )
    .await;
    next_where(&mut client, |f| {
        f["type"] == "message" && f["message"]["sender_id"] == "A1"
    })
    .await;

    send(&mut client, json!({"type": "end", "conversation_id": id, "request_id": "3"})).await;
    let ended = next_where(&mut client, |f| f["request_id"] == "3").await;
    assert_eq!(ended["type"], "conversation_ended");
    assert_eq!(ended["reason"], "closed_by_client");
    let notice = next_where(&mut agent, |f| f["type"] == "conversation_ended").await;
    assert_eq!(notice["conversation"]["status"], "ended");

    send(
        &mut client,
        json!({"type": "rate", "conversation_id": id, "rating": 4, "feedback": "rapide", "request_id": "4"}),
    )
    .await;
    let rated = next_where(&mut client, |f| f["request_id"] == "4").await;
    assert_eq!(rated["type"], "conversation_rated");
    assert_eq!(rated["conversation"]["rating"], 4);

    drop(client);
    drop(agent);
    stop(running).await;

    fixture.reopen().await.unwrap();
    let conversation = fixture.store.get_conversation(&id).await.unwrap().unwrap();
    assert_eq!(conversation.status, ConversationStatus::Ended);
    assert_eq!(conversation.agent_id.as_deref(), Some("A1"));
    assert_eq!(conversation.rating, Some(4));
    assert_eq!(conversation.feedback.as_deref(), Some("rapide"));
    assert!(conversation.ended_at.is_some());

    let messages = fixture.store.list_messages(&id, None).await.unwrap();
    let authors: Vec<_> = messages.iter().map(|m| m.sender_role).collect();
    assert_eq!(
        authors,
        [SenderRole::Client, SenderRole::System, SenderRole::Agent]
    );
}

#[tokio::test]
async fn restart_expires_stale_and_resumes_fresh_conversations() {
    let fixture = TestStore::open().await.unwrap();
    let store = fixture.dyn_store();

    let stale = store
        .create_conversation(NewConversation {
            client_id: "C-old".into(),
            client_name: "Odile".into(),
            agent_id: None,
            category: "general".into(),
        })
        .await
        .unwrap();
    let mut old = text_message(&stale.conversation_id, "C-old", SenderRole::Client, "allo ?");
    old.created_at = Utc::now() - chrono::Duration::hours(2);
    store.append_message(&old).await.unwrap();

    let fresh = store
        .create_conversation(NewConversation {
            client_id: "C-new".into(),
            client_name: "Noé".into(),
            agent_id: None,
            category: "general".into(),
        })
        .await
        .unwrap();

    let running = boot(&fixture).await;

    let stale_now = store
        .get_conversation(&stale.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stale_now.status, ConversationStatus::Ended);
    let fresh_now = running
        .service
        .conversation(&fresh.conversation_id)
        .await
        .unwrap();
    assert_eq!(fresh_now.status, ConversationStatus::Waiting);

    // The resumed client picks its conversation back up on connect.
    let mut conn = TestConnection::new();
    running
        .service
        .connect(
            palaver_core::Participant::new("C-new", "Noé", palaver_core::Role::Client),
            conn.handle(),
        )
        .await
        .unwrap();
    match conn.recv().await {
        Some(ServerEvent::Connected { conversation, .. }) => {
            assert_eq!(conversation.unwrap().conversation_id, fresh.conversation_id)
        }
        other => panic!("expected connected, got {other:?}"),
    }

    stop(running).await;
}

#[tokio::test]
async fn ended_conversation_notifies_reason_to_live_agent() {
    let fixture = TestStore::open().await.unwrap();
    let running = boot(&fixture).await;

    let mut agent = TestConnection::new();
    let agent_id = palaver_core::Participant::new("A1", "Antoine", palaver_core::Role::Agent);
    running
        .service
        .connect(agent_id.clone(), agent.handle())
        .await
        .unwrap();

    let client = palaver_core::Participant::new("C1", "Camille", palaver_core::Role::Client);
    let sent = running
        .service
        .send_message(&client, None, "Bonjour".into())
        .await
        .unwrap();
    let id = sent.message.conversation_id;
    running.service.claim(&agent_id, &id).await.unwrap();
    running.service.end(&client, &id).await.unwrap();

    match agent.recv_named("conversation_ended").await {
        Some(ServerEvent::ConversationEnded { reason, .. }) => {
            assert_eq!(reason, EndReason::ClosedByClient)
        }
        other => panic!("expected conversation_ended, got {other:?}"),
    }

    stop(running).await;
}
