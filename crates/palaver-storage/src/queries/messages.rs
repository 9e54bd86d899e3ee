// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message persistence. Messages are append-only.

use chrono::{DateTime, Utc};
use palaver_core::PalaverError;
use rusqlite::params;

use crate::database::{Database, map_tr_err};
use crate::models::Message;
use crate::queries::{enum_from_sql, ts_from_sql, ts_to_sql};

/// Insert a new message.
pub async fn insert_message(db: &Database, msg: &Message) -> Result<(), PalaverError> {
    let msg = msg.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, sender_role, content, message_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    msg.message_id,
                    msg.conversation_id,
                    msg.sender_id,
                    msg.sender_role.to_string(),
                    msg.content,
                    msg.message_type.to_string(),
                    ts_to_sql(&msg.created_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Messages of a conversation in `(created_at, id)` order, optionally only
/// those created strictly after `since`.
pub async fn list_messages(
    db: &Database,
    conversation_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Message>, PalaverError> {
    let conversation_id = conversation_id.to_string();
    let since = since.as_ref().map(ts_to_sql);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, sender_role, content, message_type, created_at
                 FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at > ?2)
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![conversation_id, since], |row| {
                let sender_role: String = row.get(3)?;
                let message_type: String = row.get(5)?;
                let created_at: String = row.get(6)?;
                Ok(Message {
                    message_id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    sender_role: enum_from_sql(3, &sender_role)?,
                    content: row.get(4)?,
                    message_type: enum_from_sql(5, &message_type)?,
                    created_at: ts_from_sql(6, &created_at)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewConversation;
    use crate::queries::conversations::create_conversation;
    use crate::queries::test_support::setup_db;
    use chrono::TimeZone;
    use palaver_core::{MessageType, SenderRole};
    use tempfile::TempDir;

    async fn setup_db_with_conversation() -> (Database, TempDir, String) {
        let (db, dir) = setup_db().await;
        let conv = create_conversation(
            &db,
            NewConversation {
                client_id: "client-1".into(),
                client_name: "Alice".into(),
                agent_id: None,
                category: "general".into(),
            },
        )
        .await
        .unwrap();
        (db, dir, conv.conversation_id)
    }

    fn make_msg(id: &str, conversation_id: &str, content: &str, second: u32) -> Message {
        Message {
            message_id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "client-1".to_string(),
            sender_role: SenderRole::Client,
            content: content.to_string(),
            message_type: MessageType::Text,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, second).unwrap(),
        }
    }

    #[tokio::test]
    async fn insert_and_list_messages_in_order() {
        let (db, _dir, conv) = setup_db_with_conversation().await;

        // Inserted out of order on purpose.
        insert_message(&db, &make_msg("m3", &conv, "third", 3)).await.unwrap();
        insert_message(&db, &make_msg("m1", &conv, "first", 1)).await.unwrap();
        insert_message(&db, &make_msg("m2", &conv, "second", 2)).await.unwrap();

        let messages = list_messages(&db, &conv, None).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
        assert_eq!(messages[0].sender_role, SenderRole::Client);
        assert_eq!(messages[0].message_type, MessageType::Text);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn equal_timestamps_order_by_id() {
        let (db, _dir, conv) = setup_db_with_conversation().await;
        insert_message(&db, &make_msg("b", &conv, "x", 5)).await.unwrap();
        insert_message(&db, &make_msg("a", &conv, "y", 5)).await.unwrap();

        let messages = list_messages(&db, &conv, None).await.unwrap();
        assert_eq!(messages[0].message_id, "a");
        assert_eq!(messages[1].message_id, "b");
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn since_is_exclusive() {
        let (db, _dir, conv) = setup_db_with_conversation().await;
        for i in 1..=4 {
            insert_message(&db, &make_msg(&format!("m{i}"), &conv, "hi", i)).await.unwrap();
        }

        let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 2).unwrap();
        let messages = list_messages(&db, &conv, Some(since)).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["m3", "m4"]);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn message_for_unknown_conversation_is_rejected() {
        let (db, _dir, _conv) = setup_db_with_conversation().await;
        let err = insert_message(&db, &make_msg("m1", "nope", "hi", 1)).await.unwrap_err();
        assert!(matches!(err, PalaverError::StorageUnavailable { .. }));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn list_empty_conversation() {
        let (db, _dir, conv) = setup_db_with_conversation().await;
        assert!(list_messages(&db, &conv, None).await.unwrap().is_empty());
        db.close().await.unwrap();
    }
}
