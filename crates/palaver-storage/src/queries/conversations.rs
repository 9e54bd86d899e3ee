// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation CRUD and conditional state transitions.
//!
//! Creation and transitions run inside `IMMEDIATE` transactions, which take
//! the write lock up front so the read-check-write sequence cannot interleave
//! with another writer.

use chrono::Utc;
use palaver_core::{ConversationStatus, PalaverError};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::database::{Database, map_tr_err};
use crate::models::{Conversation, ConversationFilter, ConversationPatch, NewConversation};
use crate::queries::{enum_from_sql, opt_ts_from_sql, ts_from_sql, ts_to_sql};

const SELECT_COLUMNS: &str = "SELECT id, client_id, client_name, agent_id, status, category,
        started_at, ended_at, rating, feedback FROM conversations";

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(4)?;
    let started_at: String = row.get(6)?;
    Ok(Conversation {
        conversation_id: row.get(0)?,
        client_id: row.get(1)?,
        client_name: row.get(2)?,
        agent_id: row.get(3)?,
        status: enum_from_sql(4, &status)?,
        category: row.get(5)?,
        started_at: ts_from_sql(6, &started_at)?,
        ended_at: opt_ts_from_sql(7, row.get(7)?)?,
        rating: row.get(8)?,
        feedback: row.get(9)?,
    })
}

fn select_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
        params![id],
        row_to_conversation,
    )
    .optional()
}

fn select_open_for_client(conn: &Connection, client_id: &str) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE client_id = ?1 AND status IN ('waiting', 'active')"),
        params![client_id],
        row_to_conversation,
    )
    .optional()
}

fn apply_patch(conn: &Connection, id: &str, patch: &ConversationPatch) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE conversations SET
            status = COALESCE(?2, status),
            agent_id = COALESCE(?3, agent_id),
            ended_at = COALESCE(?4, ended_at),
            rating = COALESCE(?5, rating),
            feedback = CASE WHEN ?6 THEN ?7 ELSE feedback END
         WHERE id = ?1",
        params![
            id,
            patch.status.map(|s| s.to_string()),
            patch.agent_id,
            patch.ended_at.as_ref().map(ts_to_sql),
            patch.rating,
            patch.feedback.is_some(),
            patch.feedback.clone().flatten(),
        ],
    )
}

/// Create a conversation, or return the client's existing open one.
pub async fn create_conversation(
    db: &Database,
    new: NewConversation,
) -> Result<Conversation, PalaverError> {
    db.connection()
        .call(move |conn| -> Result<Conversation, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(existing) = select_open_for_client(&tx, &new.client_id)? {
                return Ok(existing);
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
            tx.execute(
                "INSERT INTO conversations (id, client_id, client_name, agent_id, status, category, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    conversation.conversation_id,
                    conversation.client_id,
                    conversation.client_name,
                    conversation.agent_id,
                    conversation.status.to_string(),
                    conversation.category,
                    ts_to_sql(&conversation.started_at),
                ],
            )?;
            // Re-read so the returned record carries the stored timestamp precision.
            let stored = select_by_id(&tx, &conversation.conversation_id)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
        .map_err(map_tr_err)
}

/// Get a conversation by id.
pub async fn get_conversation(db: &Database, id: &str) -> Result<Option<Conversation>, PalaverError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select_by_id(conn, &id))
        .await
        .map_err(map_tr_err)
}

/// The client's conversation in `waiting` or `active`, if any.
pub async fn find_open_conversation(
    db: &Database,
    client_id: &str,
) -> Result<Option<Conversation>, PalaverError> {
    let client_id = client_id.to_string();
    db.connection()
        .call(move |conn| select_open_for_client(conn, &client_id))
        .await
        .map_err(map_tr_err)
}

/// List conversations matching the filter, oldest first.
pub async fn list_conversations(
    db: &Database,
    filter: &ConversationFilter,
) -> Result<Vec<Conversation>, PalaverError> {
    let status = filter.status.map(|s| s.to_string());
    let agent_id = filter.agent_id.clone();
    let client_id = filter.client_id.clone();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS}
                 WHERE (?1 IS NULL OR status = ?1)
                   AND (?2 IS NULL OR agent_id = ?2)
                   AND (?3 IS NULL OR client_id = ?3)
                 ORDER BY started_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![status, agent_id, client_id], row_to_conversation)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Apply a patch unconditionally.
pub async fn update_conversation(
    db: &Database,
    id: &str,
    patch: &ConversationPatch,
) -> Result<Conversation, PalaverError> {
    let id = id.to_string();
    let patch = patch.clone();
    let lookup_id = id.clone();
    let updated = db
        .connection()
        .call(move |conn| -> Result<Option<Conversation>, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if apply_patch(&tx, &id, &patch)? == 0 {
                return Ok(None);
            }
            let conversation = select_by_id(&tx, &id)?;
            tx.commit()?;
            Ok(conversation)
        })
        .await
        .map_err(map_tr_err)?;
    updated.ok_or_else(|| PalaverError::not_found("conversation", lookup_id))
}

enum Transition {
    Applied(Conversation),
    Missing,
    Rejected(ConversationStatus),
}

/// Apply a patch only if the current status is one of `from`.
pub async fn transition_conversation(
    db: &Database,
    id: &str,
    from: &[ConversationStatus],
    patch: &ConversationPatch,
) -> Result<Conversation, PalaverError> {
    let conversation_id = id.to_string();
    let id = id.to_string();
    let from = from.to_vec();
    let patch = patch.clone();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<Transition, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(current) = select_by_id(&tx, &id)? else {
                return Ok(Transition::Missing);
            };
            if !from.contains(&current.status) {
                return Ok(Transition::Rejected(current.status));
            }
            apply_patch(&tx, &id, &patch)?;
            let updated = select_by_id(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Transition::Applied(updated))
        })
        .await
        .map_err(map_tr_err)?;

    match outcome {
        Transition::Applied(conversation) => Ok(conversation),
        Transition::Missing => Err(PalaverError::not_found("conversation", conversation_id)),
        Transition::Rejected(status) => Err(PalaverError::InvalidConversationState(format!(
            "conversation {conversation_id} is {status}"
        ))),
    }
}
