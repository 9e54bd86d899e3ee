// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Participant snapshot persistence.
//!
//! Only identity and `last_seen` are durable; `connection_id` lives in the
//! presence registry and always reads back as `None`.

use palaver_core::PalaverError;
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::Participant;
use crate::queries::{enum_from_sql, opt_ts_from_sql, ts_to_sql};

/// Insert or update a participant. An absent `last_seen` keeps the stored one.
pub async fn upsert_participant(db: &Database, participant: &Participant) -> Result<(), PalaverError> {
    let p = participant.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO participants (id, display_name, role, contact, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (id) DO UPDATE SET
                    display_name = excluded.display_name,
                    role = excluded.role,
                    contact = COALESCE(excluded.contact, participants.contact),
                    last_seen = COALESCE(excluded.last_seen, participants.last_seen)",
                params![
                    p.participant_id,
                    p.display_name,
                    p.role.to_string(),
                    p.contact,
                    p.last_seen.as_ref().map(ts_to_sql),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get a participant by id.
pub async fn get_participant(db: &Database, id: &str) -> Result<Option<Participant>, PalaverError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, display_name, role, contact, last_seen
                 FROM participants WHERE id = ?1",
                params![id],
                |row| {
                    let role: String = row.get(2)?;
                    Ok(Participant {
                        participant_id: row.get(0)?,
                        display_name: row.get(1)?,
                        role: enum_from_sql(2, &role)?,
                        contact: row.get(3)?,
                        connection_id: None,
                        last_seen: opt_ts_from_sql(4, row.get(4)?)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::setup_db;
    use chrono::{TimeZone, Utc};
    use palaver_core::Role;

    #[tokio::test]
    async fn upsert_and_get_participant() {
        let (db, _dir) = setup_db().await;
        let mut p = Participant::new("client-1", "Alice", Role::Client);
        p.contact = Some("alice@example.com".into());
        p.connection_id = Some("conn-1".into());
        upsert_participant(&db, &p).await.unwrap();

        let got = get_participant(&db, "client-1").await.unwrap().unwrap();
        assert_eq!(got.display_name, "Alice");
        assert_eq!(got.role, Role::Client);
        assert_eq!(got.contact.as_deref(), Some("alice@example.com"));
        assert!(got.connection_id.is_none());
        assert!(got.last_seen.is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_keeps_last_seen_and_contact_when_absent() {
        let (db, _dir) = setup_db().await;
        let seen = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut p = Participant::new("agent-1", "Bob", Role::Agent);
        p.contact = Some("bob@example.com".into());
        p.last_seen = Some(seen);
        upsert_participant(&db, &p).await.unwrap();

        let renamed = Participant::new("agent-1", "Robert", Role::Agent);
        upsert_participant(&db, &renamed).await.unwrap();

        let got = get_participant(&db, "agent-1").await.unwrap().unwrap();
        assert_eq!(got.display_name, "Robert");
        assert_eq!(got.last_seen, Some(seen));
        assert_eq!(got.contact.as_deref(), Some("bob@example.com"));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_unknown_participant_returns_none() {
        let (db, _dir) = setup_db().await;
        assert!(get_participant(&db, "nobody").await.unwrap().is_none());
        db.close().await.unwrap();
    }
}
