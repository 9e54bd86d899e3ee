// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the ConversationStore trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use palaver_config::model::StorageConfig;
use palaver_core::{
    AdapterType, ConversationStore, HealthStatus, PalaverError, PluginAdapter,
};

use crate::database::{Database, map_tr_err};
use crate::models::{
    Conversation, ConversationFilter, ConversationPatch, ConversationStatus, Message,
    NewConversation, Participant,
};
use crate::queries;

/// SQLite-backed conversation store.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is opened by
/// [`ConversationStore::initialize`]; every other call fails with
/// `StorageUnavailable` until then.
pub struct SqliteStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStore {
    /// Create a new SqliteStore with the given configuration.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    fn db(&self) -> Result<&Database, PalaverError> {
        self.db
            .get()
            .ok_or_else(|| PalaverError::storage("storage not initialized -- call initialize() first"))
    }
}

#[async_trait]
impl PluginAdapter for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, PalaverError> {
        let Some(db) = self.db.get() else {
            return Ok(HealthStatus::Unhealthy("not initialized".into()));
        };
        let ping = db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err);
        Ok(match ping {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }

    async fn shutdown(&self) -> Result<(), PalaverError> {
        if let Some(db) = self.db.get() {
            db.close().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn initialize(&self) -> Result<(), PalaverError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db
            .set(db)
            .map_err(|_| PalaverError::storage("storage already initialized"))?;
        debug!(path = %self.config.database_path, "SQLite store initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), PalaverError> {
        self.db()?.close().await
    }

    // --- Participants ---

    async fn upsert_participant(&self, participant: &Participant) -> Result<(), PalaverError> {
        queries::participants::upsert_participant(self.db()?, participant).await
    }

    async fn get_participant(&self, id: &str) -> Result<Option<Participant>, PalaverError> {
        queries::participants::get_participant(self.db()?, id).await
    }

    // --- Conversations ---

    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, PalaverError> {
        queries::conversations::create_conversation(self.db()?, new).await
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, PalaverError> {
        queries::conversations::update_conversation(self.db()?, id, patch).await
    }

    async fn transition_conversation(
        &self,
        id: &str,
        from: &[ConversationStatus],
        patch: &ConversationPatch,
    ) -> Result<Conversation, PalaverError> {
        queries::conversations::transition_conversation(self.db()?, id, from, patch).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, PalaverError> {
        queries::conversations::get_conversation(self.db()?, id).await
    }

    async fn find_active_conversation(
        &self,
        client_id: &str,
    ) -> Result<Option<Conversation>, PalaverError> {
        queries::conversations::find_open_conversation(self.db()?, client_id).await
    }

    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, PalaverError> {
        queries::conversations::list_conversations(self.db()?, filter).await
    }

    // --- Messages ---

    async fn append_message(&self, message: &Message) -> Result<Message, PalaverError> {
        queries::messages::insert_message(self.db()?, message).await?;
        Ok(message.clone())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, PalaverError> {
        queries::messages::list_messages(self.db()?, conversation_id, since).await
    }
}
