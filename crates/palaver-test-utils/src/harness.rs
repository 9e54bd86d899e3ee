// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store fixtures for integration tests.
//!
//! `TestStore` opens a `SqliteStore` on a temp-dir database that lives as
//! long as the fixture, so tests exercise the real schema and migrations.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use palaver_config::model::{PalaverConfig, StorageConfig};
use palaver_core::types::{Message, MessageType, SenderRole};
use palaver_core::{ConversationStore, PalaverError};
use palaver_storage::SqliteStore;

/// A SQLite store on a throwaway database file.
pub struct TestStore {
    pub store: Arc<SqliteStore>,
    pub config: StorageConfig,
    _temp_dir: TempDir,
}

impl TestStore {
    /// Open and migrate a fresh database.
    pub async fn open() -> Result<Self, PalaverError> {
        let temp_dir = TempDir::new().map_err(PalaverError::storage)?;
        let config = StorageConfig {
            database_path: temp_dir
                .path()
                .join("test.db")
                .to_string_lossy()
                .into_owned(),
            wal_mode: true,
        };
        let store = SqliteStore::new(config.clone());
        store.initialize().await?;
        Ok(Self {
            store: Arc::new(store),
            config,
            _temp_dir: temp_dir,
        })
    }

    /// Close the current store and open a new one on the same file,
    /// as a process restart would.
    pub async fn reopen(&mut self) -> Result<(), PalaverError> {
        self.store.close().await?;
        let store = SqliteStore::new(self.config.clone());
        store.initialize().await?;
        self.store = Arc::new(store);
        Ok(())
    }

    /// The store as a trait object, as the chat core takes it.
    pub fn dyn_store(&self) -> Arc<dyn ConversationStore> {
        self.store.clone()
    }
}

/// Configuration tuned for tests: short timeouts, everything else default.
pub fn test_config() -> PalaverConfig {
    let mut config = PalaverConfig::default();
    config.chat.idle_timeout_secs = 60;
    config.chat.heartbeat_interval_secs = 1;
    config.chat.heartbeat_timeout_secs = 3;
    config.storage.database_path = "unused.db".into();
    config
}

/// A text message stamped now.
pub fn text_message(conversation_id: &str, sender_id: &str, role: SenderRole, content: &str) -> Message {
    Message {
        message_id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        sender_role: role,
        content: content.to_string(),
        message_type: MessageType::Text,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::types::NewConversation;

    #[tokio::test]
    async fn reopen_keeps_data() {
        let mut fixture = TestStore::open().await.unwrap();
        let conv = fixture
            .store
            .create_conversation(NewConversation {
                client_id: "c1".into(),
                client_name: "Alice".into(),
                agent_id: None,
                category: "general".into(),
            })
            .await
            .unwrap();
        fixture
            .store
            .append_message(&text_message(&conv.conversation_id, "c1", SenderRole::Client, "hi"))
            .await
            .unwrap();

        fixture.reopen().await.unwrap();
        let messages = fixture
            .dyn_store()
            .list_messages(&conv.conversation_id, None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_config_is_valid() {
        assert!(palaver_config::validation::validate_config(&test_config()).is_ok());
    }
}
