//! Message and room persistence.
//!
//! The store is an append-only log of messages plus the set of room names.
//! All engines implement [`MessageStore`] and [`RoomStore`]:
//!
//! - [`MemoryStore`] - process-local, used by tests and ephemeral servers
//! - [`SqliteStore`] - durable, backed by SQLite (feature `sqlite`)

use crate::message::{now_millis, ChatMessage, NewMessage};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::trace;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached or refused the operation.
    #[error("{0}")]
    Unavailable(String),

    /// Database error.
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning the next id and the current timestamp.
    ///
    /// Ids are strictly increasing in append order.
    async fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError>;

    /// Every message whose room or receiver equals `key`, id ascending.
    async fn history(&self, key: &str) -> Result<Vec<ChatMessage>, StoreError>;

    /// Engine name, for logs.
    fn name(&self) -> &'static str;
}

/// Persistent set of room names.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Record a room name. Returns `false` if it was already stored.
    async fn save_room(&self, name: &str) -> Result<bool, StoreError>;

    /// All stored room names in creation order.
    async fn load_rooms(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory store.
///
/// The id counter is the log length, advanced under the same lock as the
/// push, so ids are gap-free.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<ChatMessage>>,
    rooms: Mutex<Vec<String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    /// Whether no message has been stored.
    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        let mut messages = self.messages.lock().await;
        let id = messages.len() as u64 + 1;
        let stored = message.into_stored(id, now_millis());
        messages.push(stored.clone());
        trace!(id, "Appended message");
        Ok(stored)
    }

    async fn history(&self, key: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.lock().await;
        Ok(messages
            .iter()
            .filter(|m| m.matches_key(key))
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn save_room(&self, name: &str) -> Result<bool, StoreError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.iter().any(|r| r == name) {
            return Ok(false);
        }
        rooms.push(name.to_string());
        Ok(true)
    }

    async fn load_rooms(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.rooms.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryStore::new();

        let first = store.append(NewMessage::new("Dev", "A", "one")).await.unwrap();
        let second = store.append(NewMessage::new("Dev", "B", "two")).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_history_room_or_receiver() {
        let store = MemoryStore::new();
        store.append(NewMessage::new("Dev", "A", "public")).await.unwrap();
        store
            .append(NewMessage::new("Main", "A", "secret").with_receiver("Dev"))
            .await
            .unwrap();
        store
            .append(NewMessage::new("Main", "A", "elsewhere"))
            .await
            .unwrap();
        store
            .append(NewMessage::new("Dev", "A", "to bob").with_receiver("bob"))
            .await
            .unwrap();

        let bodies: Vec<_> = store
            .history("Dev")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, vec!["public", "secret", "to bob"]);

        let bob = store.history("bob").await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].receiver.as_deref(), Some("bob"));

        assert!(store.history("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_gap_free() {
        let store = Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append(NewMessage::new("Dev", format!("user-{i}"), "x"))
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=50).collect::<Vec<u64>>());

        let history = store.history("Dev").await.unwrap();
        assert!(history.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_save_room_once() {
        let store = MemoryStore::new();
        assert!(store.save_room("Main").await.unwrap());
        assert!(!store.save_room("Main").await.unwrap());
        assert!(store.save_room("main").await.unwrap());
        assert_eq!(store.load_rooms().await.unwrap(), vec!["Main", "main"]);
    }
}
