//! SQLite-backed store.

use super::{MessageStore, RoomStore, StoreError};
use crate::message::{now_millis, ChatMessage, NewMessage};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS rooms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room TEXT,
        sender TEXT NOT NULL,
        receiver TEXT,
        body TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_receiver ON messages (receiver)",
];

type MessageRow = (i64, Option<String>, String, Option<String>, String, i64);

/// Durable store on a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Opened SQLite store");
        Self::from_pool(pool).await
    }

    /// Open a private in-memory database.
    ///
    /// Uses a single connection, since every SQLite in-memory connection
    /// sees its own database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(Self { pool })
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        let timestamp = now_millis();
        let result = sqlx::query(
            "INSERT INTO messages (room, sender, receiver, body, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message.room.as_deref())
        .bind(&message.sender)
        .bind(message.receiver.as_deref())
        .bind(&message.body)
        .bind(timestamp as i64)
        .execute(&self.pool)
        .await?;

        Ok(message.into_stored(result.last_insert_rowid() as u64, timestamp))
    }

    async fn history(&self, key: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, room, sender, receiver, body, timestamp FROM messages \
             WHERE room = ? OR receiver = ? ORDER BY id ASC",
        )
        .bind(key)
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, room, sender, receiver, body, timestamp)| ChatMessage {
                id: id as u64,
                room,
                sender,
                receiver,
                body,
                timestamp: timestamp as u64,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[async_trait]
impl RoomStore for SqliteStore {
    async fn save_room(&self, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO rooms (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_rooms(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM rooms ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_append_and_history() {
        let store = SqliteStore::in_memory().await.unwrap();

        let first = store.append(NewMessage::new("Dev", "A", "hi")).await.unwrap();
        let second = store
            .append(NewMessage::new("Dev", "A", "psst").with_receiver("B"))
            .await
            .unwrap();
        assert!(second.id > first.id);

        let dev = store.history("Dev").await.unwrap();
        assert_eq!(dev, vec![first, second.clone()]);

        let b = store.history("B").await.unwrap();
        assert_eq!(b, vec![second]);
    }

    #[tokio::test]
    async fn test_sqlite_null_receiver() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append(NewMessage::new("Dev", "A", "hi")).await.unwrap();

        let history = store.history("Dev").await.unwrap();
        assert_eq!(history[0].receiver, None);
        assert_eq!(history[0].room.as_deref(), Some("Dev"));
    }

    #[tokio::test]
    async fn test_sqlite_rooms_unique() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.save_room("Main").await.unwrap());
        assert!(!store.save_room("Main").await.unwrap());
        assert!(store.save_room("Dev").await.unwrap());
        assert_eq!(store.load_rooms().await.unwrap(), vec!["Main", "Dev"]);
    }
}
