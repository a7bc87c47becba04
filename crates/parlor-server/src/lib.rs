//! # Parlor Server
//!
//! HTTP and WebSocket front end for the Parlor chat core.
//!
//! - `GET /ws?format=json|msgpack` - chat connection
//! - `GET /rooms`, `POST /rooms`, `POST /create_room` - room listing and creation
//! - `GET /history/{key}` - messages for a room or display name
//! - `GET /health` - liveness and counters

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;

pub use crate::config::Config;
pub use handlers::{build_app, run_server, serve, AppState};

use anyhow::{Context, Result};
use crate::config::StorageBackend;
use parlor_core::{Hub, MemoryStore, SqliteStore};
use std::sync::Arc;
use tracing::info;

/// Open the configured store and build the chat core on it.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or bootstrapped.
pub async fn build_hub(config: &Config) -> Result<Hub> {
    let sessions = config.session_config();
    let hub = match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Hub::bootstrap(Arc::new(MemoryStore::new()), sessions).await?
        }
        StorageBackend::Sqlite => {
            let path = config.storage.resolved_path()?;
            info!(path = %path.display(), "Using SQLite storage");
            let store = SqliteStore::open(&path, config.storage.max_connections)
                .await
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Hub::bootstrap(Arc::new(store), sessions).await?
        }
    };
    Ok(hub)
}
