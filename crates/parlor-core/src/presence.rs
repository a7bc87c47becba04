//! Presence tracking for Parlor.
//!
//! Presence maps each bound connection to its display name. Names are not
//! unique: two connections with the same name both appear in the snapshot.
//!
//! The tracker itself does not broadcast. The session manager mutates it
//! while holding its directory lock and pushes the new snapshot to every
//! connection, so snapshots reach all connections in mutation order.

use crate::session::ConnectionId;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Connection to display-name map.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Ordered by connection id, which is connect order.
    members: Mutex<BTreeMap<ConnectionId, String>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a connection with a name, replacing any earlier name.
    ///
    /// Returns `true` if the connection was not present before.
    pub async fn record(&self, connection: ConnectionId, display_name: &str) -> bool {
        let previous = self
            .members
            .lock()
            .await
            .insert(connection, display_name.to_string());

        match &previous {
            None => debug!(connection = %connection, name = %display_name, "Presence: online"),
            Some(old) if old != display_name => {
                debug!(connection = %connection, from = %old, to = %display_name, "Presence: renamed");
            }
            Some(_) => {}
        }

        previous.is_none()
    }

    /// Remove a connection. No-op if absent.
    pub async fn forget(&self, connection: ConnectionId) -> Option<String> {
        let removed = self.members.lock().await.remove(&connection);
        if removed.is_some() {
            debug!(connection = %connection, "Presence: offline");
        }
        removed
    }

    /// Display names of all present connections, duplicates included.
    pub async fn snapshot(&self) -> Vec<String> {
        self.members.lock().await.values().cloned().collect()
    }

    /// Every connection currently bound to `display_name`.
    pub async fn connections_named(&self, display_name: &str) -> Vec<ConnectionId> {
        self.members
            .lock()
            .await
            .iter()
            .filter(|(_, name)| name.as_str() == display_name)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Display name of a connection.
    pub async fn name_of(&self, connection: ConnectionId) -> Option<String> {
        self.members.lock().await.get(&connection).cloned()
    }

    /// Number of present connections.
    pub async fn count(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Whether nobody is present.
    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }
}
