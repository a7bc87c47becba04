//! Session and connection management.
//!
//! Every live client connection owns one session:
//!
//! ```text
//! Unbound ──join──▶ Bound ──disconnect──▶ Closed
//!    │               ▲  │
//!    │               └──┘ join / leave
//!    └──────────disconnect──────────▶ Closed
//! ```
//!
//! The session directory (sessions plus room membership) sits behind one
//! lock. Outbound traffic goes through a bounded per-connection outbox with
//! `try_send`, so a stalled client never blocks fan-out to anyone else.

use crate::error::ChatError;
use crate::message::{disconnected_notice, joined_notice, left_notice, Delivery, MessageEvent};
use crate::presence::PresenceTracker;
use crate::rooms::RoomRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

/// Default outbox capacity per connection.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Opaque connection identifier, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How strictly room membership is checked on leave and message events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipPolicy {
    /// Accept events for rooms the connection never joined.
    #[default]
    Permissive,
    /// Reject leave/message events for non-joined rooms, and messages from
    /// connections without a display name. Private messages skip the room
    /// check.
    Strict,
}

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbox capacity per connection.
    pub outbox_capacity: usize,
    /// Membership policy.
    pub policy: MembershipPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            policy: MembershipPolicy::Permissive,
        }
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no display name yet.
    Unbound,
    /// Display name bound.
    Bound(String),
    /// Disconnected, or never registered.
    Closed,
}

/// Result of pushing one delivery to a set of connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Outboxes that accepted the delivery.
    pub delivered: usize,
    /// Outboxes that were full.
    pub dropped: usize,
}

/// Session manager statistics.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Open sessions.
    pub sessions: usize,
    /// Sessions with a display name.
    pub bound_sessions: usize,
    /// Rooms with at least one member.
    pub active_rooms: usize,
    /// Deliveries dropped on full outboxes since start.
    pub dropped_deliveries: u64,
}

struct SessionEntry {
    display_name: Option<String>,
    rooms: BTreeSet<String>,
    outbox: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct Directory {
    sessions: HashMap<ConnectionId, SessionEntry>,
    /// Room name -> member connections.
    members: HashMap<String, BTreeSet<ConnectionId>>,
}

impl Directory {
    fn fan_out(
        &self,
        targets: impl IntoIterator<Item = ConnectionId>,
        delivery: &Delivery,
    ) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::default();
        for id in targets {
            let Some(entry) = self.sessions.get(&id) else {
                continue;
            };
            match entry.outbox.try_send(delivery.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %id, "Outbox full, dropping delivery");
                    outcome.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(connection = %id, "Outbox closed");
                }
            }
        }
        outcome
    }

    fn to_room(&self, room: &str, delivery: &Delivery) -> DeliveryOutcome {
        let members = self.members.get(room).into_iter().flatten().copied();
        self.fan_out(members, delivery)
    }

    fn to_all(&self, delivery: &Delivery) -> DeliveryOutcome {
        self.fan_out(self.sessions.keys().copied(), delivery)
    }

    fn remove_member(&mut self, room: &str, id: ConnectionId) {
        if let Some(members) = self.members.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.members.remove(room);
            }
        }
    }
}

fn validate_display_name(name: &str) -> Result<(), ChatError> {
    if name.trim().is_empty() {
        return Err(ChatError::InvalidDisplayName("Display name cannot be empty"));
    }
    if name.chars().any(char::is_control) {
        return Err(ChatError::InvalidDisplayName(
            "Display name contains control characters",
        ));
    }
    Ok(())
}

fn notice(room: &str, body: String) -> Delivery {
    Delivery::Message(Arc::new(MessageEvent::system(room, body)))
}

/// Owns every session, its room memberships and its outbox.
pub struct SessionManager {
    directory: RwLock<Directory>,
    presence: Arc<PresenceTracker>,
    rooms: Arc<RoomRegistry>,
    config: SessionConfig,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl SessionManager {
    /// Create a session manager.
    #[must_use]
    pub fn new(
        rooms: Arc<RoomRegistry>,
        presence: Arc<PresenceTracker>,
        config: SessionConfig,
    ) -> Self {
        info!(policy = ?config.policy, outbox = config.outbox_capacity, "Creating session manager");
        Self {
            directory: RwLock::new(Directory::default()),
            presence,
            rooms,
            config,
            next_id: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// The membership policy in force.
    #[must_use]
    pub fn policy(&self) -> MembershipPolicy {
        self.config.policy
    }

    /// The shared presence tracker.
    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    /// Register a new, unbound connection.
    ///
    /// Returns its id and the receiving end of its outbox.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<Delivery>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (outbox, receiver) = mpsc::channel(self.config.outbox_capacity.max(1));

        self.directory.write().await.sessions.insert(
            id,
            SessionEntry {
                display_name: None,
                rooms: BTreeSet::new(),
                outbox,
            },
        );

        debug!(connection = %id, "Session opened");
        (id, receiver)
    }

    /// Join a room, binding `display_name` to the connection.
    ///
    /// Creates the room if needed, records presence, pushes the new presence
    /// snapshot to every connection and a join notice to every member of the
    /// room, the joiner included.
    ///
    /// Returns `true` if the room did not exist and this join created it.
    ///
    /// # Errors
    ///
    /// Fails on an invalid name, an unknown connection, or if creating the
    /// room could not be persisted. Nothing changes on failure.
    pub async fn join(
        &self,
        connection: ConnectionId,
        display_name: &str,
        room: &str,
    ) -> Result<bool, ChatError> {
        validate_display_name(display_name)?;

        // Room creation may hit storage, so it runs before the directory lock.
        let created = self.rooms.ensure(room).await?;
        if created {
            debug!(room = %room, "Room created on join");
        }

        let mut guard = self.directory.write().await;
        let directory = &mut *guard;

        let entry = directory
            .sessions
            .get_mut(&connection)
            .ok_or(ChatError::UnknownConnection(connection))?;
        entry.display_name = Some(display_name.to_string());
        entry.rooms.insert(room.to_string());
        directory
            .members
            .entry(room.to_string())
            .or_default()
            .insert(connection);

        self.presence.record(connection, display_name).await;
        self.broadcast_presence(directory).await;

        let outcome = directory.to_room(room, &notice(room, joined_notice(display_name, room)));
        self.record_dropped(outcome);

        info!(connection = %connection, name = %display_name, room = %room, "Joined room");
        Ok(created)
    }

    /// Leave a room.
    ///
    /// The leave notice goes to the room's members as they were when the
    /// event arrived, so a leaving member sees it too.
    ///
    /// # Errors
    ///
    /// Fails for an unknown connection, or under the strict policy when the
    /// connection is not a member of `room`.
    pub async fn leave(
        &self,
        connection: ConnectionId,
        display_name: &str,
        room: &str,
    ) -> Result<(), ChatError> {
        let mut guard = self.directory.write().await;
        let directory = &mut *guard;

        let entry = directory
            .sessions
            .get_mut(&connection)
            .ok_or(ChatError::UnknownConnection(connection))?;
        let was_member = entry.rooms.contains(room);
        if !was_member && self.config.policy == MembershipPolicy::Strict {
            return Err(ChatError::NotJoined(room.to_string()));
        }
        let name = entry
            .display_name
            .clone()
            .unwrap_or_else(|| display_name.to_string());
        entry.rooms.remove(room);

        let outcome = directory.to_room(room, &notice(room, left_notice(&name, room)));
        self.record_dropped(outcome);

        if was_member {
            directory.remove_member(room, connection);
        }
        self.broadcast_presence(directory).await;

        info!(connection = %connection, name = %name, room = %room, was_member, "Left room");
        Ok(())
    }

    /// Close a connection.
    ///
    /// A bound connection produces a disconnect notice in every room it had
    /// joined, then its presence and memberships are purged and the new
    /// presence snapshot is pushed to everyone left. An unbound connection is
    /// purged silently.
    ///
    /// Returns `false` if the connection was already closed.
    pub async fn disconnect(&self, connection: ConnectionId) -> bool {
        let mut guard = self.directory.write().await;
        let directory = &mut *guard;

        let Some(entry) = directory.sessions.remove(&connection) else {
            trace!(connection = %connection, "Disconnect for closed session");
            return false;
        };

        for room in &entry.rooms {
            directory.remove_member(room, connection);
        }

        if let Some(name) = &entry.display_name {
            for room in &entry.rooms {
                let outcome = directory.to_room(room, &notice(room, disconnected_notice(name)));
                self.record_dropped(outcome);
            }
            self.presence.forget(connection).await;
            self.broadcast_presence(directory).await;
        }

        info!(
            connection = %connection,
            name = ?entry.display_name,
            rooms = entry.rooms.len(),
            "Session closed"
        );
        true
    }

    /// Resolve the sender name for a message and apply the membership policy.
    ///
    /// A bound connection always sends under its bound name; an unbound one
    /// uses `claimed_name` when the policy allows it.
    ///
    /// # Errors
    ///
    /// Fails for an unknown connection, or under the strict policy with
    /// [`ChatError::NotBound`] / [`ChatError::NotJoined`].
    pub async fn sender_name(
        &self,
        connection: ConnectionId,
        claimed_name: &str,
        room: &str,
        private: bool,
    ) -> Result<String, ChatError> {
        let directory = self.directory.read().await;
        let entry = directory
            .sessions
            .get(&connection)
            .ok_or(ChatError::UnknownConnection(connection))?;

        match self.config.policy {
            MembershipPolicy::Permissive => Ok(entry
                .display_name
                .clone()
                .unwrap_or_else(|| claimed_name.to_string())),
            MembershipPolicy::Strict => {
                let name = entry.display_name.clone().ok_or(ChatError::NotBound)?;
                if !private && !entry.rooms.contains(room) {
                    return Err(ChatError::NotJoined(room.to_string()));
                }
                Ok(name)
            }
        }
    }

    /// Push a delivery to specific connections. Unknown ids are skipped.
    pub async fn deliver(&self, targets: &[ConnectionId], delivery: Delivery) -> DeliveryOutcome {
        let directory = self.directory.read().await;
        let outcome = directory.fan_out(targets.iter().copied(), &delivery);
        self.record_dropped(outcome);
        outcome
    }

    /// Push a delivery to every current member of a room.
    pub async fn deliver_to_room(&self, room: &str, delivery: Delivery) -> DeliveryOutcome {
        let directory = self.directory.read().await;
        let outcome = directory.to_room(room, &delivery);
        self.record_dropped(outcome);
        outcome
    }

    /// Current members of a room.
    pub async fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.directory
            .read()
            .await
            .members
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms a connection has joined.
    pub async fn rooms_of(&self, connection: ConnectionId) -> Vec<String> {
        self.directory
            .read()
            .await
            .sessions
            .get(&connection)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Lifecycle state of a connection.
    pub async fn state(&self, connection: ConnectionId) -> SessionState {
        match self.directory.read().await.sessions.get(&connection) {
            None => SessionState::Closed,
            Some(entry) => match &entry.display_name {
                None => SessionState::Unbound,
                Some(name) => SessionState::Bound(name.clone()),
            },
        }
    }

    /// Number of open sessions.
    pub async fn connection_count(&self) -> usize {
        self.directory.read().await.sessions.len()
    }

    /// Session statistics.
    pub async fn stats(&self) -> SessionStats {
        let directory = self.directory.read().await;
        SessionStats {
            sessions: directory.sessions.len(),
            bound_sessions: directory
                .sessions
                .values()
                .filter(|e| e.display_name.is_some())
                .count(),
            active_rooms: directory.members.len(),
            dropped_deliveries: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Push the presence snapshot to every connection.
    ///
    /// Callers hold the directory write lock, which orders snapshots.
    async fn broadcast_presence(&self, directory: &Directory) {
        let users: Arc<[String]> = self.presence.snapshot().await.into();
        trace!(online = users.len(), "Broadcasting presence");
        let outcome = directory.to_all(&Delivery::OnlineUsers(users));
        self.record_dropped(outcome);
    }

    fn record_dropped(&self, outcome: DeliveryOutcome) {
        if outcome.dropped > 0 {
            self.dropped
                .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        }
    }
}
