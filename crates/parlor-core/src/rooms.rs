//! Room registry.
//!
//! Rooms are public named channels. They are created explicitly or on first
//! join, and never deleted.

use crate::error::ChatError;
use crate::store::RoomStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Room every registry is seeded with.
pub const DEFAULT_ROOM: &str = "Main";

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 128;

/// Validate a room name.
///
/// Names are case-sensitive and compared byte for byte.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains control characters");
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Rooms {
    order: Vec<String>,
    names: HashSet<String>,
}

impl Rooms {
    fn insert(&mut self, name: &str) -> bool {
        if !self.names.insert(name.to_string()) {
            return false;
        }
        self.order.push(name.to_string());
        true
    }

    fn remove(&mut self, name: &str) {
        if self.names.remove(name) {
            self.order.retain(|r| r != name);
        }
    }
}

/// The set of named rooms.
///
/// A name is reserved in memory before it is persisted, so among concurrent
/// creators of the same name exactly one wins. If persisting fails the
/// reservation is released.
pub struct RoomRegistry {
    rooms: Mutex<Rooms>,
    store: Arc<dyn RoomStore>,
}

impl RoomRegistry {
    /// Load persisted rooms and make sure the default room exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn bootstrap(store: Arc<dyn RoomStore>) -> Result<Self, ChatError> {
        let mut rooms = Rooms::default();
        for name in store.load_rooms().await? {
            rooms.insert(&name);
        }
        let loaded = rooms.order.len();

        let registry = Self {
            rooms: Mutex::new(rooms),
            store,
        };
        registry.ensure(DEFAULT_ROOM).await?;

        info!(loaded, "Room registry ready");
        Ok(registry)
    }

    /// Create a room.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::DuplicateRoom`] if the name is taken,
    /// [`ChatError::InvalidRoomName`] for a bad name, and
    /// [`ChatError::StorageUnavailable`] if the room could not be persisted.
    pub async fn create(&self, name: &str) -> Result<(), ChatError> {
        validate_room_name(name).map_err(ChatError::InvalidRoomName)?;

        if !self.rooms.lock().await.insert(name) {
            debug!(room = %name, "Room already exists");
            return Err(ChatError::DuplicateRoom(name.to_string()));
        }

        if let Err(e) = self.store.save_room(name).await {
            warn!(room = %name, error = %e, "Failed to persist room");
            self.rooms.lock().await.remove(name);
            return Err(e.into());
        }

        info!(room = %name, "Room created");
        Ok(())
    }

    /// Create the room if it does not exist yet.
    ///
    /// Returns `true` if this call created it.
    ///
    /// # Errors
    ///
    /// Same as [`RoomRegistry::create`], except that an existing room is
    /// not an error.
    pub async fn ensure(&self, name: &str) -> Result<bool, ChatError> {
        match self.create(name).await {
            Ok(()) => Ok(true),
            Err(ChatError::DuplicateRoom(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All room names in creation order.
    pub async fn list(&self) -> Vec<String> {
        self.rooms.lock().await.order.clone()
    }

    /// Check if a room exists.
    pub async fn contains(&self, name: &str) -> bool {
        self.rooms.lock().await.names.contains(name)
    }

    /// Number of rooms.
    pub async fn len(&self) -> usize {
        self.rooms.lock().await.order.len()
    }

    /// Whether the registry is empty. Never true after bootstrap.
    pub async fn is_empty(&self) -> bool {
        self.rooms.lock().await.order.is_empty()
    }
}
