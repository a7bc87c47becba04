//! Wiring for a complete chat core.

use crate::error::ChatError;
use crate::message::ChatMessage;
use crate::presence::PresenceTracker;
use crate::rooms::RoomRegistry;
use crate::router::Router;
use crate::session::{SessionConfig, SessionManager};
use crate::store::{MessageStore, RoomStore};
use std::sync::Arc;
use tracing::info;

/// All core components, sharing one store.
pub struct Hub {
    pub rooms: Arc<RoomRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub sessions: Arc<SessionManager>,
    pub router: Router,
    store: Arc<dyn MessageStore>,
}

impl Hub {
    /// Build the core on top of `store`, loading persisted rooms and seeding
    /// the default room.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn bootstrap<S>(store: Arc<S>, config: SessionConfig) -> Result<Self, ChatError>
    where
        S: MessageStore + RoomStore + 'static,
    {
        let messages: Arc<dyn MessageStore> = store.clone();
        let room_store: Arc<dyn RoomStore> = store;

        let rooms = Arc::new(RoomRegistry::bootstrap(room_store).await?);
        let presence = Arc::new(PresenceTracker::new());
        let sessions = Arc::new(SessionManager::new(
            rooms.clone(),
            presence.clone(),
            config,
        ));
        let router = Router::new(sessions.clone(), presence.clone(), messages.clone());

        info!(store = messages.name(), "Chat core ready");
        Ok(Self {
            rooms,
            presence,
            sessions,
            router,
            store: messages,
        })
    }

    /// Room names in creation order.
    pub async fn list_rooms(&self) -> Vec<String> {
        self.rooms.list().await
    }

    /// Create a room.
    ///
    /// # Errors
    ///
    /// See [`RoomRegistry::create`].
    pub async fn create_room(&self, name: &str) -> Result<(), ChatError> {
        self.rooms.create(name).await
    }

    /// Messages whose room or receiver equals `key`, id ascending.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::StorageUnavailable`] if the store fails.
    pub async fn history(&self, key: &str) -> Result<Vec<ChatMessage>, ChatError> {
        Ok(self.store.history(key).await?)
    }

    /// The message store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }
}
