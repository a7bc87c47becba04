//! Error types for the chat core.

use crate::session::ConnectionId;
use crate::store::StoreError;
use thiserror::Error;

/// Errors returned by core operations.
///
/// A private message to a name with no live connections is not an error:
/// the message is stored and the audience is empty.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A room with this name already exists.
    #[error("Room already exists: {0}")]
    DuplicateRoom(String),

    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoomName(&'static str),

    /// Invalid display name.
    #[error("Invalid display name: {0}")]
    InvalidDisplayName(&'static str),

    /// The connection is not registered, or has already disconnected.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Strict policy: the connection has not joined the room.
    #[error("Not joined to room: {0}")]
    NotJoined(String),

    /// Strict policy: the connection has no display name yet.
    #[error("Connection has not joined any room yet")]
    NotBound,

    /// Persistence failed.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}
