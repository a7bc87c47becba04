//! Message types for Parlor.
//!
//! `ChatMessage` is the persisted record. `MessageEvent` is what gets pushed
//! to connections, which also covers system notices that are never stored.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A store-assigned message identifier.
pub type MessageId = u64;

/// Sender name used for system notices.
pub const SYSTEM_SENDER: &str = "System";

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A persisted chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Monotonic id, assigned at persist time.
    pub id: MessageId,
    /// Room the message was sent in.
    pub room: Option<String>,
    /// Sender display name.
    pub sender: String,
    /// Recipient display name, present iff the message is private.
    pub receiver: Option<String>,
    /// Message text.
    pub body: String,
    /// Persist time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ChatMessage {
    /// Whether this is a private message.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.receiver.is_some()
    }

    /// Whether a history query for `key` returns this message.
    ///
    /// A key matches the room a message was sent in, or its private receiver.
    #[must_use]
    pub fn matches_key(&self, key: &str) -> bool {
        self.room.as_deref() == Some(key) || self.receiver.as_deref() == Some(key)
    }
}

/// A message waiting to be appended to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room: Option<String>,
    pub sender: String,
    pub receiver: Option<String>,
    pub body: String,
}

impl NewMessage {
    /// Create a room message.
    #[must_use]
    pub fn new(room: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            sender: sender.into(),
            receiver: None,
            body: body.into(),
        }
    }

    /// Address the message privately to `receiver`.
    #[must_use]
    pub fn with_receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    /// Stamp the message with its id and timestamp.
    #[must_use]
    pub fn into_stored(self, id: MessageId, timestamp: u64) -> ChatMessage {
        ChatMessage {
            id,
            room: self.room,
            sender: self.sender,
            receiver: self.receiver,
            body: self.body,
            timestamp,
        }
    }
}

/// A message event delivered to connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Store id, `None` for system notices.
    pub id: Option<MessageId>,
    pub room: Option<String>,
    pub sender: String,
    pub receiver: Option<String>,
    pub body: String,
    pub timestamp: u64,
}

impl MessageEvent {
    /// Create a system notice for a room.
    #[must_use]
    pub fn system(room: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: None,
            room: Some(room.into()),
            sender: SYSTEM_SENDER.to_string(),
            receiver: None,
            body: body.into(),
            timestamp: now_millis(),
        }
    }

    /// Whether this event is a system notice.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.id.is_none() && self.sender == SYSTEM_SENDER
    }
}

impl From<&ChatMessage> for MessageEvent {
    fn from(message: &ChatMessage) -> Self {
        Self {
            id: Some(message.id),
            room: message.room.clone(),
            sender: message.sender.clone(),
            receiver: message.receiver.clone(),
            body: message.body.clone(),
            timestamp: message.timestamp,
        }
    }
}

/// Something queued for a single connection's outbox.
///
/// Payloads are shared so a fan-out clones a pointer per recipient.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// A chat message or system notice.
    Message(Arc<MessageEvent>),
    /// The full online-user snapshot.
    OnlineUsers(Arc<[String]>),
}

pub(crate) fn joined_notice(display_name: &str, room: &str) -> String {
    format!("{display_name} joined {room}")
}

pub(crate) fn left_notice(display_name: &str, room: &str) -> String {
    format!("{display_name} left {room}")
}

pub(crate) fn disconnected_notice(display_name: &str) -> String {
    format!("{display_name} disconnected")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_into_stored() {
        let stored = NewMessage::new("Dev", "alice", "hi")
            .with_receiver("bob")
            .into_stored(7, 1_000);

        assert_eq!(stored.id, 7);
        assert_eq!(stored.room.as_deref(), Some("Dev"));
        assert_eq!(stored.receiver.as_deref(), Some("bob"));
        assert!(stored.is_private());
    }

    #[test]
    fn test_matches_key() {
        let message = NewMessage::new("Dev", "alice", "hi")
            .with_receiver("bob")
            .into_stored(1, 0);

        assert!(message.matches_key("Dev"));
        assert!(message.matches_key("bob"));
        assert!(!message.matches_key("alice"));
    }

    #[test]
    fn test_system_notice() {
        let notice = MessageEvent::system("Main", joined_notice("alice", "Main"));
        assert!(notice.is_system());
        assert_eq!(notice.body, "alice joined Main");
        assert_eq!(notice.room.as_deref(), Some("Main"));
    }

    #[test]
    fn test_event_from_stored() {
        let stored = NewMessage::new("Dev", "alice", "hi").into_stored(3, 42);
        let event = MessageEvent::from(&stored);
        assert_eq!(event.id, Some(3));
        assert_eq!(event.timestamp, 42);
        assert!(!event.is_system());
    }
}
