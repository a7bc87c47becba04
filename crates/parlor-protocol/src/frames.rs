//! Frame types for the Parlor protocol.
//!
//! Inbound frames (`ClientFrame`) are validated here, at the boundary, so
//! that malformed events never reach the session state machine.

use serde::{Deserialize, Serialize};

use crate::codec::ProtocolError;

/// Current protocol version, announced in the `connected` frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum display name length in bytes.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Maximum message body length in bytes.
pub const MAX_BODY_LENGTH: usize = 16 * 1024;

/// Error codes carried by `error` frames.
pub mod codes {
    /// Frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 4000;
    /// Frame decoded but a field is missing or out of range.
    pub const INVALID_FRAME: u16 = 4001;
    /// Room name rejected.
    pub const INVALID_ROOM: u16 = 4002;
    /// Event references a room the connection has not joined.
    pub const NOT_JOINED: u16 = 4003;
    /// Event requires a bound display name.
    pub const NOT_BOUND: u16 = 4004;
    /// Room already exists.
    pub const DUPLICATE_ROOM: u16 = 4009;
    /// Persistence failed; the message was not sent.
    pub const STORAGE_UNAVAILABLE: u16 = 5003;
    /// Any other server-side failure.
    pub const INTERNAL: u16 = 5000;
}

/// A frame sent by a client.
///
/// Field names follow camelCase on the wire. The aliases accept the field
/// names used by older browser clients (`username`, `room`, `msg`,
/// `private`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Join a room, binding the display name to the connection.
    JoinRoom {
        #[serde(alias = "username")]
        display_name: String,
        #[serde(alias = "room")]
        room_name: String,
    },

    /// Leave a room.
    LeaveRoom {
        #[serde(alias = "username")]
        display_name: String,
        #[serde(alias = "room")]
        room_name: String,
    },

    /// Send a message to a room, or privately to a display name.
    Message {
        #[serde(alias = "username")]
        display_name: String,
        #[serde(alias = "room")]
        room_name: String,
        #[serde(alias = "msg")]
        body: String,
        #[serde(default, alias = "private", skip_serializing_if = "Option::is_none")]
        private_target: Option<String>,
    },

    /// Keepalive ping.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientFrame {
    /// Create a `join_room` frame.
    #[must_use]
    pub fn join_room(display_name: impl Into<String>, room_name: impl Into<String>) -> Self {
        ClientFrame::JoinRoom {
            display_name: display_name.into(),
            room_name: room_name.into(),
        }
    }

    /// Create a `leave_room` frame.
    #[must_use]
    pub fn leave_room(display_name: impl Into<String>, room_name: impl Into<String>) -> Self {
        ClientFrame::LeaveRoom {
            display_name: display_name.into(),
            room_name: room_name.into(),
        }
    }

    /// Create a room `message` frame.
    #[must_use]
    pub fn message(
        display_name: impl Into<String>,
        room_name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        ClientFrame::Message {
            display_name: display_name.into(),
            room_name: room_name.into(),
            body: body.into(),
            private_target: None,
        }
    }

    /// Create a private `message` frame addressed to `target`.
    #[must_use]
    pub fn private_message(
        display_name: impl Into<String>,
        room_name: impl Into<String>,
        body: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        ClientFrame::Message {
            display_name: display_name.into(),
            room_name: room_name.into(),
            body: body.into(),
            private_target: Some(target.into()),
        }
    }

    /// Short name of the frame, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::JoinRoom { .. } => "join_room",
            ClientFrame::LeaveRoom { .. } => "leave_room",
            ClientFrame::Message { .. } => "message",
            ClientFrame::Ping { .. } => "ping",
        }
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Invalid`] if a required field is empty or
    /// exceeds its length limit.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientFrame::JoinRoom {
                display_name,
                room_name,
            }
            | ClientFrame::LeaveRoom {
                display_name,
                room_name,
            } => {
                validate_display_name(display_name)?;
                require("roomName", room_name)
            }
            ClientFrame::Message {
                display_name,
                room_name,
                body,
                private_target,
            } => {
                validate_display_name(display_name)?;
                require("roomName", room_name)?;
                require("body", body)?;
                if body.len() > MAX_BODY_LENGTH {
                    return Err(ProtocolError::Invalid(format!(
                        "body exceeds {MAX_BODY_LENGTH} bytes"
                    )));
                }
                if let Some(target) = private_target {
                    if target.len() > MAX_DISPLAY_NAME_LENGTH {
                        return Err(ProtocolError::Invalid(
                            "privateTarget is too long".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            ClientFrame::Ping { .. } => Ok(()),
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::Invalid(format!("{field} is required")));
    }
    Ok(())
}

fn validate_display_name(name: &str) -> Result<(), ProtocolError> {
    require("displayName", name)?;
    if name.len() > MAX_DISPLAY_NAME_LENGTH {
        return Err(ProtocolError::Invalid("displayName is too long".to_string()));
    }
    if name.chars().any(char::is_control) {
        return Err(ProtocolError::Invalid(
            "displayName contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Connection established.
    Connected {
        /// Server-assigned connection identifier.
        connection_id: u64,
        /// Protocol version.
        version: u8,
    },

    /// A chat message or a system notice.
    Message {
        /// Store-assigned id; absent for system notices.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Room the message was sent in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        /// Sender display name, `"System"` for notices.
        sender: String,
        /// Private recipient, `null` for room traffic.
        #[serde(default)]
        receiver: Option<String>,
        /// Message text.
        body: String,
        /// Milliseconds since the Unix epoch.
        timestamp: u64,
    },

    /// Full presence snapshot.
    OnlineUsers {
        /// Display names of every bound connection.
        users: Vec<String>,
    },

    /// A rejected event or failed send.
    Error {
        /// One of [`codes`].
        code: u16,
        /// Human-readable reason.
        message: String,
    },

    /// Keepalive pong.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerFrame {
    /// Create a `connected` frame.
    #[must_use]
    pub fn connected(connection_id: u64) -> Self {
        ServerFrame::Connected {
            connection_id,
            version: PROTOCOL_VERSION,
        }
    }

    /// Create an `error` frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create an `online_users` frame.
    #[must_use]
    pub fn online_users(users: Vec<String>) -> Self {
        ServerFrame::OnlineUsers { users }
    }

    /// Create a `pong` frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerFrame::Pong { timestamp }
    }
}
