//! # parlor-protocol
//!
//! Wire protocol definitions for the Parlor chat service.
//!
//! Clients and the server exchange tagged frames over a WebSocket. Each frame
//! can travel either as a JSON text message or as a length-prefixed
//! MessagePack binary message; the content is the same in both encodings.
//!
//! ## Frame Types
//!
//! - `join_room` / `leave_room` - Room membership
//! - `message` - Room broadcast or private message
//! - `online_users` - Presence snapshot pushed by the server
//! - `connected` / `error` / `ping` / `pong` - Session plumbing
//!
//! ## Example
//!
//! ```rust
//! use parlor_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::message("alice", "Main", "hello");
//!
//! let text = codec::encode_json(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode_json(&text).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, Encoding, ProtocolError};
pub use frames::{codes, ClientFrame, ServerFrame, PROTOCOL_VERSION};
