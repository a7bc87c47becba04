//! # parlor-core
//!
//! Sessions, presence, rooms and message routing for the Parlor chat service.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Store** - Append-only message log and room persistence
//! - **Rooms** - Registry of named rooms
//! - **Presence** - Who is online, by display name
//! - **Session** - Per-connection lifecycle and room membership
//! - **Router** - Audience resolution, persistence and fan-out
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│  Presence   │     │    Rooms    │
//! │   Manager   │─────┼─────────────┼────▶│             │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod error;
pub mod hub;
pub mod message;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod session;
pub mod store;

pub use error::ChatError;
pub use hub::Hub;
pub use message::{ChatMessage, Delivery, MessageEvent, MessageId, NewMessage, SYSTEM_SENDER};
pub use presence::PresenceTracker;
pub use rooms::{RoomRegistry, DEFAULT_ROOM};
pub use router::{RouteReport, RouteRequest, Router};
pub use session::{
    ConnectionId, DeliveryOutcome, MembershipPolicy, SessionConfig, SessionManager, SessionState,
    SessionStats,
};
pub use store::{MemoryStore, MessageStore, RoomStore, StoreError};

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
