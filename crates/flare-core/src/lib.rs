//! # flare-core
//!
//! Rooms, registry, and broadcast fan-out for the flare signaling relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Room** - the scope within which connections exchange messages
//! - **RoomRegistry** - shared map from identifier to live room, with the
//!   empty-or-expired sweep used by the periodic reaper
//! - **Connection** - identity allocation and lifecycle states
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Connection │────▶│ RoomRegistry │────▶│    Room     │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!                                                 │
//!                                                 ▼
//!                                          broadcast fan-out
//! ```

pub mod connection;
pub mod registry;
pub mod room;

pub use connection::{next_connection_id, ConnectionId, ConnectionState};
pub use registry::{generate_room_id, ProvisionError, RegistryConfig, RoomRegistry};
pub use room::{validate_room_id, Member, Room, RoomId};
