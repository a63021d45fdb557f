//! Connection identity and lifecycle state.
//!
//! Every WebSocket connection is driven by a single task that owns its
//! receive loop; the explicit state machine below replaces the per-event
//! callback style with ordered transitions.

use std::sync::atomic::{AtomicU64, Ordering};

/// A unique connection identifier.
pub type ConnectionId = u64;

/// Atomic counter; process-lifetime uniqueness is all the relay needs.
static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate the next connection identifier.
#[must_use]
pub fn next_connection_id() -> ConnectionId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle state of a connection.
///
/// A connection is `Connecting` until its handshake resolves a room, `Open`
/// while it is a member of that room, and `Closed` exactly once afterwards.
/// It never migrates to another room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress, not yet attached to a room.
    Connecting,
    /// Attached to its room and relaying.
    Open,
    /// Detached; no references to the connection survive this state.
    Closed,
}

impl ConnectionState {
    /// Whether the connection is currently open.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = next_connection_id();
        let b = next_connection_id();
        let c = next_connection_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_state_is_open() {
        assert!(!ConnectionState::Connecting.is_open());
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Closed.is_open());
    }
}
