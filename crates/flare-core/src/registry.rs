//! Room registry and identifier provisioning.
//!
//! The registry is the single shared map from room identifier to live room.
//! It is owned by the server state (constructed at startup, dropped at
//! shutdown); rooms are created lazily on first reference and removed only
//! by [`RoomRegistry::remove`] or the periodic sweep.

use crate::room::{Room, RoomId};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::TryRngCore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Random bytes per provisioned room identifier; rendered as hex, so tokens
/// are twice as many characters.
const ROOM_TOKEN_BYTES: usize = 3;

/// Provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The OS random source was unavailable.
    #[error("random source unavailable: {0}")]
    RandomSource(String),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Fixed lifetime after which a room is eligible for removal regardless
    /// of membership.
    pub room_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            room_ttl: Duration::from_secs(600),
        }
    }
}

/// The shared room registry.
///
/// All operations are atomic with respect to one another: resolve-or-create
/// uses the map's entry API, and the sweep re-reads each room's live member
/// count under the entry lock.
pub struct RoomRegistry {
    /// Rooms indexed by identifier.
    rooms: DashMap<RoomId, Arc<Room>>,
    /// Configuration.
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating room registry with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            config,
        }
    }

    /// Return the room for `room_id`, creating it on first reference.
    ///
    /// Creation is idempotent: concurrent resolution of the same unseen
    /// identifier yields one shared record. Identifier validity is the
    /// caller's concern (see [`crate::room::validate_room_id`]); the
    /// registry never rejects.
    pub fn resolve_or_create(&self, room_id: &str) -> Arc<Room> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                debug!(room = %room_id, "Creating new room");
                Arc::new(Room::new(room_id, self.config.room_ttl))
            })
            .clone()
    }

    /// Look up a room without creating it.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|room| Arc::clone(&room))
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Remove a room from the registry.
    pub fn remove(&self, room_id: &str) {
        self.rooms.remove(room_id);
    }

    /// Get the number of registered rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Remove every room that is empty or has outlived its TTL at `now`.
    ///
    /// Each room is checked independently; removing one cannot prevent the
    /// others from being checked. Open connections in a TTL-expired room are
    /// left untouched; they keep their shared handle, and a later join of
    /// the same identifier gets a fresh record.
    ///
    /// Returns the number of rooms removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.rooms.retain(|id, room| {
            let keep = !room.is_empty() && !room.is_expired(now);
            if !keep {
                debug!(room = %id, members = room.member_count(), "Reaping room");
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            member_count: self.rooms.iter().map(|room| room.member_count()).sum(),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of registered rooms.
    pub room_count: usize,
    /// Total members across all rooms.
    pub member_count: usize,
}

/// Generate a fresh, statistically-unique room identifier.
///
/// Drawn from the OS CSPRNG and rendered as short uppercase hex, e.g.
/// `"3FA9C1"`.
///
/// # Errors
///
/// Returns an error if the random source is unavailable; no partial
/// identifier is ever produced.
pub fn generate_room_id() -> Result<RoomId, ProvisionError> {
    let mut raw = [0u8; ROOM_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut raw)
        .map_err(|e| ProvisionError::RandomSource(e.to_string()))?;
    Ok(raw.iter().map(|byte| format!("{byte:02X}")).collect())
}
