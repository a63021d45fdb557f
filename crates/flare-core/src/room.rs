//! Rooms and broadcast fan-out.
//!
//! A room is the unit of isolation: messages relay between exactly the
//! connections sharing its identifier, never across rooms. Membership is the
//! room's only mutable state; identifier, creation time, and TTL are fixed
//! at creation.

use crate::connection::ConnectionId;
use flare_protocol::ServerEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Maximum room identifier length.
pub const MAX_ROOM_ID_LENGTH: usize = 64;

/// A room identifier.
pub type RoomId = String;

/// Validate a room identifier supplied by a connecting client.
///
/// # Errors
///
/// Returns an error message if the identifier is invalid.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("room id cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("room id too long");
    }
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("room id contains invalid characters");
    }
    Ok(())
}

/// A room member: the declared role plus the handle that delivers outbound
/// text to its connection task.
#[derive(Debug, Clone)]
pub struct Member {
    /// Free-form role label, used for presence events only.
    pub role: String,
    /// Bounded queue into the member's writer task.
    pub outbound: mpsc::Sender<Arc<str>>,
}

/// The set of connections sharing one room identifier.
///
/// Connections hold the room behind an `Arc`, so a record reaped from the
/// registry while members are still attached keeps relaying among exactly
/// those members until the last of them disconnects.
#[derive(Debug)]
pub struct Room {
    /// Room identifier.
    id: RoomId,
    /// Set once at creation.
    created_at: Instant,
    /// Lifetime after which the room is eligible for reaping.
    ttl: Duration,
    /// Members keyed by connection. Locked only for mutation and snapshots,
    /// never across an await point.
    members: Mutex<HashMap<ConnectionId, Member>>,
}

impl Room {
    /// Create a new empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>, ttl: Duration) -> Self {
        Self {
            id: id.into(),
            created_at: Instant::now(),
            ttl,
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Get the room identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the creation instant.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether the room has outlived its TTL at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }

    /// Add a member.
    ///
    /// Returns the member count including the new member.
    pub fn join(
        &self,
        connection_id: ConnectionId,
        role: impl Into<String>,
        outbound: mpsc::Sender<Arc<str>>,
    ) -> usize {
        let mut members = self.members.lock().expect("room member map poisoned");
        members.insert(
            connection_id,
            Member {
                role: role.into(),
                outbound,
            },
        );
        debug!(room = %self.id, connection = connection_id, members = members.len(), "Member joined");
        members.len()
    }

    /// Remove a member.
    ///
    /// Returns the removed member, if it was present.
    pub fn leave(&self, connection_id: ConnectionId) -> Option<Member> {
        let mut members = self.members.lock().expect("room member map poisoned");
        let member = members.remove(&connection_id);
        if member.is_some() {
            debug!(room = %self.id, connection = connection_id, members = members.len(), "Member left");
        }
        member
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.lock().expect("room member map poisoned").len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.member_count() == 0
    }

    /// Deliver `text` to every member except `exclude`.
    ///
    /// The member map is snapshotted under the lock and delivery happens
    /// outside it, so joins, leaves, and concurrent closes interleave safely
    /// with an in-flight fan-out. Delivery is per-recipient best-effort: a
    /// full outbound queue drops that copy, a closed one is skipped, and
    /// neither affects the remaining recipients.
    ///
    /// Returns the number of members the message was queued for.
    pub fn broadcast(&self, text: &Arc<str>, exclude: Option<ConnectionId>) -> usize {
        let targets: Vec<(ConnectionId, mpsc::Sender<Arc<str>>)> = {
            let members = self.members.lock().expect("room member map poisoned");
            members
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(id, member)| (*id, member.outbound.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (connection_id, outbound) in targets {
            match outbound.try_send(Arc::clone(text)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        room = %self.id,
                        connection = connection_id,
                        "Outbound queue full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Member is mid-disconnect; its leave path cleans up.
                    trace!(room = %self.id, connection = connection_id, "Skipping closed connection");
                }
            }
        }

        trace!(room = %self.id, recipients = delivered, "Broadcast");
        delivered
    }

    /// Broadcast a relay-originated presence event.
    ///
    /// Failure to reach any one member is non-fatal and not retried.
    pub fn announce(&self, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        match event.encode() {
            Ok(text) => self.broadcast(&Arc::from(text), exclude),
            Err(error) => {
                warn!(room = %self.id, %error, "Failed to encode server event");
                0
            }
        }
    }
}
