//! Server-generated wire events.
//!
//! The relay forwards participant payloads verbatim and only ever originates
//! three event kinds of its own: the `hello` greeting for a connection that
//! just joined, and the `peer-join`/`peer-leave` presence notifications for
//! its room-mates.

use serde::{Deserialize, Serialize};

/// An event originated by the relay itself.
///
/// Everything else on the wire belongs to the participants (session offers
/// and answers, ICE candidates, mode changes, photo payloads, orientation
/// and overlay updates, hangups) and passes through opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Greeting for a freshly joined connection, echoing what it joined as.
    #[serde(rename = "hello")]
    Hello {
        /// Room the connection joined.
        #[serde(rename = "roomId")]
        room_id: String,
        /// Role label the connection declared.
        role: String,
        /// Member count of the room, including the new connection.
        clients: usize,
    },

    /// A new participant joined the room.
    #[serde(rename = "peer-join")]
    PeerJoin {
        /// Role label of the joining participant.
        role: String,
    },

    /// A participant left the room.
    #[serde(rename = "peer-leave")]
    PeerLeave {
        /// Role label of the departed participant.
        role: String,
    },
}

impl ServerEvent {
    /// Create a new `hello` greeting.
    #[must_use]
    pub fn hello(room_id: impl Into<String>, role: impl Into<String>, clients: usize) -> Self {
        ServerEvent::Hello {
            room_id: room_id.into(),
            role: role.into(),
            clients,
        }
    }

    /// Create a new `peer-join` notification.
    #[must_use]
    pub fn peer_join(role: impl Into<String>) -> Self {
        ServerEvent::PeerJoin { role: role.into() }
    }

    /// Create a new `peer-leave` notification.
    #[must_use]
    pub fn peer_leave(role: impl Into<String>) -> Self {
        ServerEvent::PeerLeave { role: role.into() }
    }

    /// Encode the event as a single line of wire JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
