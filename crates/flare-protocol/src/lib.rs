//! # flare-protocol
//!
//! Wire-level definitions for the flare signaling relay.
//!
//! Wire messages are newline-free UTF-8 text, each a single self-contained
//! JSON object. The relay only distinguishes two things:
//!
//! - **Participant payloads** - checked for well-formedness and forwarded
//!   verbatim to the other room members, never interpreted.
//! - **Server events** - the `hello` greeting and the `peer-join` /
//!   `peer-leave` presence notifications, the only messages the relay
//!   originates itself.
//!
//! ## Example
//!
//! ```rust
//! use flare_protocol::{check_well_formed, ServerEvent};
//!
//! // A participant payload passes through iff it is a JSON object.
//! assert!(check_well_formed(r#"{"type":"offer","sdp":"..."}"#).is_ok());
//! assert!(check_well_formed("not json").is_err());
//!
//! // Server events encode to single-line wire JSON.
//! let greeting = ServerEvent::hello("AB12CD", "caller", 1);
//! let text = greeting.encode().unwrap();
//! ```

pub mod events;
pub mod payload;

pub use events::ServerEvent;
pub use payload::{check_well_formed, PayloadError};
