//! Game Link Module
//!
//! Everything that talks to the local game process over UDP.
//!
//! ## Module Structure
//!
//! - `protocol`: Datagram message types (both directions)
//! - `liveness`: Heartbeat-derived reachability state
//! - `link`: Socket ownership, heartbeat, retry-until-ack delivery

pub mod link;
pub mod liveness;
pub mod protocol;

// Re-export key types
pub use link::{DeliveryOutcome, GameLink, GameLinkError, GameLinkEvent, GamePort};
pub use liveness::{GameLiveness, LivenessTransition};
pub use protocol::{DecodeError, GameMessage, GameOutbound};
