//! Session Module
//!
//! The controller that ties the game link and the match service together.
//!
//! ## Module Structure
//!
//! - `state`: Player, channel, queue and match state
//! - `events`: Presentation commands and domain events
//! - `controller`: The state machine and its run loop

pub mod controller;
pub mod events;
pub mod state;

pub use controller::{spawn_bridge, BridgeHandle, ControlEvent, LoginStep, SessionController};
pub use events::{BridgeCommand, BridgeEvent};
pub use state::{ChannelState, MatchContext, MatchPhase, QueueState, SessionSnapshot, SessionState};
