//! # Speedrun Bridge
//!
//! Connects a locally running game to a remote matchmaking service for
//! head-to-head speedrun races.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SPEEDRUN BRIDGE                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared configuration                      │
//! │  ├── config.rs   - Ports, timeouts, env overrides            │
//! │  └── version.rs  - Version comparison                        │
//! │                                                              │
//! │  game/           - Local game process (UDP)                  │
//! │  ├── protocol.rs - JSON datagrams, both directions           │
//! │  ├── liveness.rs - Heartbeat reachability                    │
//! │  └── link.rs     - Socket, heartbeat, retry-until-ack        │
//! │                                                              │
//! │  network/        - Remote match service                      │
//! │  ├── packet.rs   - Engine.IO / Socket.IO framing             │
//! │  ├── protocol.rs - Match namespace events                    │
//! │  ├── channel.rs  - Persistent event channel                  │
//! │  └── api.rs      - REST calls (login, queue)                 │
//! │                                                              │
//! │  session/        - Orchestration                             │
//! │  ├── state.rs    - Session and match state                   │
//! │  ├── events.rs   - Presentation commands and events          │
//! │  └── controller.rs - Relay rules and reconnection            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Relay Rules
//!
//! Every message crossing the bridge is gated on the match phase:
//! - Ban choices pass only while banning
//! - Run progress and match actions pass only during a match
//! - Chat and post-match dismissal pass in any phase
//!
//! Match start, match result and seed changes are retransmitted to the
//! game until it acknowledges them.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use core::config::{BridgeConfig, BRIDGE_VERSION};
pub use game::link::{GameLink, GamePort};
pub use network::channel::{ServiceLink, ServicePort};
pub use network::api::{HttpMatchApi, MatchApi};
pub use session::controller::{spawn_bridge, BridgeHandle, SessionController};
pub use session::events::{BridgeCommand, BridgeEvent};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
