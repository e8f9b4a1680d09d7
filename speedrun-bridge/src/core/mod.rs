//! Core
//!
//! Configuration and version handling shared by both links and the controller.

pub mod config;
pub mod version;

pub use config::{BridgeConfig, ChannelConfig, ConfigError, GameLinkConfig, BRIDGE_VERSION};
pub use version::versions_match;
