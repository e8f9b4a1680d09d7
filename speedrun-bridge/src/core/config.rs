//! Bridge Configuration
//!
//! Endpoints, ports and timing for both links. Every value has a default
//! matching the deployed service and can be overridden from the environment.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;

/// Bridge build version. Must equal the version reported by the service.
pub const BRIDGE_VERSION: f64 = 1.02;

/// Socket.IO namespace of the match channel.
pub const MATCH_NAMESPACE: &str = "/ws/match";

/// Default game-side UDP port (bridge -> game).
pub const GAME_UDP_PORT: u16 = 21587;

/// Default bridge-side UDP port (game -> bridge).
pub const BRIDGE_UDP_PORT: u16 = 21588;

/// Maximum datagram size in either direction.
pub const UDP_BUFFER_SIZE: usize = 4096;

const DEFAULT_SERVER_URL: &str = "http://140.82.40.6:5000";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held an unparsable value.
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
    /// Pong timeout shorter than two ping intervals.
    #[error("pong timeout {pong_timeout:?} must be at least twice the ping interval {ping_interval:?}")]
    PongTimeoutTooShort {
        /// Configured ping interval.
        ping_interval: Duration,
        /// Configured pong timeout.
        pong_timeout: Duration,
    },
    /// A duration that must be non-zero was zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    /// Critical sends need at least one attempt.
    #[error("critical retry max must be at least 1")]
    ZeroRetryMax,
}

/// UDP link settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GameLinkConfig {
    /// Local address the bridge listens on.
    pub bind_addr: SocketAddr,
    /// Where the game listens; used until the game's own address is captured.
    pub game_addr: SocketAddr,
    /// Receive buffer / maximum outbound datagram size.
    pub buffer_size: usize,
    /// Heartbeat ping interval.
    pub ping_interval: Duration,
    /// Silence after which the game is considered gone.
    pub pong_timeout: Duration,
    /// Delay between retransmissions of a critical message.
    pub retry_interval: Duration,
    /// Maximum transmissions of a critical message.
    pub retry_max: u32,
}

impl Default for GameLinkConfig {
    fn default() -> Self {
        Self {
            bind_addr: loopback(BRIDGE_UDP_PORT),
            game_addr: loopback(GAME_UDP_PORT),
            buffer_size: UDP_BUFFER_SIZE,
            ping_interval: Duration::from_millis(2500),
            pong_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(500),
            retry_max: 5,
        }
    }
}

/// Event channel settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Base URL of the Socket.IO endpoint (http/https/ws/wss).
    pub url: String,
    /// Socket.IO namespace.
    pub namespace: String,
    /// Handshake timeout (WebSocket upgrade + namespace connect).
    pub connect_timeout: Duration,
    /// Internal reconnection attempts after an established channel drops.
    pub reconnect_attempts: u32,
    /// First backoff delay between internal reconnection attempts.
    pub reconnect_backoff: Duration,
    /// Backoff ceiling.
    pub reconnect_backoff_max: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            namespace: MATCH_NAMESPACE.to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_attempts: 5,
            reconnect_backoff: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(5),
        }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Base URL for REST calls.
    pub server_url: String,
    /// REST request timeout.
    pub request_timeout: Duration,
    /// Delay before the controller forces a reconnect after an unintentional drop.
    pub reconnect_delay: Duration,
    /// Version compared against the service's.
    pub bridge_version: f64,
    /// UDP link.
    pub game: GameLinkConfig,
    /// Event channel.
    pub channel: ChannelConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            bridge_version: BRIDGE_VERSION,
            game: GameLinkConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SPEEDRUN_SERVER_URL") {
            config.server_url = url.clone();
            config.channel.url = url;
        }
        if let Some(url) = lookup("SPEEDRUN_WS_URL") {
            config.channel.url = url;
        }
        if let Some(port) = parse_env::<u16>(&lookup, "BRIDGE_UDP_PORT")? {
            config.game.bind_addr = loopback(port);
        }
        if let Some(port) = parse_env::<u16>(&lookup, "GAME_UDP_PORT")? {
            config.game.game_addr = loopback(port);
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "BRIDGE_PING_INTERVAL_MS")? {
            config.game.ping_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "BRIDGE_PONG_TIMEOUT_MS")? {
            config.game.pong_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "BRIDGE_RETRY_INTERVAL_MS")? {
            config.game.retry_interval = Duration::from_millis(ms);
        }
        if let Some(max) = parse_env::<u32>(&lookup, "BRIDGE_RETRY_MAX")? {
            config.game.retry_max = max;
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "BRIDGE_RECONNECT_DELAY_MS")? {
            config.reconnect_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check timing constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let game = &self.game;
        if game.ping_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("ping interval"));
        }
        if game.retry_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("retry interval"));
        }
        if game.retry_max == 0 {
            return Err(ConfigError::ZeroRetryMax);
        }
        if game.pong_timeout < game.ping_interval * 2 {
            return Err(ConfigError::PongTimeoutTooShort {
                ping_interval: game.ping_interval,
                pong_timeout: game.pong_timeout,
            });
        }
        Ok(())
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
    }
}
