//! Game Liveness
//!
//! Heartbeat-derived belief that the game process is reachable.
//! Transitions are edge-triggered: each call reports a change at most once.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// A change in liveness worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessTransition {
    /// First datagram after silence (or ever).
    Connected,
    /// No datagram within the pong timeout.
    Disconnected,
}

/// Liveness state for the local game.
#[derive(Debug, Clone, Default)]
pub struct GameLiveness {
    /// Currently believed reachable.
    pub alive: bool,
    /// When the last datagram arrived.
    pub last_pong_at: Option<Instant>,
    /// Game address, captured from the first datagram.
    pub game_address: Option<SocketAddr>,
}

impl GameLiveness {
    /// Create state for a link that has never heard from the game.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any datagram has been received.
    pub fn contacted(&self) -> bool {
        self.game_address.is_some()
    }

    /// Record a well-formed datagram from `from`.
    ///
    /// The first sender address is kept for the link's lifetime.
    pub fn record_datagram(&mut self, from: SocketAddr, now: Instant) -> Option<LivenessTransition> {
        if self.game_address.is_none() {
            self.game_address = Some(from);
        }
        self.last_pong_at = Some(now);

        if self.alive {
            None
        } else {
            self.alive = true;
            Some(LivenessTransition::Connected)
        }
    }

    /// Evaluate the pong deadline.
    pub fn check_timeout(&mut self, now: Instant, timeout: Duration) -> Option<LivenessTransition> {
        if !self.alive {
            return None;
        }

        let silent_for = self
            .last_pong_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();

        if silent_for > timeout {
            self.alive = false;
            Some(LivenessTransition::Disconnected)
        } else {
            None
        }
    }
}
