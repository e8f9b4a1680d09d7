//! Bridge Commands and Events
//!
//! The presentation-facing surface of the controller: commands it accepts
//! and domain events it emits.

use serde_json::Value;

use crate::network::api::PlayerProfile;
use crate::network::protocol::{MatchResultInfo, MatchStartInfo, PairedInfo};
use crate::session::state::SessionSnapshot;

// =============================================================================
// PRESENTATION -> CONTROLLER
// =============================================================================

/// Commands accepted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    /// Version check, then log in.
    Login {
        /// Player id from the identity provider.
        player_id: String,
    },
    /// Create the account after `RegistrationNeeded`.
    Register {
        /// Player id.
        player_id: String,
        /// Chosen display name.
        player_name: String,
    },
    /// Start the game link and open the event channel.
    StartNetworking,
    /// Close both links without auto-reconnect.
    StopNetworking,
    /// Leave the queue, stop networking and forget the player.
    Logout,
    /// Stop networking and end the controller task.
    Shutdown,
}

// =============================================================================
// CONTROLLER -> PRESENTATION
// =============================================================================

/// Domain events emitted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Logged in (or registered).
    LoginSucceeded(PlayerProfile),
    /// Login failed.
    LoginFailed(String),
    /// Account does not exist; ask for a display name.
    RegistrationNeeded {
        /// Player id to register.
        player_id: String,
    },
    /// Registration rejected.
    RegistrationFailed(String),
    /// Profile re-fetched after a match.
    PlayerDataRefreshed(PlayerProfile),
    /// This bridge build is outdated.
    BridgeVersionMismatch {
        /// Where to get a matching bridge.
        download_url: String,
    },
    /// The game mod is outdated; networking was stopped.
    GameVersionMismatch {
        /// Where to get a matching mod.
        download_url: String,
    },
    /// Event channel up.
    ServiceConnected,
    /// Event channel down.
    ServiceDisconnected,
    /// Game reachable.
    GameConnected,
    /// Game stopped answering.
    GameDisconnected,
    /// Entered the queue.
    QueueJoined,
    /// Left the queue.
    QueueLeft,
    /// Queue join refused.
    PlayerBanned,
    /// Opponent found.
    Paired(PairedInfo),
    /// Remaining categories.
    BanUpdate(Vec<String>),
    /// Match started.
    MatchStarted(MatchStartInfo),
    /// Opponent progress.
    OpponentProgress {
        /// World number.
        area: i64,
        /// Theme id.
        theme: i64,
    },
    /// Match finished.
    MatchResult(MatchResultInfo),
    /// Match abandoned.
    MatchScrapped,
    /// Completed match record for the local cache.
    MatchRecorded(Value),
    /// Session state changed.
    SessionChanged(SessionSnapshot),
    /// A link could not be started.
    NetworkingFailed(String),
}
