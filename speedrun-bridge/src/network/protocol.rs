//! Service Event Protocol
//!
//! Typed events exchanged with the match service over the `/ws/match`
//! namespace. Inbound payloads are decoded once here; missing fields take
//! their declared defaults so a sparse payload never fails a handler.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// =============================================================================
// SERVICE -> BRIDGE EVENTS
// =============================================================================

/// Opponent found.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairedInfo {
    /// Opponent player id, when the service sends one.
    pub opponent_id: Option<String>,
    /// Opponent display name.
    pub opponent_name: String,
    /// Opponent rating.
    pub opponent_elo: i64,
    /// Categories available for banning.
    pub categories: Vec<String>,
    /// Whether this player bans first.
    pub ban_order_first: bool,
}

/// Match begins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchStartInfo {
    /// Category left after bans.
    pub category: String,
    /// Level seed.
    pub seed: String,
}

/// Match finished.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchResultInfo {
    /// Outcome label.
    pub result: String,
    /// Rating change.
    pub elo_change: i64,
    /// Full match record for the local cache.
    pub match_data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CategoriesPayload {
    categories: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProgressPayload {
    area: i64,
    theme: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChatPayload {
    message: String,
    sender_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedPayload {
    seed: String,
}

/// Events pushed by the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceInbound {
    /// Opponent found, ban phase begins.
    Paired(PairedInfo),
    /// Remaining categories after a ban.
    BanUpdate {
        /// Remaining categories.
        categories: Vec<String>,
    },
    /// Match begins.
    MatchStart(MatchStartInfo),
    /// Opponent run progress.
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
    /// Chat line from the opponent.
    ReceiveChat {
        /// Message text.
        message: String,
        /// Opponent display name.
        sender_name: String,
    },
    /// Opponent asked for a new seed.
    ReceiveSeedChangeRequest,
    /// Seed change agreed.
    DoSeedChange {
        /// New seed.
        seed: String,
    },
    /// Opponent offered a draw.
    ReceiveDrawRequest,
    /// Opponent dismissed the post-match screen.
    PostmatchClosed,
}

fn payload<T: DeserializeOwned + Default>(data: Value) -> T {
    match data {
        Value::Null => T::default(),
        other => serde_json::from_value(other).unwrap_or_default(),
    }
}

impl ServiceInbound {
    /// Decode a named event. Returns `None` for events this bridge ignores.
    ///
    /// Payloads that do not match the expected shape fall back to defaults.
    pub fn decode(name: &str, data: Value) -> Option<Self> {
        let event = match name {
            "paired" => Self::Paired(payload(data)),
            "ban_update" => Self::BanUpdate {
                categories: payload::<CategoriesPayload>(data).categories,
            },
            "match_start" => Self::MatchStart(payload(data)),
            "opponent_progress" => {
                let p: ProgressPayload = payload(data);
                Self::OpponentProgress { area: p.area, theme: p.theme }
            }
            "match_result" => Self::MatchResult(payload(data)),
            "match_scrapped" => Self::MatchScrapped,
            "receive_chat" => {
                let p: ChatPayload = payload(data);
                Self::ReceiveChat { message: p.message, sender_name: p.sender_name }
            }
            "receive_seed_change_request" => Self::ReceiveSeedChangeRequest,
            "do_seed_change" => Self::DoSeedChange { seed: payload::<SeedPayload>(data).seed },
            "receive_draw_request" => Self::ReceiveDrawRequest,
            "postmatch_closed" => Self::PostmatchClosed,
            _ => return None,
        };
        Some(event)
    }

    /// Wire name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Paired(_) => "paired",
            Self::BanUpdate { .. } => "ban_update",
            Self::MatchStart(_) => "match_start",
            Self::OpponentProgress { .. } => "opponent_progress",
            Self::MatchResult(_) => "match_result",
            Self::MatchScrapped => "match_scrapped",
            Self::ReceiveChat { .. } => "receive_chat",
            Self::ReceiveSeedChangeRequest => "receive_seed_change_request",
            Self::DoSeedChange { .. } => "do_seed_change",
            Self::ReceiveDrawRequest => "receive_draw_request",
            Self::PostmatchClosed => "postmatch_closed",
        }
    }
}

// =============================================================================
// BRIDGE -> SERVICE EVENTS
// =============================================================================

/// Events the bridge emits to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEmit {
    /// Category banned.
    Ban {
        /// Banned category.
        category: String,
    },
    /// Run progress.
    Progress {
        /// World number.
        area: i64,
        /// Level within the world.
        level: i64,
        /// Theme id.
        theme: i64,
    },
    /// Player died.
    Death,
    /// Player restarted.
    InstantRestart,
    /// Player finished.
    Completion,
    /// Chat line.
    SendChat {
        /// Message text.
        message: String,
    },
    /// The game process vanished mid-match.
    GameDisconnect,
    /// Ask for a new seed.
    RequestSeedChange,
    /// Offer a draw.
    RequestDraw,
    /// Give up.
    Forfeit,
    /// Post-match screen dismissed.
    ClosePostmatch,
}

impl ServiceEmit {
    /// Wire name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Ban { .. } => "ban",
            Self::Progress { .. } => "progress",
            Self::Death => "death",
            Self::InstantRestart => "instant_restart",
            Self::Completion => "completion",
            Self::SendChat { .. } => "send_chat",
            Self::GameDisconnect => "game_disconnect",
            Self::RequestSeedChange => "request_seed_change",
            Self::RequestDraw => "request_draw",
            Self::Forfeit => "forfeit",
            Self::ClosePostmatch => "close_postmatch",
        }
    }

    /// Event payload. Events without fields send an empty object.
    pub fn data(&self) -> Value {
        match self {
            Self::Ban { category } => json!({ "category": category }),
            Self::Progress { area, level, theme } => {
                json!({ "area": area, "level": level, "theme": theme })
            }
            Self::SendChat { message } => json!({ "message": message }),
            _ => json!({}),
        }
    }
}
