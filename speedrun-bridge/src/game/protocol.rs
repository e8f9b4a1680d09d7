//! Game Datagram Protocol
//!
//! Wire format between the bridge and the local game process.
//! Every datagram is a single UTF-8 JSON object discriminated by `event`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::core::version::deserialize_version;

/// Field carrying the correlation id of a critical message.
pub const MESSAGE_ID_FIELD: &str = "msg_id";

/// Why an inbound datagram was discarded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not UTF-8 or not JSON.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// JSON without a string `event` field.
    #[error("missing event discriminator")]
    MissingEvent,
    /// Known event with missing or mistyped fields.
    #[error("malformed {event} payload: {source}")]
    Payload {
        /// Event name.
        event: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

// =============================================================================
// GAME -> BRIDGE MESSAGES
// =============================================================================

/// Messages sent from the game to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameMessage {
    /// Heartbeat request; answered with `pong`.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Player wants to enter the matchmaking queue.
    QueueReady,
    /// Player wants to leave the matchmaking queue.
    QueueLeave,
    /// Category banned during the ban phase.
    Ban {
        /// Banned category.
        category: String,
    },
    /// Run progress during a match.
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
    /// Player restarted the run.
    InstantRestart,
    /// Player finished the run.
    Completion,
    /// Reply to `version_request`.
    VersionResponse {
        /// Game mod version.
        #[serde(deserialize_with = "deserialize_version")]
        version: f64,
    },
    /// Chat line to relay to the opponent.
    SendChat {
        /// Message text.
        message: String,
    },
    /// Ask the opponent for a new seed.
    RequestSeedChange,
    /// Offer a draw.
    RequestDraw,
    /// Give up the match.
    Forfeit,
    /// Player dismissed the post-match screen.
    ClosePostmatch,
    /// Acknowledgment of a critical message.
    Ack {
        /// Event name being acknowledged.
        ack_event: String,
        /// Correlation id, echoed by games that support it.
        #[serde(default)]
        msg_id: Option<Uuid>,
    },
    /// Event name this bridge does not know.
    #[serde(other)]
    Unknown,
}

impl GameMessage {
    /// Decode one datagram.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(raw)?;
        let event = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingEvent)?
            .to_string();

        serde_json::from_value(value).map_err(|source| DecodeError::Payload { event, source })
    }

    /// Heartbeat and ack traffic is consumed by the link itself.
    pub fn is_link_control(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong | Self::Ack { .. })
    }
}

// =============================================================================
// BRIDGE -> GAME MESSAGES
// =============================================================================

/// Messages sent from the bridge to the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameOutbound {
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Opponent found, ban phase begins.
    Paired {
        /// Opponent display name.
        opponent_name: String,
        /// Opponent rating.
        opponent_elo: i64,
        /// Categories still in play.
        categories: Vec<String>,
        /// Whether this player bans first.
        ban_order_first: bool,
    },
    /// Categories remaining after a ban.
    BanUpdate {
        /// Remaining categories.
        categories: Vec<String>,
    },
    /// Match begins (critical).
    MatchStart {
        /// Chosen category.
        category: String,
        /// Level seed.
        seed: String,
    },
    /// Opponent run progress.
    OpponentProgress {
        /// World number.
        area: i64,
        /// Theme id.
        theme: i64,
    },
    /// Match finished (critical).
    MatchResult {
        /// Outcome label (win/loss/draw...).
        result: String,
        /// Rating change.
        elo_change: i64,
    },
    /// Match was abandoned.
    MatchScrapped,
    /// Queue join was refused.
    IsBanned,
    /// Game mod version does not match the service.
    VersionMismatch,
    /// Ask the game for its mod version.
    VersionRequest,
    /// Switch to a new seed (critical).
    DoSeedChange {
        /// New seed.
        seed: String,
    },
    /// Chat line from the opponent.
    ReceiveChat {
        /// Message text.
        message: String,
        /// Opponent display name.
        sender_name: String,
    },
    /// Opponent asked for a new seed.
    ReceiveSeedChangeRequest,
    /// Opponent offered a draw.
    ReceiveDrawRequest,
    /// Opponent dismissed the post-match screen.
    PostmatchClosed,
}

impl GameOutbound {
    /// Wire name of this message.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Paired { .. } => "paired",
            Self::BanUpdate { .. } => "ban_update",
            Self::MatchStart { .. } => "match_start",
            Self::OpponentProgress { .. } => "opponent_progress",
            Self::MatchResult { .. } => "match_result",
            Self::MatchScrapped => "match_scrapped",
            Self::IsBanned => "is_banned",
            Self::VersionMismatch => "version_mismatch",
            Self::VersionRequest => "version_request",
            Self::DoSeedChange { .. } => "do_seed_change",
            Self::ReceiveChat { .. } => "receive_chat",
            Self::ReceiveSeedChangeRequest => "receive_seed_change_request",
            Self::ReceiveDrawRequest => "receive_draw_request",
            Self::PostmatchClosed => "postmatch_closed",
        }
    }

    /// Messages that must go through retry-until-ack.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::MatchStart { .. } | Self::MatchResult { .. } | Self::DoSeedChange { .. }
        )
    }

    /// Encode as a datagram, tagging it with a correlation id when given.
    pub fn encode(&self, message_id: Option<Uuid>) -> Result<Vec<u8>, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let (Some(id), Value::Object(map)) = (message_id, &mut value) {
            map.insert(MESSAGE_ID_FIELD.to_string(), Value::String(id.to_string()));
        }
        serde_json::to_vec(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ban() {
        let msg = GameMessage::decode(br#"{"event":"ban","category":"Any%"}"#).unwrap();
        assert_eq!(msg, GameMessage::Ban { category: "Any%".to_string() });
    }

    #[test]
    fn test_decode_progress() {
        let msg = GameMessage::decode(br#"{"event":"progress","area":3,"level":2,"theme":4}"#)
            .unwrap();
        assert_eq!(msg, GameMessage::Progress { area: 3, level: 2, theme: 4 });
    }

    #[test]
    fn test_missing_event_is_rejected() {
        let err = GameMessage::decode(br#"{"category":"Any%"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingEvent));

        let err = GameMessage::decode(br#"{"event":7}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingEvent));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            GameMessage::decode(b"not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            GameMessage::decode(&[0xff, 0xfe, 0x00]),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_known_event_missing_field() {
        let err = GameMessage::decode(br#"{"event":"ban"}"#).unwrap_err();
        match err {
            DecodeError::Payload { event, .. } => assert_eq!(event, "ban"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event() {
        let msg = GameMessage::decode(br#"{"event":"spectate","x":1}"#).unwrap();
        assert_eq!(msg, GameMessage::Unknown);
    }

    #[test]
    fn test_version_response_accepts_string() {
        let msg = GameMessage::decode(br#"{"event":"version_response","version":"1.02"}"#)
            .unwrap();
        match msg {
            GameMessage::VersionResponse { version } => assert!((version - 1.02).abs() < 1e-9),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_ack_with_and_without_id() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"event":"ack","ack_event":"match_start","msg_id":"{id}"}}"#);
        let msg = GameMessage::decode(raw.as_bytes()).unwrap();
        assert_eq!(
            msg,
            GameMessage::Ack { ack_event: "match_start".to_string(), msg_id: Some(id) }
        );

        let legacy = GameMessage::decode(br#"{"event":"ack","ack_event":"match_start"}"#).unwrap();
        assert_eq!(
            legacy,
            GameMessage::Ack { ack_event: "match_start".to_string(), msg_id: None }
        );
    }

    #[test]
    fn test_link_control_messages() {
        assert!(GameMessage::Ping.is_link_control());
        assert!(GameMessage::Pong.is_link_control());
        assert!(!GameMessage::QueueReady.is_link_control());
    }

    #[test]
    fn test_encode_critical_with_id() {
        let id = Uuid::new_v4();
        let msg = GameOutbound::MatchStart {
            category: "Low%".to_string(),
            seed: "abc".to_string(),
        };
        assert!(msg.is_critical());

        let bytes = msg.encode(Some(id)).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event"], "match_start");
        assert_eq!(value["category"], "Low%");
        assert_eq!(value["seed"], "abc");
        assert_eq!(value["msg_id"], id.to_string());
    }

    #[test]
    fn test_encode_plain() {
        let bytes = GameOutbound::IsBanned.encode(None).unwrap();
        assert_eq!(bytes, br#"{"event":"is_banned"}"#.to_vec());
        assert!(!GameOutbound::IsBanned.is_critical());
    }

    #[test]
    fn test_event_names_match_serde_tags() {
        let samples = vec![
            GameOutbound::Ping,
            GameOutbound::Paired {
                opponent_name: "rival".to_string(),
                opponent_elo: 1500,
                categories: vec!["Any%".to_string()],
                ban_order_first: true,
            },
            GameOutbound::BanUpdate { categories: vec![] },
            GameOutbound::OpponentProgress { area: 1, theme: 2 },
            GameOutbound::MatchResult { result: "win".to_string(), elo_change: 12 },
            GameOutbound::DoSeedChange { seed: "s".to_string() },
            GameOutbound::ReceiveChat { message: "gg".to_string(), sender_name: "rival".to_string() },
            GameOutbound::ReceiveSeedChangeRequest,
            GameOutbound::ReceiveDrawRequest,
            GameOutbound::PostmatchClosed,
            GameOutbound::VersionRequest,
        ];

        for msg in samples {
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value["event"], msg.event_name());
        }
    }
}
