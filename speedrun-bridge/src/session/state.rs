//! Session State
//!
//! Everything the controller knows about the logged-in player, the channel,
//! the queue and the current match. Only the controller mutates it; the
//! outside world sees [`SessionSnapshot`] copies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::network::protocol::{MatchStartInfo, PairedInfo};

/// Event channel connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No channel.
    #[default]
    Disconnected,
    /// Connect or reconnect in progress.
    Connecting,
    /// Namespace connected.
    Connected,
}

/// Matchmaking queue membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Not queued.
    #[default]
    Idle,
    /// In the matchmaking queue.
    Queued,
}

/// Match phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// No match.
    #[default]
    None,
    /// Paired, categories being banned.
    Banning,
    /// Run in progress.
    InMatch,
}

/// Details of the current match.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MatchContext {
    /// Opponent player id, if the service sent one.
    pub opponent_id: Option<String>,
    /// Opponent display name.
    pub opponent_name: String,
    /// Opponent rating.
    pub opponent_elo: i64,
    /// Categories still in play.
    pub categories: Vec<String>,
    /// Whether this player bans first.
    pub ban_order_first: bool,
    /// Category, once the match starts.
    pub category: Option<String>,
    /// When the match started.
    pub start_time: Option<DateTime<Utc>>,
}

impl MatchContext {
    /// Context for a fresh pairing.
    pub fn from_pairing(info: &PairedInfo) -> Self {
        Self {
            opponent_id: info.opponent_id.clone(),
            opponent_name: info.opponent_name.clone(),
            opponent_elo: info.opponent_elo,
            categories: info.categories.clone(),
            ban_order_first: info.ban_order_first,
            category: None,
            start_time: None,
        }
    }
}

/// Controller-owned session state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    /// Player id, set after login.
    pub player_id: Option<String>,
    /// Display name, set after login or registration.
    pub player_name: String,
    /// Event channel state.
    pub channel_state: ChannelState,
    /// Queue membership. Kept across a channel drop so it can be re-joined.
    pub queue_state: QueueState,
    /// Match phase.
    pub match_phase: MatchPhase,
    /// Set by stop/logout; suppresses auto-reconnect.
    pub intentional_disconnect: bool,
    /// Populated whenever `match_phase` is not `None`.
    pub match_context: Option<MatchContext>,
}

impl SessionState {
    /// Banning or in a match.
    pub fn is_match_active(&self) -> bool {
        self.match_phase != MatchPhase::None
    }

    /// Opponent found: leave the queue and start banning.
    pub fn begin_ban_phase(&mut self, info: &PairedInfo) {
        self.queue_state = QueueState::Idle;
        self.match_phase = MatchPhase::Banning;
        self.match_context = Some(MatchContext::from_pairing(info));
    }

    /// Bans done, run starts.
    pub fn begin_match(&mut self, info: &MatchStartInfo, now: DateTime<Utc>) {
        let context = self.match_context.get_or_insert_with(MatchContext::default);
        context.category = Some(info.category.clone());
        context.start_time = Some(now);
        self.match_phase = MatchPhase::InMatch;
    }

    /// Remaining categories after a ban.
    pub fn update_categories(&mut self, categories: &[String]) {
        if let Some(context) = self.match_context.as_mut() {
            context.categories = categories.to_vec();
        }
    }

    /// Result, scrap or local loss of the game.
    pub fn end_match(&mut self) {
        self.match_phase = MatchPhase::None;
        self.match_context = None;
    }

    /// Back to a logged-out session.
    pub fn reset(&mut self) {
        *self = Self {
            intentional_disconnect: true,
            ..Self::default()
        };
    }

    /// Presentation copy.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            player_id: self.player_id.clone(),
            player_name: self.player_name.clone(),
            channel_state: self.channel_state,
            queue_state: self.queue_state,
            match_phase: self.match_phase,
            match_context: self.match_context.clone(),
        }
    }
}

/// Read-only view of the session for presentation.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    /// Player id.
    pub player_id: Option<String>,
    /// Display name.
    pub player_name: String,
    /// Event channel state.
    pub channel_state: ChannelState,
    /// Queue membership.
    pub queue_state: QueueState,
    /// Match phase.
    pub match_phase: MatchPhase,
    /// Current match, if any.
    pub match_context: Option<MatchContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired() -> PairedInfo {
        PairedInfo {
            opponent_id: Some("111".to_string()),
            opponent_name: "rival".to_string(),
            opponent_elo: 1500,
            categories: vec!["Any%".to_string(), "Low%".to_string()],
            ban_order_first: true,
        }
    }

    #[test]
    fn test_pairing_leaves_queue() {
        let mut state = SessionState {
            queue_state: QueueState::Queued,
            ..SessionState::default()
        };

        state.begin_ban_phase(&paired());
        assert_eq!(state.queue_state, QueueState::Idle);
        assert_eq!(state.match_phase, MatchPhase::Banning);
        assert_eq!(state.match_context.as_ref().unwrap().opponent_elo, 1500);
    }

    #[test]
    fn test_match_start_sets_category_and_time() {
        let mut state = SessionState::default();
        state.begin_ban_phase(&paired());
        state.update_categories(&["Low%".to_string()]);

        let now = Utc::now();
        state.begin_match(
            &MatchStartInfo { category: "Low%".to_string(), seed: "abc".to_string() },
            now,
        );

        let context = state.match_context.as_ref().unwrap();
        assert_eq!(state.match_phase, MatchPhase::InMatch);
        assert_eq!(context.category.as_deref(), Some("Low%"));
        assert_eq!(context.categories, vec!["Low%".to_string()]);
        assert_eq!(context.start_time, Some(now));
    }

    #[test]
    fn test_active_phase_always_has_context() {
        let mut state = SessionState::default();
        state.begin_match(&MatchStartInfo::default(), Utc::now());
        assert!(state.is_match_active());
        assert!(state.match_context.is_some());

        state.end_match();
        assert!(!state.is_match_active());
        assert!(state.match_context.is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut state = SessionState {
            player_id: Some("7656".to_string()),
            player_name: "runner".to_string(),
            channel_state: ChannelState::Connected,
            queue_state: QueueState::Queued,
            ..SessionState::default()
        };
        state.begin_ban_phase(&paired());

        state.reset();
        assert_eq!(state.player_id, None);
        assert_eq!(state.channel_state, ChannelState::Disconnected);
        assert_eq!(state.match_phase, MatchPhase::None);
        assert!(state.match_context.is_none());
        assert!(state.intentional_disconnect);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut state = SessionState::default();
        state.begin_ban_phase(&paired());

        let value = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(value["match_phase"], "banning");
        assert_eq!(value["queue_state"], "idle");
        assert_eq!(value["match_context"]["opponent_name"], "rival");
    }
}
