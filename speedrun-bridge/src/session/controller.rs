//! Session Controller
//!
//! Owns [`SessionState`] and arbitrates every relay between the game and the
//! match service. All inputs (presentation commands, link events, completed
//! REST calls, timers) arrive as [`ControlEvent`]s on one task; handlers never
//! await. Slow work is spawned and reports back as another control event.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::BridgeConfig;
use crate::core::version::versions_match;
use crate::game::link::{GameLink, GameLinkEvent, GamePort};
use crate::game::protocol::{GameMessage, GameOutbound};
use crate::network::api::{ApiError, HttpMatchApi, MatchApi, PlayerProfile, ServerVersion};
use crate::network::channel::{ServiceLink, ServiceLinkEvent, ServicePort};
use crate::network::protocol::ServiceInbound;
use crate::session::events::{BridgeCommand, BridgeEvent};
use crate::session::state::{ChannelState, MatchPhase, QueueState, SessionSnapshot, SessionState};

/// Outcome of the version check plus login call.
#[derive(Debug)]
pub enum LoginStep {
    /// The service expects a different bridge build.
    Outdated(ServerVersion),
    /// Version matched and the login call returned.
    Ready {
        /// Service version info.
        version: ServerVersion,
        /// Player data.
        profile: PlayerProfile,
    },
}

/// Everything the controller task reacts to.
#[derive(Debug)]
pub enum ControlEvent {
    /// From presentation.
    Command(BridgeCommand),
    /// From the game link.
    Game(GameLinkEvent),
    /// From the service channel.
    Service(ServiceLinkEvent),
    /// Login call finished.
    LoginCompleted {
        /// Player id that was logged in.
        player_id: String,
        /// Result.
        result: Result<LoginStep, ApiError>,
    },
    /// Registration call finished.
    RegisterCompleted {
        /// Player id.
        player_id: String,
        /// Chosen display name.
        player_name: String,
        /// Result.
        result: Result<PlayerProfile, ApiError>,
    },
    /// Queue join finished.
    QueueJoinCompleted {
        /// Player the join was issued for.
        player_id: String,
        /// Issued by the reconnection rule rather than the game.
        rejoin: bool,
        /// Result.
        result: Result<(), ApiError>,
    },
    /// Queue leave finished.
    QueueLeaveCompleted {
        /// Player the leave was issued for.
        player_id: String,
        /// Result.
        result: Result<(), ApiError>,
    },
    /// Profile re-fetched.
    PlayerDataRefreshed {
        /// Player the refresh was issued for.
        player_id: String,
        /// Fresh player data.
        profile: PlayerProfile,
    },
    /// The scheduled channel reconnect is due.
    ReconnectDue,
}

async fn login_flow(
    api: &dyn MatchApi,
    player_id: &str,
    bridge_version: f64,
) -> Result<LoginStep, ApiError> {
    let version = api.server_version().await?;
    if !versions_match(bridge_version, version.version) {
        return Ok(LoginStep::Outdated(version));
    }
    let profile = api.login(player_id).await?;
    Ok(LoginStep::Ready { version, profile })
}

/// Session/match state machine.
pub struct SessionController<G: GamePort, S: ServicePort> {
    config: BridgeConfig,
    state: SessionState,
    game: G,
    service: S,
    api: Arc<dyn MatchApi>,
    server_version: Option<ServerVersion>,
    profile: Option<PlayerProfile>,
    reconnect_pending: bool,
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    last_snapshot: SessionSnapshot,
}

impl<G, S> SessionController<G, S>
where
    G: GamePort + 'static,
    S: ServicePort + 'static,
{
    /// Create a controller. Returns it with its control receiver and the
    /// presentation event stream.
    pub fn new(
        config: BridgeConfig,
        game: G,
        service: S,
        api: Arc<dyn MatchApi>,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<ControlEvent>,
        mpsc::UnboundedReceiver<BridgeEvent>,
    ) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let state = SessionState::default();

        let controller = Self {
            config,
            last_snapshot: state.snapshot(),
            state,
            game,
            service,
            api,
            server_version: None,
            profile: None,
            reconnect_pending: false,
            control_tx,
            events,
        };
        (controller, control_rx, events_rx)
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Game transport.
    pub fn game(&self) -> &G {
        &self.game
    }

    /// Service transport.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Sender for feeding control events from outside the run loop.
    pub fn control_sender(&self) -> mpsc::UnboundedSender<ControlEvent> {
        self.control_tx.clone()
    }

    /// Move the controller onto its own task.
    pub fn spawn(
        self,
        control_rx: mpsc::UnboundedReceiver<ControlEvent>,
        game_rx: mpsc::UnboundedReceiver<GameLinkEvent>,
        service_rx: mpsc::UnboundedReceiver<ServiceLinkEvent>,
    ) -> BridgeHandle {
        let control = self.control_tx.clone();
        let task = tokio::spawn(self.run(control_rx, game_rx, service_rx));
        BridgeHandle { control, task }
    }

    /// Drain all inputs until `Shutdown`.
    #[instrument(skip_all, name = "session")]
    pub async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
        mut game_rx: mpsc::UnboundedReceiver<GameLinkEvent>,
        mut service_rx: mpsc::UnboundedReceiver<ServiceLinkEvent>,
    ) {
        info!("Session controller started");

        loop {
            let event = tokio::select! {
                Some(event) = control_rx.recv() => event,
                Some(event) = game_rx.recv() => ControlEvent::Game(event),
                Some(event) = service_rx.recv() => ControlEvent::Service(event),
                else => break,
            };
            if !self.handle(event) {
                break;
            }
        }

        info!("Session controller stopped");
    }

    /// Apply one event. Returns `false` once the controller should stop.
    pub fn handle(&mut self, event: ControlEvent) -> bool {
        let keep_running = match event {
            ControlEvent::Command(command) => self.on_command(command),
            ControlEvent::Game(event) => {
                self.on_game(event);
                true
            }
            ControlEvent::Service(event) => {
                self.on_service(event);
                true
            }
            ControlEvent::LoginCompleted { player_id, result } => {
                self.on_login_completed(player_id, result);
                true
            }
            ControlEvent::RegisterCompleted { player_id, player_name, result } => {
                self.on_register_completed(player_id, player_name, result);
                true
            }
            ControlEvent::QueueJoinCompleted { player_id, rejoin, result } => {
                if self.is_current_player(&player_id, "queue join") {
                    self.on_queue_join_completed(rejoin, result);
                }
                true
            }
            ControlEvent::QueueLeaveCompleted { player_id, result } => {
                if self.is_current_player(&player_id, "queue leave") {
                    self.on_queue_leave_completed(result);
                }
                true
            }
            ControlEvent::PlayerDataRefreshed { player_id, profile } => {
                if self.is_current_player(&player_id, "player refresh") {
                    self.state.player_name = profile.player_name.clone();
                    self.profile = Some(profile.clone());
                    self.emit(BridgeEvent::PlayerDataRefreshed(profile));
                }
                true
            }
            ControlEvent::ReconnectDue => {
                self.on_reconnect_due();
                true
            }
        };

        self.publish_snapshot();
        keep_running
    }

    fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            debug!("Bridge event dropped, no listener");
        }
    }

    /// REST results issued before a logout (or for another player) are stale.
    fn is_current_player(&self, player_id: &str, what: &str) -> bool {
        let current = self.state.player_id.as_deref() == Some(player_id);
        if !current {
            debug!("Dropping stale {} result for {}", what, player_id);
        }
        current
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self.state.snapshot();
        if snapshot != self.last_snapshot {
            self.last_snapshot = snapshot.clone();
            self.emit(BridgeEvent::SessionChanged(snapshot));
        }
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    fn on_command(&mut self, command: BridgeCommand) -> bool {
        match command {
            BridgeCommand::Login { player_id } => self.login(player_id),
            BridgeCommand::Register { player_id, player_name } => {
                self.register(player_id, player_name)
            }
            BridgeCommand::StartNetworking => self.start_networking(),
            BridgeCommand::StopNetworking => self.stop_networking(),
            BridgeCommand::Logout => self.logout(),
            BridgeCommand::Shutdown => {
                info!("Shutting down");
                self.stop_networking();
                return false;
            }
        }
        true
    }

    fn login(&mut self, player_id: String) {
        info!("Login attempt for {}", player_id);
        let api = self.api.clone();
        let tx = self.control_tx.clone();
        let bridge_version = self.config.bridge_version;

        tokio::spawn(async move {
            let result = login_flow(api.as_ref(), &player_id, bridge_version).await;
            let _ = tx.send(ControlEvent::LoginCompleted { player_id, result });
        });
    }

    fn register(&mut self, player_id: String, player_name: String) {
        info!("Registering {} as {}", player_id, player_name);
        let api = self.api.clone();
        let tx = self.control_tx.clone();

        tokio::spawn(async move {
            let result = api.register(&player_id, &player_name).await;
            let _ = tx.send(ControlEvent::RegisterCompleted { player_id, player_name, result });
        });
    }

    fn start_networking(&mut self) {
        let Some(player_id) = self.state.player_id.clone() else {
            warn!("Start networking requested before login");
            self.emit(BridgeEvent::NetworkingFailed("not logged in".to_string()));
            return;
        };

        self.state.intentional_disconnect = false;
        if !self.game.is_running() {
            if let Err(e) = self.game.start() {
                error!("Game link failed to start: {}", e);
                self.emit(BridgeEvent::NetworkingFailed(e.to_string()));
                return;
            }
        }

        self.state.channel_state = ChannelState::Connecting;
        self.service.connect(&player_id);
    }

    /// The channel closes quietly, so the disconnect is reported here.
    fn stop_networking(&mut self) {
        self.state.intentional_disconnect = true;
        self.service.disconnect();
        self.game.stop();
        if self.state.channel_state != ChannelState::Disconnected {
            self.state.channel_state = ChannelState::Disconnected;
            self.emit(BridgeEvent::ServiceDisconnected);
        }
    }

    fn logout(&mut self) {
        if self.state.queue_state == QueueState::Queued {
            if let Some(player_id) = self.state.player_id.clone() {
                let api = self.api.clone();
                tokio::spawn(async move {
                    if let Err(e) = api.queue_leave(&player_id).await {
                        debug!("Queue leave on logout failed: {}", e);
                    }
                });
            }
        }

        self.stop_networking();
        self.state.reset();
        self.profile = None;
        self.server_version = None;
        info!("Logged out");
    }

    // =========================================================================
    // REST COMPLETIONS
    // =========================================================================

    fn on_login_completed(&mut self, player_id: String, result: Result<LoginStep, ApiError>) {
        match result {
            Ok(LoginStep::Outdated(version)) => {
                warn!(
                    "Bridge version {} does not match service version {}",
                    self.config.bridge_version, version.version
                );
                self.emit(BridgeEvent::BridgeVersionMismatch {
                    download_url: version.bridge_download_url,
                });
            }
            Ok(LoginStep::Ready { version, profile }) => {
                self.server_version = Some(version);
                self.state.player_id = Some(player_id.clone());

                if profile.new_player {
                    info!("New player {}, registration needed", player_id);
                    self.emit(BridgeEvent::RegistrationNeeded { player_id });
                } else {
                    info!("Login success for {} ({})", profile.player_name, player_id);
                    self.state.player_name = profile.player_name.clone();
                    self.profile = Some(profile.clone());
                    self.emit(BridgeEvent::LoginSucceeded(profile));
                }
            }
            Err(e) => {
                error!("Login failed: {}", e);
                self.emit(BridgeEvent::LoginFailed(e.user_message()));
            }
        }
    }

    fn on_register_completed(
        &mut self,
        player_id: String,
        player_name: String,
        result: Result<PlayerProfile, ApiError>,
    ) {
        match result {
            Ok(profile) => {
                info!("Registered {} as {}", player_id, player_name);
                self.state.player_id = Some(player_id);
                self.state.player_name = player_name;
                self.profile = Some(profile.clone());
                self.emit(BridgeEvent::LoginSucceeded(profile));
            }
            Err(e) => {
                warn!("Registration failed: {}", e);
                self.emit(BridgeEvent::RegistrationFailed(e.user_message()));
            }
        }
    }

    fn join_queue(&self, rejoin: bool) {
        let Some(player_id) = self.state.player_id.clone() else {
            debug!("Queue join without a player");
            return;
        };
        let api = self.api.clone();
        let tx = self.control_tx.clone();

        tokio::spawn(async move {
            let result = api.queue_join(&player_id).await;
            let _ = tx.send(ControlEvent::QueueJoinCompleted { player_id, rejoin, result });
        });
    }

    fn leave_queue(&self) {
        let Some(player_id) = self.state.player_id.clone() else {
            return;
        };
        info!("Leaving queue for {}", player_id);
        let api = self.api.clone();
        let tx = self.control_tx.clone();

        tokio::spawn(async move {
            let result = api.queue_leave(&player_id).await;
            let _ = tx.send(ControlEvent::QueueLeaveCompleted { player_id, result });
        });
    }

    fn on_queue_join_completed(&mut self, rejoin: bool, result: Result<(), ApiError>) {
        match result {
            Ok(()) if rejoin => info!("Queue re-join succeeded"),
            Ok(()) => {
                if self.state.is_match_active() {
                    debug!("Queue join landed after pairing, ignoring");
                    return;
                }
                info!("Queue join succeeded");
                self.state.queue_state = QueueState::Queued;
                self.emit(BridgeEvent::QueueJoined);
            }
            Err(ApiError::Forbidden) => {
                warn!("Queue join rejected, player is banned");
                self.state.queue_state = QueueState::Idle;
                self.game.send_to_game(GameOutbound::IsBanned);
                self.emit(BridgeEvent::PlayerBanned);
            }
            Err(e) => error!("Queue join failed: {}", e),
        }
    }

    fn on_queue_leave_completed(&mut self, result: Result<(), ApiError>) {
        match result {
            Ok(()) => {
                info!("Queue leave succeeded");
                self.state.queue_state = QueueState::Idle;
                self.emit(BridgeEvent::QueueLeft);
            }
            Err(e) => error!("Queue leave failed: {}", e),
        }
    }

    fn refresh_player_data(&self) {
        let Some(player_id) = self.state.player_id.clone() else {
            return;
        };
        let api = self.api.clone();
        let tx = self.control_tx.clone();

        tokio::spawn(async move {
            match api.login(&player_id).await {
                Ok(profile) if !profile.new_player => {
                    let _ = tx.send(ControlEvent::PlayerDataRefreshed { player_id, profile });
                }
                Ok(_) => {}
                Err(e) => debug!("Player data refresh failed: {}", e),
            }
        });
    }

    // =========================================================================
    // GAME -> SERVICE
    // =========================================================================

    fn on_game(&mut self, event: GameLinkEvent) {
        match event {
            GameLinkEvent::Connected => {
                info!("Game connected");
                self.emit(BridgeEvent::GameConnected);
                self.game.send_to_game(GameOutbound::VersionRequest);
            }
            GameLinkEvent::Disconnected => self.on_game_disconnected(),
            GameLinkEvent::Message(message) => self.on_game_message(message),
        }
    }

    fn on_game_disconnected(&mut self) {
        warn!("Game disconnected");
        if self.state.queue_state == QueueState::Queued {
            self.leave_queue();
        }
        if self.state.is_match_active() {
            self.state.end_match();
            self.service.send_game_disconnect();
            self.emit(BridgeEvent::MatchScrapped);
        }
        self.emit(BridgeEvent::GameDisconnected);
    }

    fn on_game_message(&mut self, message: GameMessage) {
        let phase = self.state.match_phase;
        let in_match = phase == MatchPhase::InMatch;

        match message {
            GameMessage::QueueReady => {
                if self.state.is_match_active() {
                    debug!("queue_ready during a match, ignoring");
                } else {
                    self.join_queue(false);
                }
            }
            GameMessage::QueueLeave => self.leave_queue(),
            GameMessage::Ban { category } if phase == MatchPhase::Banning => {
                self.service.send_ban(&category);
            }
            GameMessage::Progress { area, level, theme } if in_match => {
                self.service.send_progress(area, level, theme);
            }
            GameMessage::Death if in_match => self.service.send_death(),
            GameMessage::InstantRestart if in_match => self.service.send_instant_restart(),
            GameMessage::Completion if in_match => self.service.send_completion(),
            GameMessage::RequestSeedChange if in_match => self.service.send_request_seed_change(),
            GameMessage::RequestDraw if in_match => self.service.send_request_draw(),
            GameMessage::Forfeit if in_match => self.service.send_forfeit(),
            GameMessage::SendChat { message } => self.service.send_chat(&message),
            GameMessage::ClosePostmatch => self.service.send_close_postmatch(),
            GameMessage::VersionResponse { version } => self.check_game_version(version),
            GameMessage::Ping | GameMessage::Pong | GameMessage::Ack { .. } | GameMessage::Unknown => {}
            other => debug!("Dropping {:?} in phase {:?}", other, phase),
        }
    }

    fn check_game_version(&mut self, game_version: f64) {
        let Some(server) = self.server_version.as_ref() else {
            debug!("Game version {} received before login", game_version);
            return;
        };
        info!("Game version {} (service {})", game_version, server.version);
        if versions_match(game_version, server.version) {
            return;
        }

        warn!("Game mod version mismatch");
        let download_url = server.game_mod_download_url.clone();
        self.game.send_to_game(GameOutbound::VersionMismatch);
        self.stop_networking();
        self.emit(BridgeEvent::GameVersionMismatch { download_url });
    }

    // =========================================================================
    // SERVICE -> GAME
    // =========================================================================

    fn on_service(&mut self, event: ServiceLinkEvent) {
        match event {
            ServiceLinkEvent::Connected => {
                info!("Match service connected");
                self.state.channel_state = ChannelState::Connected;
                self.emit(BridgeEvent::ServiceConnected);
                if self.state.queue_state == QueueState::Queued {
                    info!("Reconnected while queued, re-joining");
                    self.join_queue(true);
                }
            }
            ServiceLinkEvent::Disconnected
                if self.state.channel_state == ChannelState::Disconnected =>
            {
                debug!("Match service already disconnected");
            }
            ServiceLinkEvent::Disconnected => {
                warn!(
                    "Match service disconnected (intentional={})",
                    self.state.intentional_disconnect
                );
                self.state.channel_state = ChannelState::Disconnected;
                self.emit(BridgeEvent::ServiceDisconnected);
                self.schedule_reconnect();
            }
            ServiceLinkEvent::Inbound(event) => self.on_service_event(event),
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.state.intentional_disconnect || self.state.player_id.is_none() {
            return;
        }
        if self.reconnect_pending {
            debug!("Reconnect already scheduled");
            return;
        }

        self.reconnect_pending = true;
        let delay = self.config.reconnect_delay;
        let tx = self.control_tx.clone();
        info!("Scheduling reconnect in {:?}", delay);
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(ControlEvent::ReconnectDue);
        });
    }

    fn on_reconnect_due(&mut self) {
        self.reconnect_pending = false;
        if self.state.intentional_disconnect || self.state.player_id.is_none() {
            debug!("Reconnect skipped, networking stopped");
            return;
        }
        if self.state.channel_state == ChannelState::Connected || self.service.is_connected() {
            debug!("Reconnect skipped, channel already back");
            return;
        }

        info!("Attempting channel reconnect");
        self.state.channel_state = ChannelState::Connecting;
        self.service.reconnect();
    }

    /// Retry-until-ack for critical messages, best effort for the rest.
    fn relay_to_game(&self, message: GameOutbound) {
        if message.is_critical() {
            self.game.send_critical(message);
        } else {
            self.game.send_to_game(message);
        }
    }

    fn on_service_event(&mut self, event: ServiceInbound) {
        let phase = self.state.match_phase;

        match event {
            ServiceInbound::Paired(info) if phase == MatchPhase::None => {
                info!("Paired with {} ({})", info.opponent_name, info.opponent_elo);
                self.state.begin_ban_phase(&info);
                self.relay_to_game(GameOutbound::Paired {
                    opponent_name: info.opponent_name.clone(),
                    opponent_elo: info.opponent_elo,
                    categories: info.categories.clone(),
                    ban_order_first: info.ban_order_first,
                });
                self.emit(BridgeEvent::Paired(info));
            }
            ServiceInbound::BanUpdate { categories } if phase == MatchPhase::Banning => {
                debug!("Remaining categories {:?}", categories);
                self.state.update_categories(&categories);
                self.relay_to_game(GameOutbound::BanUpdate { categories: categories.clone() });
                self.emit(BridgeEvent::BanUpdate(categories));
            }
            ServiceInbound::MatchStart(info) if phase == MatchPhase::Banning => {
                info!("Match start: {} seed {}", info.category, info.seed);
                self.state.begin_match(&info, Utc::now());
                self.relay_to_game(GameOutbound::MatchStart {
                    category: info.category.clone(),
                    seed: info.seed.clone(),
                });
                self.emit(BridgeEvent::MatchStarted(info));
            }
            ServiceInbound::OpponentProgress { area, theme } if phase == MatchPhase::InMatch => {
                self.relay_to_game(GameOutbound::OpponentProgress { area, theme });
                self.emit(BridgeEvent::OpponentProgress { area, theme });
            }
            ServiceInbound::MatchResult(info) if phase != MatchPhase::None => {
                info!("Match result: {} ({:+})", info.result, info.elo_change);
                self.state.end_match();
                self.relay_to_game(GameOutbound::MatchResult {
                    result: info.result.clone(),
                    elo_change: info.elo_change,
                });
                if let Some(record) = info.match_data.clone() {
                    self.emit(BridgeEvent::MatchRecorded(record));
                }
                self.refresh_player_data();
                self.emit(BridgeEvent::MatchResult(info));
            }
            ServiceInbound::MatchScrapped if phase != MatchPhase::None => {
                info!("Match scrapped");
                self.state.end_match();
                self.relay_to_game(GameOutbound::MatchScrapped);
                self.emit(BridgeEvent::MatchScrapped);
            }
            ServiceInbound::DoSeedChange { seed } if phase == MatchPhase::InMatch => {
                self.relay_to_game(GameOutbound::DoSeedChange { seed });
            }
            ServiceInbound::ReceiveSeedChangeRequest if phase == MatchPhase::InMatch => {
                self.relay_to_game(GameOutbound::ReceiveSeedChangeRequest);
            }
            ServiceInbound::ReceiveDrawRequest if phase == MatchPhase::InMatch => {
                self.relay_to_game(GameOutbound::ReceiveDrawRequest);
            }
            ServiceInbound::ReceiveChat { message, sender_name } => {
                self.relay_to_game(GameOutbound::ReceiveChat { message, sender_name });
            }
            ServiceInbound::PostmatchClosed => {
                self.relay_to_game(GameOutbound::PostmatchClosed);
            }
            other => debug!("Dropping {} in phase {:?}", other.event_name(), phase),
        }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Presentation-side handle to a running controller.
pub struct BridgeHandle {
    control: mpsc::UnboundedSender<ControlEvent>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    fn send(&self, command: BridgeCommand) {
        if self.control.send(ControlEvent::Command(command)).is_err() {
            warn!("Session controller is gone");
        }
    }

    /// Version check, then log in.
    pub fn login(&self, player_id: impl Into<String>) {
        self.send(BridgeCommand::Login { player_id: player_id.into() });
    }

    /// Create an account.
    pub fn register(&self, player_id: impl Into<String>, player_name: impl Into<String>) {
        self.send(BridgeCommand::Register {
            player_id: player_id.into(),
            player_name: player_name.into(),
        });
    }

    /// Start both links.
    pub fn start_networking(&self) {
        self.send(BridgeCommand::StartNetworking);
    }

    /// Stop both links.
    pub fn stop_networking(&self) {
        self.send(BridgeCommand::StopNetworking);
    }

    /// Leave queue, stop networking, forget the player.
    pub fn logout(&self) {
        self.send(BridgeCommand::Logout);
    }

    /// Stop the controller and wait for it to finish.
    pub async fn shutdown(self) {
        self.send(BridgeCommand::Shutdown);
        if let Err(e) = self.task.await {
            error!("Session controller task failed: {}", e);
        }
    }
}

/// Build the production bridge (UDP game link, Socket.IO channel, HTTP API)
/// and start its controller.
pub fn spawn_bridge(
    config: BridgeConfig,
) -> Result<(BridgeHandle, mpsc::UnboundedReceiver<BridgeEvent>), ApiError> {
    let api: Arc<dyn MatchApi> =
        Arc::new(HttpMatchApi::new(&config.server_url, config.request_timeout)?);

    let (game_tx, game_rx) = mpsc::unbounded_channel();
    let (service_tx, service_rx) = mpsc::unbounded_channel();
    let game = GameLink::new(config.game.clone(), game_tx);
    let service = ServiceLink::new(config.channel.clone(), service_tx);

    let (controller, control_rx, events) = SessionController::new(config, game, service, api);
    Ok((controller.spawn(control_rx, game_rx, service_rx), events))
}
