//! End-to-end test for a queued match over the real UDP game link.
//!
//! The game side is a plain UDP socket; the match service and REST API are
//! in-process fakes. Covers queue join, pairing, a relayed ban and a critical
//! match start that stops retransmitting once acknowledged.

use futures_util::future::FutureExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use speedrun_bridge::core::config::{BridgeConfig, GameLinkConfig, BRIDGE_VERSION};
use speedrun_bridge::game::link::{GameLink, GameLinkEvent};
use speedrun_bridge::network::api::{ApiFuture, MatchApi, PlayerProfile, ServerVersion};
use speedrun_bridge::network::channel::{ServiceLinkEvent, ServicePort};
use speedrun_bridge::network::protocol::{MatchStartInfo, PairedInfo, ServiceEmit, ServiceInbound};
use speedrun_bridge::session::{
    BridgeCommand, BridgeEvent, ControlEvent, MatchPhase, QueueState, SessionController,
};

struct RecordingService {
    emitted: Arc<Mutex<Vec<ServiceEmit>>>,
}

impl ServicePort for RecordingService {
    fn connect(&mut self, _player_id: &str) {}

    fn reconnect(&mut self) {}

    fn disconnect(&mut self) {}

    fn is_connected(&self) -> bool {
        true
    }

    fn emit(&self, event: ServiceEmit) {
        self.emitted.lock().unwrap().push(event);
    }
}

#[derive(Default)]
struct AcceptingApi {
    joins: Mutex<u32>,
}

impl MatchApi for AcceptingApi {
    fn server_version(&self) -> ApiFuture<ServerVersion> {
        let version = ServerVersion { version: BRIDGE_VERSION, ..ServerVersion::default() };
        async move { Ok(version) }.boxed()
    }

    fn login(&self, _player_id: &str) -> ApiFuture<PlayerProfile> {
        async move { Ok(PlayerProfile::from_value(json!({"player_name": "runner"}))) }.boxed()
    }

    fn register(&self, _player_id: &str, player_name: &str) -> ApiFuture<PlayerProfile> {
        let profile = PlayerProfile::from_value(json!({ "player_name": player_name }));
        async move { Ok(profile) }.boxed()
    }

    fn queue_join(&self, _player_id: &str) -> ApiFuture<()> {
        *self.joins.lock().unwrap() += 1;
        async move { Ok(()) }.boxed()
    }

    fn queue_leave(&self, _player_id: &str) -> ApiFuture<()> {
        async move { Ok(()) }.boxed()
    }
}

struct FakeGame {
    socket: UdpSocket,
    bridge: SocketAddr,
}

impl FakeGame {
    async fn send(&self, value: Value) {
        let bytes = serde_json::to_vec(&value).unwrap();
        self.socket.send_to(&bytes, self.bridge).await.unwrap();
    }

    /// Next non-heartbeat datagram.
    async fn recv(&self, wait: Duration) -> Option<Value> {
        let deadline = Instant::now() + wait;
        let mut buf = [0u8; 4096];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (len, _) = timeout(remaining, self.socket.recv_from(&mut buf)).await.ok()?.ok()?;
            let value: Value = serde_json::from_slice(&buf[..len]).unwrap();
            match value["event"].as_str() {
                Some("ping") => self.send(json!({"event": "pong"})).await,
                Some("pong") => {}
                _ => return Some(value),
            }
        }
    }

    async fn expect(&self, event: &str) -> Value {
        let value = self.recv(Duration::from_secs(2)).await.expect("no datagram from bridge");
        assert_eq!(value["event"], event, "unexpected datagram {value}");
        value
    }
}

struct Rig {
    controller: SessionController<GameLink, RecordingService>,
    control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    game_rx: mpsc::UnboundedReceiver<GameLinkEvent>,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
    emitted: Arc<Mutex<Vec<ServiceEmit>>>,
    api: Arc<AcceptingApi>,
}

impl Rig {
    /// Process controller inputs until `done` holds or the wait runs out.
    async fn drive_until(
        &mut self,
        wait: Duration,
        done: impl Fn(&SessionController<GameLink, RecordingService>) -> bool,
    ) {
        let deadline = Instant::now() + wait;
        while !done(&self.controller) {
            assert!(Instant::now() < deadline, "condition not reached in time");
            let event = tokio::select! {
                Some(event) = self.control_rx.recv() => event,
                Some(event) = self.game_rx.recv() => ControlEvent::Game(event),
                _ = tokio::time::sleep(Duration::from_millis(20)) => continue,
            };
            self.controller.handle(event);
        }
    }

    fn inbound(&mut self, event: ServiceInbound) {
        self.controller.handle(ControlEvent::Service(ServiceLinkEvent::Inbound(event)));
    }
}

fn rig(game_addr: SocketAddr) -> Rig {
    let mut config = BridgeConfig::default();
    config.game = GameLinkConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        game_addr,
        buffer_size: 4096,
        ping_interval: Duration::from_secs(1),
        pong_timeout: Duration::from_secs(5),
        retry_interval: Duration::from_millis(250),
        retry_max: 5,
    };

    let (game_tx, game_rx) = mpsc::unbounded_channel();
    let game = GameLink::new(config.game.clone(), game_tx);
    let emitted = Arc::new(Mutex::new(Vec::new()));
    let service = RecordingService { emitted: emitted.clone() };
    let api = Arc::new(AcceptingApi::default());

    let (controller, control_rx, events) =
        SessionController::new(config, game, service, api.clone());
    Rig { controller, control_rx, game_rx, events, emitted, api }
}

#[tokio::test]
async fn test_queue_to_match_start_over_udp() {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut rig = rig(socket.local_addr().unwrap());

    // Login and start networking.
    rig.controller.handle(ControlEvent::Command(BridgeCommand::Login {
        player_id: "7656".to_string(),
    }));
    rig.drive_until(Duration::from_secs(2), |c| c.state().player_id.is_some()).await;
    rig.controller.handle(ControlEvent::Command(BridgeCommand::StartNetworking));
    rig.controller.handle(ControlEvent::Service(ServiceLinkEvent::Connected));

    let bridge = rig.controller.game().local_addr().expect("game link bound");
    let game = FakeGame { socket, bridge };

    // First contact, then queue.
    game.send(json!({"event": "queue_ready"})).await;
    rig.drive_until(Duration::from_secs(2), |c| c.state().queue_state == QueueState::Queued)
        .await;
    game.expect("version_request").await;
    assert_eq!(*rig.api.joins.lock().unwrap(), 1);

    // Paired.
    rig.inbound(ServiceInbound::Paired(PairedInfo {
        opponent_id: None,
        opponent_name: "rival".to_string(),
        opponent_elo: 1500,
        categories: vec!["Any%".to_string(), "Low%".to_string()],
        ban_order_first: true,
    }));
    assert_eq!(rig.controller.state().match_phase, MatchPhase::Banning);
    assert_eq!(rig.controller.state().queue_state, QueueState::Idle);
    let paired = game.expect("paired").await;
    assert_eq!(paired["opponent_elo"], 1500);

    // Ban relayed to the service.
    game.send(json!({"event": "ban", "category": "Any%"})).await;
    rig.drive_until(Duration::from_secs(2), |c| !c.service().emitted.lock().unwrap().is_empty())
        .await;
    assert_eq!(
        *rig.emitted.lock().unwrap(),
        vec![ServiceEmit::Ban { category: "Any%".to_string() }]
    );

    // Match start is critical.
    rig.inbound(ServiceInbound::MatchStart(MatchStartInfo {
        category: "Low%".to_string(),
        seed: "abc".to_string(),
    }));
    assert_eq!(rig.controller.state().match_phase, MatchPhase::InMatch);

    let start = game.expect("match_start").await;
    assert_eq!(start["category"], "Low%");
    assert_eq!(start["seed"], "abc");
    game.send(json!({
        "event": "ack",
        "ack_event": "match_start",
        "msg_id": start["msg_id"],
    }))
    .await;

    // Drain the ack through the controller, then confirm no retransmission.
    rig.drive_until(Duration::from_secs(1), |c| c.game().pending_critical() == 0).await;
    assert!(game.recv(Duration::from_millis(800)).await.is_none());

    let mut saw_started = false;
    while let Ok(event) = rig.events.try_recv() {
        if matches!(event, BridgeEvent::MatchStarted(_)) {
            saw_started = true;
        }
    }
    assert!(saw_started);
}

