//! Game Link
//!
//! UDP transport to the local game process.
//!
//! The link binds passively and stays silent until the game sends its first
//! datagram. The sender of that datagram becomes the destination for every
//! later send, and a heartbeat starts. Critical messages are retransmitted
//! until the game acknowledges them or the attempt budget runs out.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::config::GameLinkConfig;
use crate::game::liveness::{GameLiveness, LivenessTransition};
use crate::game::protocol::{GameMessage, GameOutbound};

/// Events the link reports to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum GameLinkEvent {
    /// The game became reachable.
    Connected,
    /// The game stopped answering.
    Disconnected,
    /// A game message for the controller.
    Message(GameMessage),
}

/// Game link errors.
#[derive(Debug, thiserror::Error)]
pub enum GameLinkError {
    /// Failed to bind the local port.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// OS error.
        source: io::Error,
    },
    /// `start` called twice.
    #[error("game link already running")]
    AlreadyRunning,
}

/// How a critical send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The game acknowledged after this many transmissions.
    Acknowledged {
        /// Transmissions made.
        attempts: u32,
    },
    /// Gave up; the game may still have received it.
    Exhausted {
        /// Transmissions made.
        attempts: u32,
    },
    /// The link stopped first.
    Cancelled,
}

/// Operations the controller needs from a game transport.
pub trait GamePort: Send {
    /// Bind and begin listening.
    fn start(&mut self) -> Result<(), GameLinkError>;
    /// Stop all tasks and release the socket.
    fn stop(&mut self);
    /// Whether `start` succeeded and `stop` has not been called.
    fn is_running(&self) -> bool;
    /// Fire-and-forget send.
    fn send_to_game(&self, message: GameOutbound);
    /// Retry-until-ack send. Returns `None` when nothing was sent.
    fn send_critical(&self, message: GameOutbound) -> Option<JoinHandle<DeliveryOutcome>>;
}

/// A critical message awaiting acknowledgment.
#[derive(Debug)]
struct PendingCriticalMessage {
    event_name: &'static str,
    payload: Vec<u8>,
    attempts_remaining: u32,
    acknowledged: bool,
    /// Issue order, used to resolve acks that carry no id.
    sequence: u64,
    wake: Arc<Notify>,
}

#[derive(Debug, Default)]
struct PendingRegistry {
    messages: HashMap<Uuid, PendingCriticalMessage>,
    next_sequence: u64,
}

impl PendingRegistry {
    /// Mark the message matching an ack. Returns the id that was resolved.
    fn acknowledge(&mut self, ack_event: &str, message_id: Option<Uuid>) -> Option<Uuid> {
        let id = match message_id {
            Some(id) => self.messages.contains_key(&id).then_some(id)?,
            None => self
                .messages
                .iter()
                .filter(|(_, m)| m.event_name == ack_event && !m.acknowledged)
                .max_by_key(|(_, m)| m.sequence)
                .map(|(id, _)| *id)?,
        };

        let message = self.messages.get_mut(&id)?;
        message.acknowledged = true;
        message.wake.notify_one();
        Some(id)
    }
}

/// State shared between the link handle and its tasks.
struct LinkShared {
    socket: UdpSocket,
    config: GameLinkConfig,
    liveness: Mutex<GameLiveness>,
    pending: Mutex<PendingRegistry>,
    events: mpsc::UnboundedSender<GameLinkEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LinkShared {
    fn destination(&self) -> SocketAddr {
        lock(&self.liveness)
            .game_address
            .unwrap_or(self.config.game_addr)
    }

    /// Best-effort transmit of already-encoded bytes.
    fn transmit(&self, payload: &[u8]) {
        if payload.len() > self.config.buffer_size {
            warn!(
                "Dropping {} byte datagram (limit {})",
                payload.len(),
                self.config.buffer_size
            );
            return;
        }
        let dest = self.destination();
        if let Err(e) = self.socket.try_send_to(payload, dest) {
            debug!("Send to game at {} failed: {}", dest, e);
        }
    }

    fn send(&self, message: &GameOutbound) {
        match message.encode(None) {
            Ok(payload) => self.transmit(&payload),
            Err(e) => error!("Failed to encode {}: {}", message.event_name(), e),
        }
    }

    fn emit(&self, event: GameLinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Game link event dropped, controller gone");
        }
    }

    fn handle_datagram(&self, raw: &[u8], from: SocketAddr) {
        #[cfg(feature = "debug-tracing")]
        tracing::trace!("Datagram from {}: {}", from, String::from_utf8_lossy(raw));

        let message = match GameMessage::decode(raw) {
            Ok(m) => m,
            Err(e) => {
                debug!("Discarding datagram from {}: {}", from, e);
                return;
            }
        };

        let transition = lock(&self.liveness).record_datagram(from, Instant::now());
        if transition == Some(LivenessTransition::Connected) {
            info!("Game connected from {}", from);
            self.emit(GameLinkEvent::Connected);
        }

        if !message.is_link_control() {
            match message {
                GameMessage::Unknown => debug!("Ignoring unknown game event from {}", from),
                other => self.emit(GameLinkEvent::Message(other)),
            }
            return;
        }

        match message {
            GameMessage::Ping => self.send(&GameOutbound::Pong),
            GameMessage::Ack { ack_event, msg_id } => {
                match lock(&self.pending).acknowledge(&ack_event, msg_id) {
                    Some(id) => debug!("Ack for {} ({})", ack_event, id),
                    None => debug!("Ack for {} matched nothing pending", ack_event),
                }
            }
            _ => {}
        }
    }

    /// Handle one receive result. Returns `false` when the loop should end.
    fn on_receive(&self, result: io::Result<(usize, SocketAddr)>, buf: &[u8]) -> bool {
        match result {
            Ok((len, from)) => {
                self.handle_datagram(&buf[..len], from);
                true
            }
            Err(e) if is_transient(&e) => {
                debug!("Transient receive error: {}", e);
                true
            }
            Err(e) => {
                error!("Game link receive failed: {}", e);
                false
            }
        }
    }
}

/// Tasks and shared state of a started link.
struct RunningLink {
    shared: Arc<LinkShared>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// UDP link to the game.
pub struct GameLink {
    config: GameLinkConfig,
    events: mpsc::UnboundedSender<GameLinkEvent>,
    running: Option<RunningLink>,
}

impl GameLink {
    /// Create a stopped link that will report to `events`.
    pub fn new(config: GameLinkConfig, events: mpsc::UnboundedSender<GameLinkEvent>) -> Self {
        Self {
            config,
            events,
            running: None,
        }
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .as_ref()
            .and_then(|r| r.shared.socket.local_addr().ok())
    }

    /// Copy of the current liveness state while running.
    pub fn liveness(&self) -> Option<GameLiveness> {
        self.running
            .as_ref()
            .map(|r| lock(&r.shared.liveness).clone())
    }

    /// Number of critical messages still being retried.
    pub fn pending_critical(&self) -> usize {
        self.running
            .as_ref()
            .map(|r| lock(&r.shared.pending).messages.len())
            .unwrap_or(0)
    }

    /// Bind with `SO_REUSEADDR`. Tasks of a stopped link drop their socket
    /// handle only when next polled, so a restart must not wait on them.
    fn bind(&self) -> Result<UdpSocket, GameLinkError> {
        let addr = self.config.bind_addr;
        let bind_err = |source: io::Error| GameLinkError::Bind { addr, source };

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;

        UdpSocket::from_std(socket.into()).map_err(bind_err)
    }
}

impl GamePort for GameLink {
    fn start(&mut self) -> Result<(), GameLinkError> {
        if self.running.is_some() {
            return Err(GameLinkError::AlreadyRunning);
        }

        let socket = self.bind()?;
        let shared = Arc::new(LinkShared {
            socket,
            config: self.config.clone(),
            liveness: Mutex::new(GameLiveness::new()),
            pending: Mutex::new(PendingRegistry::default()),
            events: self.events.clone(),
        });
        let (shutdown_tx, _) = broadcast::channel(1);

        let tasks = vec![
            tokio::spawn(run_receive_loop(shared.clone(), shutdown_tx.subscribe())),
            tokio::spawn(run_heartbeat_loop(shared.clone(), shutdown_tx.subscribe())),
        ];

        info!(
            "Game link listening on {}",
            shared.socket.local_addr().map_or_else(|_| self.config.bind_addr, |a| a)
        );

        self.running = Some(RunningLink {
            shared,
            shutdown_tx,
            tasks,
        });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(());
        lock(&running.shared.pending).messages.clear();
        for task in running.tasks {
            task.abort();
        }
        info!("Game link stopped");
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn send_to_game(&self, message: GameOutbound) {
        match &self.running {
            Some(running) => running.shared.send(&message),
            None => debug!("Game link stopped, dropping {}", message.event_name()),
        }
    }

    fn send_critical(&self, message: GameOutbound) -> Option<JoinHandle<DeliveryOutcome>> {
        let Some(running) = &self.running else {
            debug!("Game link stopped, dropping critical {}", message.event_name());
            return None;
        };

        let id = Uuid::new_v4();
        let payload = match message.encode(Some(id)) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to encode {}: {}", message.event_name(), e);
                return None;
            }
        };

        let wake = Arc::new(Notify::new());
        {
            let mut pending = lock(&running.shared.pending);
            let sequence = pending.next_sequence;
            pending.next_sequence += 1;
            pending.messages.insert(
                id,
                PendingCriticalMessage {
                    event_name: message.event_name(),
                    payload,
                    attempts_remaining: self.config.retry_max,
                    acknowledged: false,
                    sequence,
                    wake: wake.clone(),
                },
            );
        }

        debug!("Critical {} queued as {}", message.event_name(), id);
        Some(tokio::spawn(run_critical_send(
            running.shared.clone(),
            id,
            wake,
            running.shutdown_tx.subscribe(),
        )))
    }
}

impl Drop for GameLink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// ICMP port-unreachable surfaces as a reset/refused error on the next
/// receive when the game isn't listening yet.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused | io::ErrorKind::WouldBlock
    )
}

#[instrument(skip_all, name = "game_recv")]
async fn run_receive_loop(shared: Arc<LinkShared>, mut shutdown: broadcast::Receiver<()>) {
    let mut buf = vec![0u8; shared.config.buffer_size];

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            result = shared.socket.recv_from(&mut buf) => {
                if !shared.on_receive(result, &buf) {
                    break;
                }
            }
        }
    }

    debug!("Receive loop ended");
}

#[instrument(skip_all, name = "game_heartbeat")]
async fn run_heartbeat_loop(shared: Arc<LinkShared>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(shared.config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let (contacted, transition) = {
                    let mut liveness = lock(&shared.liveness);
                    let transition = liveness.check_timeout(Instant::now(), shared.config.pong_timeout);
                    (liveness.contacted(), transition)
                };

                if contacted {
                    shared.send(&GameOutbound::Ping);
                }
                if transition == Some(LivenessTransition::Disconnected) {
                    warn!("Game stopped responding");
                    shared.emit(GameLinkEvent::Disconnected);
                }
            }
        }
    }

    debug!("Heartbeat loop ended");
}

#[instrument(skip(shared, wake, shutdown), name = "critical_send")]
async fn run_critical_send(
    shared: Arc<LinkShared>,
    id: Uuid,
    wake: Arc<Notify>,
    mut shutdown: broadcast::Receiver<()>,
) -> DeliveryOutcome {
    let retry_interval = shared.config.retry_interval;
    let mut attempts = 0u32;

    loop {
        let payload = {
            let mut pending = lock(&shared.pending);
            let Some(message) = pending.messages.get_mut(&id) else {
                return DeliveryOutcome::Cancelled;
            };

            if message.acknowledged {
                pending.messages.remove(&id);
                debug!("Critical message acknowledged after {} attempt(s)", attempts);
                return DeliveryOutcome::Acknowledged { attempts };
            }
            if message.attempts_remaining == 0 {
                let event_name = message.event_name;
                pending.messages.remove(&id);
                warn!("No ack for {} after {} attempts, giving up", event_name, attempts);
                return DeliveryOutcome::Exhausted { attempts };
            }

            message.attempts_remaining -= 1;
            message.payload.clone()
        };

        shared.transmit(&payload);
        attempts += 1;

        tokio::select! {
            _ = wake.notified() => {}
            _ = sleep(retry_interval) => {}
            _ = shutdown.recv() => {
                lock(&shared.pending).messages.remove(&id);
                return DeliveryOutcome::Cancelled;
            }
        }
    }
}
