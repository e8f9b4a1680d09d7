//! Service Channel
//!
//! Persistent Socket.IO connection to the match service.
//!
//! One background task owns the WebSocket. It performs the Engine.IO and
//! namespace handshakes, answers server heartbeats, forwards typed inbound
//! events and writes queued outbound events. After an established channel
//! drops, the task retries on its own with capped backoff.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use crate::core::config::ChannelConfig;
use crate::network::packet::{channel_url, EnginePacket, OpenInfo, PacketError, SocketPacket};
use crate::network::protocol::{ServiceEmit, ServiceInbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events the channel reports to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceLinkEvent {
    /// Namespace connected.
    Connected,
    /// Channel lost, or a connect attempt failed.
    Disconnected,
    /// Typed event from the service.
    Inbound(ServiceInbound),
}

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// WebSocket transport failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Frame could not be decoded.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
    /// Handshake did not finish in time.
    #[error("handshake timed out")]
    Timeout,
    /// Namespace connect rejected.
    #[error("namespace {namespace} refused connection: {reason}")]
    Refused {
        /// Namespace.
        namespace: String,
        /// Server-provided reason.
        reason: String,
    },
    /// Server sent something other than the expected handshake packet.
    #[error("unexpected packet during handshake")]
    UnexpectedHandshake,
    /// Server closed the channel.
    #[error("channel closed by server")]
    Closed,
    /// No server ping within the advertised window.
    #[error("server heartbeat missed")]
    HeartbeatTimeout,
}

/// Operations the controller needs from a service channel.
///
/// The `send_*` helpers are no-ops while the channel is not connected.
pub trait ServicePort: Send {
    /// Open the channel, authenticating as `player_id`.
    fn connect(&mut self, player_id: &str);
    /// Discard the current channel and open a fresh one.
    fn reconnect(&mut self);
    /// Close the channel without scheduling any retry. Raises no event; the
    /// caller already knows the channel is gone.
    fn disconnect(&mut self);
    /// Whether the namespace is currently connected.
    fn is_connected(&self) -> bool;
    /// Emit an event if connected; dropped otherwise.
    fn emit(&self, event: ServiceEmit);

    /// Category banned.
    fn send_ban(&self, category: &str) {
        self.emit(ServiceEmit::Ban { category: category.to_string() });
    }

    /// Run progress.
    fn send_progress(&self, area: i64, level: i64, theme: i64) {
        self.emit(ServiceEmit::Progress { area, level, theme });
    }

    /// Player died.
    fn send_death(&self) {
        self.emit(ServiceEmit::Death);
    }

    /// Player restarted.
    fn send_instant_restart(&self) {
        self.emit(ServiceEmit::InstantRestart);
    }

    /// Player finished.
    fn send_completion(&self) {
        self.emit(ServiceEmit::Completion);
    }

    /// Chat line.
    fn send_chat(&self, message: &str) {
        self.emit(ServiceEmit::SendChat { message: message.to_string() });
    }

    /// Game process vanished mid-match.
    fn send_game_disconnect(&self) {
        self.emit(ServiceEmit::GameDisconnect);
    }

    /// Ask for a new seed.
    fn send_request_seed_change(&self) {
        self.emit(ServiceEmit::RequestSeedChange);
    }

    /// Offer a draw.
    fn send_request_draw(&self) {
        self.emit(ServiceEmit::RequestDraw);
    }

    /// Give up.
    fn send_forfeit(&self) {
        self.emit(ServiceEmit::Forfeit);
    }

    /// Post-match screen dismissed.
    fn send_close_postmatch(&self) {
        self.emit(ServiceEmit::ClosePostmatch);
    }
}

/// Handle to a running channel task.
struct ChannelHandle {
    outgoing: mpsc::UnboundedSender<ServiceEmit>,
    connected: Arc<AtomicBool>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Socket.IO client for the match namespace.
pub struct ServiceLink {
    config: ChannelConfig,
    events: mpsc::UnboundedSender<ServiceLinkEvent>,
    player_id: Option<String>,
    channel: Option<ChannelHandle>,
}

impl ServiceLink {
    /// Create an idle link that will report to `events`.
    pub fn new(config: ChannelConfig, events: mpsc::UnboundedSender<ServiceLinkEvent>) -> Self {
        Self {
            config,
            events,
            player_id: None,
            channel: None,
        }
    }

    fn spawn(&mut self, player_id: String) {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));

        let task = ChannelTask {
            url: channel_url(&self.config.url),
            config: self.config.clone(),
            player_id,
            connected: connected.clone(),
            events: self.events.clone(),
        };

        self.channel = Some(ChannelHandle {
            outgoing,
            connected,
            shutdown_tx,
            task: tokio::spawn(task.run(outgoing_rx, shutdown_rx)),
        });
    }

    /// Stop the current task without reporting anything. Returns whether it was connected.
    fn teardown(&mut self) -> bool {
        let Some(channel) = self.channel.take() else {
            return false;
        };

        let was_connected = channel.connected.swap(false, Ordering::AcqRel);
        if channel.shutdown_tx.send(()).is_err() {
            // Task already finished.
            channel.task.abort();
        }
        was_connected
    }
}

impl ServicePort for ServiceLink {
    fn connect(&mut self, player_id: &str) {
        self.teardown();
        self.player_id = Some(player_id.to_string());
        info!("Connecting to match service as {}", player_id);
        self.spawn(player_id.to_string());
    }

    fn reconnect(&mut self) {
        let Some(player_id) = self.player_id.clone() else {
            debug!("Reconnect requested before connect");
            return;
        };
        self.teardown();
        info!("Reconnecting to match service");
        self.spawn(player_id);
    }

    fn disconnect(&mut self) {
        if self.teardown() {
            info!("Disconnected from match service");
        }
    }

    fn is_connected(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|c| c.connected.load(Ordering::Acquire))
    }

    fn emit(&self, event: ServiceEmit) {
        match &self.channel {
            Some(channel) if channel.connected.load(Ordering::Acquire) => {
                debug!("Emit {}", event.event_name());
                let _ = channel.outgoing.send(event);
            }
            _ => debug!("Channel not connected, dropping {}", event.event_name()),
        }
    }
}

impl Drop for ServiceLink {
    fn drop(&mut self) {
        self.teardown();
    }
}

// =============================================================================
// CHANNEL TASK
// =============================================================================

enum SessionEnd {
    /// Local shutdown; report nothing.
    Shutdown,
    /// Never reached the connected state.
    Failed(ChannelError),
    /// Was connected, then lost.
    Dropped(ChannelError),
}

struct ChannelTask {
    url: String,
    config: ChannelConfig,
    player_id: String,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ServiceLinkEvent>,
}

impl ChannelTask {
    fn emit(&self, event: ServiceLinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Channel event dropped, controller gone");
        }
    }

    #[instrument(skip_all, name = "service_channel", fields(player = %self.player_id))]
    async fn run(
        self,
        mut outgoing: mpsc::UnboundedReceiver<ServiceEmit>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        match self.session(&mut outgoing, &mut shutdown).await {
            SessionEnd::Shutdown => return,
            SessionEnd::Failed(e) => {
                warn!("Match service connect failed: {}", e);
                self.emit(ServiceLinkEvent::Disconnected);
                return;
            }
            SessionEnd::Dropped(e) => {
                warn!("Match service channel lost: {}", e);
                self.emit(ServiceLinkEvent::Disconnected);
            }
        }

        let mut attempt = 0u32;
        let mut backoff = self.config.reconnect_backoff;
        while attempt < self.config.reconnect_attempts {
            attempt += 1;
            tokio::select! {
                _ = &mut shutdown => return,
                _ = sleep(backoff) => {}
            }

            debug!("Channel retry {}/{}", attempt, self.config.reconnect_attempts);
            match self.session(&mut outgoing, &mut shutdown).await {
                SessionEnd::Shutdown => return,
                SessionEnd::Failed(e) => {
                    debug!("Channel retry failed: {}", e);
                    backoff = (backoff * 2).min(self.config.reconnect_backoff_max);
                }
                SessionEnd::Dropped(e) => {
                    warn!("Match service channel lost: {}", e);
                    self.emit(ServiceLinkEvent::Disconnected);
                    attempt = 0;
                    backoff = self.config.reconnect_backoff;
                }
            }
        }

        warn!("Giving up on match service after {} attempts", attempt);
    }

    async fn session(
        &self,
        outgoing: &mut mpsc::UnboundedReceiver<ServiceEmit>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        let handshake = tokio::select! {
            _ = &mut *shutdown => return SessionEnd::Shutdown,
            result = timeout(self.config.connect_timeout, self.handshake()) => result,
        };
        let (mut ws, open) = match handshake {
            Ok(Ok(established)) => established,
            Ok(Err(e)) => return SessionEnd::Failed(e),
            Err(_) => return SessionEnd::Failed(ChannelError::Timeout),
        };

        // Anything queued against a previous connection is stale.
        while outgoing.try_recv().is_ok() {}

        self.connected.store(true, Ordering::Release);
        info!("Match service connected");
        self.emit(ServiceLinkEvent::Connected);

        let end = self.pump(&mut ws, &open, outgoing, shutdown).await;
        self.connected.store(false, Ordering::Release);
        end
    }

    async fn handshake(&self) -> Result<(WsStream, OpenInfo), ChannelError> {
        let (mut ws, _) = connect_async(self.url.as_str()).await?;

        let open = loop {
            match next_engine_packet(&mut ws).await? {
                EnginePacket::Open(info) => break info,
                EnginePacket::Noop => continue,
                _ => return Err(ChannelError::UnexpectedHandshake),
            }
        };
        debug!("Engine session {} open", open.sid);

        let connect = SocketPacket::Connect {
            namespace: self.config.namespace.clone(),
            data: Some(json!({ "steam_id": self.player_id })),
        };
        ws.send(Message::Text(connect.to_frame())).await?;

        loop {
            match next_engine_packet(&mut ws).await? {
                EnginePacket::Ping => ws.send(Message::Text(EnginePacket::Pong.encode())).await?,
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Connect { namespace, .. } if namespace == self.config.namespace => {
                        return Ok((ws, open));
                    }
                    SocketPacket::ConnectError { namespace, data } if namespace == self.config.namespace => {
                        let reason = data
                            .as_ref()
                            .and_then(|d| d.get("message"))
                            .and_then(|m| m.as_str())
                            .unwrap_or("no reason given")
                            .to_string();
                        return Err(ChannelError::Refused { namespace, reason });
                    }
                    other => debug!("Ignoring {:?} during handshake", other),
                },
                EnginePacket::Close => return Err(ChannelError::Closed),
                _ => {}
            }
        }
    }

    async fn pump(
        &self,
        ws: &mut WsStream,
        open: &OpenInfo,
        outgoing: &mut mpsc::UnboundedReceiver<ServiceEmit>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        let heartbeat = Duration::from_millis(open.ping_interval + open.ping_timeout);
        let deadline = sleep(heartbeat);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    let leave = SocketPacket::Disconnect { namespace: self.config.namespace.clone() };
                    let _ = ws.send(Message::Text(leave.to_frame())).await;
                    let _ = ws.close(None).await;
                    return SessionEnd::Shutdown;
                }
                Some(event) = outgoing.recv() => {
                    let packet = SocketPacket::Event {
                        namespace: self.config.namespace.clone(),
                        ack_id: None,
                        name: event.event_name().to_string(),
                        data: event.data(),
                    };
                    if let Err(e) = ws.send(Message::Text(packet.to_frame())).await {
                        return SessionEnd::Dropped(e.into());
                    }
                }
                _ = &mut deadline => return SessionEnd::Dropped(ChannelError::HeartbeatTimeout),
                frame = ws.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Dropped(ChannelError::Closed);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return SessionEnd::Dropped(e.into()),
                    };

                    let result = match EnginePacket::decode(&text) {
                        Ok(EnginePacket::Ping) => {
                            deadline.as_mut().reset(Instant::now() + heartbeat);
                            ws.send(Message::Text(EnginePacket::Pong.encode()))
                                .await
                                .map_err(ChannelError::from)
                        }
                        Ok(EnginePacket::Message(body)) => self.dispatch(ws, &body).await,
                        Ok(EnginePacket::Close) => Err(ChannelError::Closed),
                        Ok(_) => Ok(()),
                        Err(e) => {
                            warn!("Discarding frame: {}", e);
                            Ok(())
                        }
                    };
                    if let Err(e) = result {
                        return SessionEnd::Dropped(e);
                    }
                }
            }
        }
    }

    async fn dispatch(&self, ws: &mut WsStream, body: &str) -> Result<(), ChannelError> {
        let packet = match SocketPacket::decode(body) {
            Ok(p) => p,
            Err(e) => {
                warn!("Discarding packet: {}", e);
                return Ok(());
            }
        };
        if packet.namespace() != self.config.namespace {
            debug!("Ignoring packet for namespace {}", packet.namespace());
            return Ok(());
        }

        match packet {
            SocketPacket::Event { namespace, ack_id, name, data } => {
                if let Some(ack_id) = ack_id {
                    let ack = SocketPacket::Ack { namespace, ack_id, args: Vec::new() };
                    ws.send(Message::Text(ack.to_frame())).await?;
                }
                match ServiceInbound::decode(&name, data) {
                    Some(event) => {
                        debug!("Service event {}", name);
                        self.emit(ServiceLinkEvent::Inbound(event));
                    }
                    None => debug!("Ignoring unknown service event {}", name),
                }
                Ok(())
            }
            SocketPacket::Disconnect { .. } => Err(ChannelError::Closed),
            _ => Ok(()),
        }
    }
}

async fn next_engine_packet(ws: &mut WsStream) -> Result<EnginePacket, ChannelError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(EnginePacket::decode(&text)?),
            Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
