//! Protocol engine
//!
//! One spawned task owns the socket, the handshake and heartbeat state,
//! the pending-ack table and the outbound queue. [`ProtocolEngine`] is a
//! handle that talks to it over a command channel, so every call returns
//! immediately and outcomes arrive as [`EngineEvent`]s or through a
//! [`PendingAck`].
//!
//! ```text
//!   connect()                 socket open            open packet + connect ack
//! Disconnected ──▶ Connecting ──────────▶ Handshaking ─────────────▶ Connected
//!      ▲               ▲                                                 │
//!      │               │ backoff elapsed          socket error, close,   │
//!      │               └──────────── Reconnecting ◀──── missed heartbeat ┘
//!      │                                  │
//!      └────── retries exhausted ─────────┘   (disconnect() from any state)
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use crate::config::ClientConfig;
use crate::error::{AckError, ConnectionError, ProtocolError};
use crate::events::{EventRegistry, InboundEvent};
use crate::network::backoff::ReconnectPolicy;
use crate::network::transport::{Connector, SocketEvent, SocketHandle};
use crate::protocol::{encode, Decoder, Frame, OpenHandshake, Packet, PacketKind, Payload};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Negotiated session parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Transport-level session id from the open packet
    pub sid: String,
    /// Namespace session id from the connect acknowledgment
    pub session_id: String,
    pub namespace: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Connected(SessionInfo),
    /// Emitted once when the engine reaches its final disconnected state
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    /// Queued sends were discarded because the outbound queue was full
    Backpressure { dropped: usize },
    /// Connection-fatal failure, always preceded by `Disconnected`
    Error(String),
    /// Application event from the server, after registered handlers ran.
    /// Shares this channel so it stays ordered with the lifecycle events.
    Message(InboundEvent),
}

type AckResult = Result<Vec<Payload>, AckError>;

/// Resolves once with the server's acknowledgment arguments or an [`AckError`]
#[derive(Debug)]
pub struct PendingAck {
    id: u64,
    rx: oneshot::Receiver<AckResult>,
}

impl PendingAck {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingAck {
    type Output = AckResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the engine task is gone
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(AckError::Cancelled)))
    }
}

enum Command {
    Connect(Box<ClientConfig>),
    Emit {
        name: String,
        args: Vec<Payload>,
        ack: Option<(u64, oneshot::Sender<AckResult>)>,
    },
    Raw(Packet),
    Disconnect,
}

/// Handle to the engine task.
///
/// Dropping the handle disconnects and stops the task.
pub struct ProtocolEngine {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    registry: EventRegistry,
    next_ack_id: Arc<AtomicU64>,
}

impl ProtocolEngine {
    /// Spawn the engine task. Must be called within a tokio runtime.
    pub fn spawn(connector: Arc<dyn Connector>) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let registry = EventRegistry::new();

        let engine_loop = EngineLoop::new(connector, command_rx, event_tx, state_tx, registry.clone());
        tokio::spawn(engine_loop.run());

        (
            Self {
                commands: command_tx,
                state: state_rx,
                registry,
                next_ack_id: Arc::new(AtomicU64::new(0)),
            },
            event_rx,
        )
    }

    /// Start connecting; ignored unless currently disconnected
    pub fn connect(&self, config: ClientConfig) {
        self.command(Command::Connect(Box::new(config)));
    }

    /// Send a named event. Returns a [`PendingAck`] when `want_ack` is set.
    ///
    /// Sends made before the connection is established are queued and
    /// flushed in call order once connected.
    pub fn send_event(&self, name: &str, args: Vec<Payload>, want_ack: bool) -> Option<PendingAck> {
        let (ack, pending) = if want_ack {
            let id = self.next_ack_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            (Some((id, tx)), Some(PendingAck { id, rx }))
        } else {
            (None, None)
        };
        self.command(Command::Emit {
            name: name.to_string(),
            args,
            ack,
        });
        pending
    }

    /// Send a pre-built packet, queued like any other send
    pub fn send_raw(&self, packet: Packet) {
        self.command(Command::Raw(packet));
    }

    /// Disconnect and cancel all pending acknowledgments
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Register a handler for an inbound event. Handlers persist across
    /// reconnections and run on the engine task.
    pub fn on_event<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.registry.on(name, handler);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("{}", ConnectionError::EngineStopped);
        }
    }
}

struct PendingEntry {
    deadline: Instant,
    tx: oneshot::Sender<AckResult>,
}

struct Outbound {
    packet: Packet,
    ack_id: Option<u64>,
}

type ConnectFuture = BoxFuture<'static, Result<SocketHandle, ConnectionError>>;

/// One iteration's outcome of the select loop
enum Step {
    Command(Option<Command>),
    Socket(Option<SocketEvent>),
    Opened(Result<SocketHandle, ConnectionError>),
    RetryDue,
    HandshakeExpired,
    HeartbeatExpired,
    AcksDue,
}

struct EngineLoop {
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<EngineEvent>,
    state_tx: watch::Sender<ConnectionState>,
    registry: EventRegistry,

    state: ConnectionState,
    config: ClientConfig,
    policy: ReconnectPolicy,
    decoder: Decoder,

    socket: Option<SocketHandle>,
    connecting: Option<ConnectFuture>,
    handshake: Option<OpenHandshake>,

    handshake_deadline: Option<Instant>,
    liveness_deadline: Option<Instant>,
    retry_at: Option<Instant>,
    attempt: u32,

    queue: VecDeque<Outbound>,
    pending: HashMap<u64, PendingEntry>,
}

impl EngineLoop {
    fn new(
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<EngineEvent>,
        state_tx: watch::Sender<ConnectionState>,
        registry: EventRegistry,
    ) -> Self {
        let config = ClientConfig::default();
        Self {
            connector,
            commands,
            events,
            state_tx,
            registry,
            state: ConnectionState::Disconnected,
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            decoder: Decoder::new(config.engine.max_attachments),
            config,
            socket: None,
            connecting: None,
            handshake: None,
            handshake_deadline: None,
            liveness_deadline: None,
            retry_at: None,
            attempt: 0,
            queue: VecDeque::new(),
            pending: HashMap::new(),
        }
    }

    async fn run(mut self) {
        loop {
            let ack_deadline = self.pending.values().map(|p| p.deadline).min();

            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                event = next_socket_event(&mut self.socket) => Step::Socket(event),
                result = finish_connect(&mut self.connecting) => Step::Opened(result),
                _ = sleep_until_opt(self.retry_at) => Step::RetryDue,
                _ = sleep_until_opt(self.handshake_deadline) => Step::HandshakeExpired,
                _ = sleep_until_opt(self.liveness_deadline) => Step::HeartbeatExpired,
                _ = sleep_until_opt(ack_deadline) => Step::AcksDue,
            };

            match step {
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Command(None) => {
                    // Every handle is gone
                    if self.state != ConnectionState::Disconnected {
                        self.send_disconnect_packet();
                        self.finalize(None);
                    }
                    break;
                }
                Step::Socket(Some(event)) => self.handle_socket_event(event),
                Step::Socket(None) => {
                    self.connection_lost(ConnectionError::Socket("socket closed".into()))
                }
                Step::Opened(result) => {
                    self.connecting = None;
                    match result {
                        Ok(socket) => self.socket_opened(socket),
                        Err(e) => self.connection_lost(e),
                    }
                }
                Step::RetryDue => {
                    self.retry_at = None;
                    self.begin_connect();
                }
                Step::HandshakeExpired => self.connection_lost(ConnectionError::HandshakeTimeout),
                Step::HeartbeatExpired => self.connection_lost(ConnectionError::HeartbeatTimeout),
                Step::AcksDue => self.expire_acks(),
            }
        }
        tracing::debug!("Protocol engine stopped");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::info!("Connection state: {} -> {}", self.state, state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    // ---- commands ----

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(config) => {
                if self.state != ConnectionState::Disconnected {
                    tracing::debug!("Connect ignored while {}", self.state);
                    return;
                }
                self.policy = ReconnectPolicy::new(config.reconnect.clone());
                self.decoder = Decoder::new(config.engine.max_attachments);
                self.config = *config;
                self.attempt = 0;
                self.begin_connect();
            }
            Command::Emit { name, args, ack } => {
                let mut packet = Packet::event(self.config.namespace.clone(), &name, args);
                let ack_id = match ack {
                    Some((id, tx)) => {
                        if self.state == ConnectionState::Disconnected {
                            let _ = tx.send(Err(AckError::NotConnected));
                            return;
                        }
                        let deadline = Instant::now() + self.config.engine.ack_timeout();
                        self.pending.insert(id, PendingEntry { deadline, tx });
                        packet = packet.with_id(id);
                        Some(id)
                    }
                    None => None,
                };
                self.submit(Outbound { packet, ack_id });
            }
            Command::Raw(packet) => self.submit(Outbound {
                packet,
                ack_id: None,
            }),
            Command::Disconnect => {
                if self.state == ConnectionState::Disconnected {
                    return;
                }
                self.send_disconnect_packet();
                self.finalize(None);
            }
        }
    }

    /// Transmit now when connected, otherwise queue for the next session
    fn submit(&mut self, outbound: Outbound) {
        match self.state {
            ConnectionState::Disconnected => {
                tracing::warn!(
                    "Dropping {} packet: not connected",
                    outbound.packet.kind.name()
                );
            }
            ConnectionState::Connected => {
                if let Err(outbound) = self.transmit(outbound) {
                    self.queue.push_front(outbound);
                    self.connection_lost(ConnectionError::Socket("socket closed".into()));
                }
            }
            _ => self.enqueue(outbound),
        }
    }

    fn enqueue(&mut self, outbound: Outbound) {
        self.queue.push_back(outbound);
        let depth = self.config.engine.outbound_queue_depth.max(1);
        let mut dropped = 0;
        while self.queue.len() > depth {
            if let Some(oldest) = self.queue.pop_front() {
                if let Some(id) = oldest.ack_id {
                    if let Some(entry) = self.pending.remove(&id) {
                        let _ = entry.tx.send(Err(AckError::Dropped));
                    }
                }
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::warn!(
                "Outbound queue full ({} packets), dropped {} oldest",
                depth,
                dropped
            );
            self.emit(EngineEvent::Backpressure { dropped });
        }
    }

    fn transmit(&self, outbound: Outbound) -> Result<(), Outbound> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(outbound);
        };
        for message in encode(&Frame::Message(outbound.packet.clone())) {
            if socket.outgoing.send(message).is_err() {
                return Err(outbound);
            }
        }
        tracing::trace!(
            "Sent {} packet (ack id {:?})",
            outbound.packet.kind.name(),
            outbound.ack_id
        );
        Ok(())
    }

    fn flush_queue(&mut self) {
        if !self.queue.is_empty() {
            tracing::debug!("Flushing {} queued packets", self.queue.len());
        }
        while self.state == ConnectionState::Connected {
            let Some(outbound) = self.queue.pop_front() else {
                break;
            };
            if let Err(outbound) = self.transmit(outbound) {
                self.queue.push_front(outbound);
                self.connection_lost(ConnectionError::Socket("socket closed".into()));
            }
        }
    }

    fn send_frame(&self, frame: Frame) {
        if let Some(socket) = self.socket.as_ref() {
            for message in encode(&frame) {
                let _ = socket.outgoing.send(message);
            }
        }
    }

    fn send_disconnect_packet(&self) {
        if self.state == ConnectionState::Connected {
            self.send_frame(Frame::Message(Packet::disconnect(
                self.config.namespace.clone(),
            )));
        }
    }

    // ---- connection lifecycle ----

    fn begin_connect(&mut self) {
        self.set_state(ConnectionState::Connecting);
        let url = engine_url(&self.config.endpoint);
        tracing::debug!("Opening socket to {}", url);
        self.connecting = Some(self.connector.connect(&url));
        // Covers socket open, the open packet and the connect acknowledgment
        self.handshake_deadline = Some(Instant::now() + self.config.engine.handshake_timeout());
    }

    fn socket_opened(&mut self, socket: SocketHandle) {
        self.socket = Some(socket);
        self.decoder.reset();
        self.set_state(ConnectionState::Handshaking);
    }

    fn handle_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Message(message) => match self.decoder.decode(message) {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => {}
                Err(e) => tracing::warn!("Dropping undecodable frame: {}", e),
            },
            SocketEvent::Closed(reason) => {
                tracing::debug!("Socket closed by peer: {:?}", reason);
                self.connection_lost(ConnectionError::ClosedByServer);
            }
            SocketEvent::Error(e) => self.connection_lost(ConnectionError::Socket(e)),
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        if let Some(handshake) = &self.handshake {
            self.liveness_deadline = Some(Instant::now() + liveness_window(handshake));
        }

        match frame {
            Frame::Open(handshake) => self.handle_open(handshake),
            Frame::Ping => self.send_frame(Frame::Pong),
            Frame::Pong | Frame::Noop | Frame::Upgrade => {}
            Frame::Close => self.connection_lost(ConnectionError::ClosedByServer),
            Frame::Message(packet) => self.handle_packet(packet),
        }
    }

    fn handle_open(&mut self, handshake: OpenHandshake) {
        if self.state != ConnectionState::Handshaking || self.handshake.is_some() {
            self.unexpected("open");
            return;
        }
        tracing::debug!(
            "Transport open: sid={} ping_interval={}ms ping_timeout={}ms",
            handshake.sid,
            handshake.ping_interval,
            handshake.ping_timeout
        );
        self.liveness_deadline = Some(Instant::now() + liveness_window(&handshake));
        self.handshake = Some(handshake);

        let auth = json!({
            "apiKey": self.config.api_key,
            "characterId": self.config.character_id,
            "playerId": self.config.player_id,
        });
        self.send_frame(Frame::Message(Packet::connect(
            self.config.namespace.clone(),
            Some(auth),
        )));
    }

    fn handle_packet(&mut self, packet: Packet) {
        if packet.namespace != self.config.namespace {
            tracing::warn!(
                "{}",
                ProtocolError::NamespaceMismatch {
                    expected: self.config.namespace.clone(),
                    actual: packet.namespace,
                }
            );
            return;
        }

        match packet.kind {
            PacketKind::Connect => self.handle_connect_ack(packet),
            PacketKind::ConnectError => {
                let reason = rejection_reason(packet.data.as_ref());
                let error = ProtocolError::ConnectRejected(reason);
                tracing::warn!("{}", error);
                self.connection_lost(ConnectionError::Socket(error.to_string()));
            }
            PacketKind::Disconnect => {
                tracing::info!("Server closed namespace {}", packet.namespace);
                self.connection_lost(ConnectionError::ClosedByServer);
            }
            PacketKind::Event | PacketKind::BinaryEvent => {
                if self.state != ConnectionState::Connected {
                    self.unexpected(packet.kind.name());
                    return;
                }
                let Some(event) = InboundEvent::from_packet(&packet) else {
                    return;
                };
                if event.ack_id.is_some() {
                    tracing::debug!("Server requested an ack for '{}'; not replied", event.name);
                }
                if self.registry.dispatch(&event) == 0 {
                    tracing::trace!("No handler for event '{}'", event.name);
                }
                self.emit(EngineEvent::Message(event));
            }
            PacketKind::Ack | PacketKind::BinaryAck => {
                let Some(id) = packet.id else {
                    return;
                };
                match self.pending.remove(&id) {
                    Some(entry) => {
                        let _ = entry.tx.send(Ok(packet.args()));
                    }
                    None => tracing::warn!("Dropping ack {} with no pending request", id),
                }
            }
        }
    }

    fn handle_connect_ack(&mut self, packet: Packet) {
        let Some(handshake) = self.handshake.clone() else {
            self.unexpected("connect");
            return;
        };
        if self.state != ConnectionState::Handshaking {
            self.unexpected("connect");
            return;
        }

        let acked_sid = packet
            .data
            .as_ref()
            .and_then(Payload::as_json)
            .and_then(|v| v.get("sid"))
            .and_then(Value::as_str)
            .filter(|sid| !sid.is_empty());
        let session_id = match acked_sid {
            Some(sid) => sid.to_string(),
            None => {
                tracing::warn!(
                    "Connect ack for {} carries no session id, using transport sid {}",
                    packet.namespace,
                    handshake.sid
                );
                handshake.sid.clone()
            }
        };

        let session = SessionInfo {
            sid: handshake.sid.clone(),
            session_id,
            namespace: self.config.namespace.clone(),
            ping_interval: Duration::from_millis(handshake.ping_interval),
            ping_timeout: Duration::from_millis(handshake.ping_timeout),
        };

        self.handshake_deadline = None;
        self.attempt = 0;
        self.set_state(ConnectionState::Connected);
        tracing::info!("Session {} established", session.session_id);
        self.emit(EngineEvent::Connected(session));
        self.flush_queue();
    }

    fn unexpected(&self, packet: &'static str) {
        tracing::warn!(
            "{}",
            ProtocolError::UnexpectedPacket {
                packet,
                state: self.state.to_string(),
            }
        );
    }

    fn teardown_socket(&mut self) {
        self.socket = None;
        self.connecting = None;
        self.handshake = None;
        self.handshake_deadline = None;
        self.liveness_deadline = None;
        self.decoder.reset();
    }

    /// Socket-level failure: schedule a retry or give up
    fn connection_lost(&mut self, error: ConnectionError) {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Reconnecting
        ) {
            return;
        }
        tracing::warn!("Connection lost while {}: {}", self.state, error);
        self.teardown_socket();

        self.attempt += 1;
        if self.policy.should_retry(self.attempt) {
            let delay = self.policy.calculate_delay(self.attempt);
            self.retry_at = Some(Instant::now() + delay);
            self.set_state(ConnectionState::Reconnecting);
            tracing::info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                self.attempt,
                self.policy.max_attempts()
            );
            self.emit(EngineEvent::Reconnecting {
                attempt: self.attempt,
                delay,
            });
        } else {
            let error = ConnectionError::RetriesExhausted {
                attempts: self.attempt - 1,
                last_error: error.to_string(),
            };
            self.finalize(Some(error));
        }
    }

    /// Enter the final disconnected state
    fn finalize(&mut self, error: Option<ConnectionError>) {
        self.teardown_socket();
        self.retry_at = None;
        self.attempt = 0;

        for (_, entry) in self.pending.drain() {
            let _ = entry.tx.send(Err(AckError::Cancelled));
        }
        if !self.queue.is_empty() {
            tracing::debug!("Discarding {} queued packets", self.queue.len());
            self.queue.clear();
        }

        self.set_state(ConnectionState::Disconnected);
        self.emit(EngineEvent::Disconnected);
        if let Some(error) = error {
            tracing::error!("{}", error);
            self.emit(EngineEvent::Error(error.to_string()));
        }
    }

    fn expire_acks(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(entry) = self.pending.remove(&id) {
                tracing::debug!("Ack {} timed out", id);
                let _ = entry.tx.send(Err(AckError::Timeout));
            }
        }
    }
}

fn liveness_window(handshake: &OpenHandshake) -> Duration {
    Duration::from_millis(handshake.ping_interval + handshake.ping_timeout)
}

fn rejection_reason(data: Option<&Payload>) -> String {
    match data.and_then(Payload::as_json) {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| v.to_string(), str::to_string),
        None => "no reason given".to_string(),
    }
}

/// Append the transport query parameters to the endpoint
pub fn engine_url(endpoint: &str) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}EIO=4&transport=websocket")
}

async fn next_socket_event(socket: &mut Option<SocketHandle>) -> Option<SocketEvent> {
    match socket.as_mut() {
        Some(socket) => socket.incoming.recv().await,
        None => std::future::pending().await,
    }
}

async fn finish_connect(
    connecting: &mut Option<ConnectFuture>,
) -> Result<SocketHandle, ConnectionError> {
    match connecting.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
