//! The connection manager.
//!
//! One actor task owns every piece of mutable state for a logical
//! connection: the live link, the outbound queue, pending acks, the backoff
//! counter and the watchdog. The application talks to it through a cloneable
//! [`ConnectionHandle`] and observes it through typed [`ClientEvent`]s and a
//! `watch` channel of [`ClientStatus`].
//!
//! Connect attempts run in their own task and report back tagged with a
//! generation number. `close()` bumps the generation, so an attempt that
//! resolves after the application closed is discarded and its link torn
//! down; an explicit close always wins over an in-flight reconnect.

use std::collections::HashMap;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, info, instrument, warn};
use uib_core::{
    AuthToken, Channel, ClientId, ConnectionId, ControlBody, ControlMessage, Frame, InstanceId,
    TimeoutError, TransportError, WireMessage,
};

use crate::backoff::BackoffState;
use crate::config::ClientConfig;
use crate::errors::{ClientError, Result};
use crate::events::{ClientEvent, ClientStatus, ReadyState};
use crate::queue::OutboundQueue;
use crate::transport::{ConnectParams, Connector, Link, TransportKind, transport_order};
use crate::watchdog::{Watchdog, WatchdogVerdict};
use crate::ws::WsConnector;

/// Bound on the orderly close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type AckReply = oneshot::Sender<Result<()>>;

#[derive(Debug)]
enum Command {
    Connect,
    Close,
    Send {
        message: WireMessage,
        ack: Option<(Duration, AckReply)>,
    },
    SetOnline(bool),
}

/// A link that completed the `open` handshake.
struct Established {
    transport: TransportKind,
    link: Link,
    connection_id: ConnectionId,
    client_id: ClientId,
    ping_interval: Duration,
    ping_timeout: Duration,
    max_payload_bytes: Option<usize>,
}

struct AttemptOutcome {
    generation: u64,
    result: std::result::Result<Established, TransportError>,
}

struct PendingAck {
    reply: AckReply,
    key: delay_queue::Key,
    after: Duration,
}

/// Spawns connection managers.
pub struct ConnectionManager;

impl ConnectionManager {
    /// Start a manager on the current tokio runtime.
    ///
    /// The manager stays idle until [`ConnectionHandle::connect`]. It stops
    /// once every handle has been dropped.
    pub fn spawn(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus {
            client_id: config.client_id.clone(),
            online: true,
            ..ClientStatus::default()
        });

        let actor = Actor {
            backoff: BackoffState::new(config.backoff.clone()),
            watchdog: Watchdog::new(config.watchdog.clone()),
            client_id: config.client_id.clone(),
            config,
            connector,
            commands: command_rx,
            outcomes_tx: outcome_tx,
            outcomes: outcome_rx,
            events: event_tx,
            status: status_tx,
            state: ReadyState::Closed,
            wanted: false,
            online: true,
            reconnecting: false,
            generation: 0,
            attempt_in_flight: false,
            reconnect_at: None,
            link: None,
            heartbeat_window: Duration::ZERO,
            heartbeat_deadline: None,
            payload_limit: None,
            queue: OutboundQueue::new(),
            acks: HashMap::new(),
            ack_timers: DelayQueue::new(),
            next_ack_id: 0,
            watchdog_at: None,
            prior_transport: None,
            connection_id: None,
            auth: AuthToken::default(),
        };
        drop(tokio::spawn(actor.run()));

        let handle = ConnectionHandle {
            commands: command_tx,
            status: status_rx,
        };
        (handle, event_rx)
    }

    /// Start a manager that connects over WebSocket to `base_url`.
    pub fn websocket(
        base_url: impl Into<String>,
        instance: InstanceId,
        config: ClientConfig,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        Self::spawn(config, Arc::new(WsConnector::new(base_url, instance)))
    }
}

/// Cloneable handle to a running manager.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ClientStatus>,
}

impl ConnectionHandle {
    /// Open the logical connection. Reconnects automatically until
    /// [`close`](Self::close).
    pub fn connect(&self) -> Result<()> {
        self.dispatch(Command::Connect)
    }

    /// Close the connection and cancel every pending timer.
    pub fn close(&self) -> Result<()> {
        self.dispatch(Command::Close)
    }

    /// Queue a data-channel payload.
    pub fn send(&self, payload: Value) -> Result<()> {
        self.dispatch(Command::Send {
            message: WireMessage::data(payload),
            ack: None,
        })
    }

    /// Queue a payload and wait for the server's acknowledgement.
    ///
    /// Fails with [`ClientError::Timeout`] when no ack arrives within
    /// `timeout`. The message is not re-sent.
    pub async fn send_with_ack(&self, payload: Value, timeout: Duration) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.dispatch(Command::Send {
            message: WireMessage::data(payload),
            ack: Some((timeout, reply)),
        })?;
        done.await.map_err(|_| ClientError::QueueClosed)?
    }

    /// Queue a control message from this client.
    pub fn send_control(&self, body: ControlBody) -> Result<()> {
        self.dispatch(Command::Send {
            message: WireMessage::control(&ControlMessage::client(body)),
            ack: None,
        })
    }

    /// Ask the server for a session token.
    pub fn logon(&self, auth: AuthToken) -> Result<()> {
        self.send_control(ControlBody::Logon { auth })
    }

    /// Drop the current session token.
    pub fn logoff(&self) -> Result<()> {
        let auth = self.status.borrow().auth.without_credentials();
        self.send_control(ControlBody::Logoff { auth })
    }

    /// Report host connectivity. Offline pauses reconnects; online retries
    /// immediately.
    pub fn set_network_available(&self, online: bool) -> Result<()> {
        self.dispatch(Command::SetOnline(online))
    }

    /// Current status snapshot.
    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.status.borrow().ready_state
    }

    /// Subscribe to status changes.
    pub fn watch(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    fn dispatch(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::QueueClosed)
    }
}

struct Actor {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<AttemptOutcome>,
    outcomes: mpsc::UnboundedReceiver<AttemptOutcome>,
    events: mpsc::UnboundedSender<ClientEvent>,
    status: watch::Sender<ClientStatus>,

    state: ReadyState,
    /// The application wants a connection (between connect and close).
    wanted: bool,
    online: bool,
    reconnecting: bool,
    generation: u64,
    attempt_in_flight: bool,
    reconnect_at: Option<Instant>,

    link: Option<Link>,
    heartbeat_window: Duration,
    heartbeat_deadline: Option<Instant>,
    payload_limit: Option<usize>,

    queue: OutboundQueue,
    acks: HashMap<u64, PendingAck>,
    ack_timers: DelayQueue<u64>,
    next_ack_id: u64,

    backoff: BackoffState,
    watchdog: Watchdog,
    watchdog_at: Option<Instant>,

    prior_transport: Option<TransportKind>,
    client_id: Option<ClientId>,
    connection_id: Option<ConnectionId>,
    auth: AuthToken,
}

impl Actor {
    #[instrument(name = "connection_manager", skip_all)]
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.close().await;
                        break;
                    }
                },
                Some(outcome) = self.outcomes.recv() => self.handle_outcome(outcome).await,
                inbound = next_inbound(&mut self.link) => self.handle_inbound(inbound).await,
                () = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.start_attempt();
                }
                () = sleep_until_opt(self.heartbeat_deadline) => {
                    debug!("no ping within heartbeat window");
                    self.link_lost("ping timeout");
                }
                () = sleep_until_opt(self.watchdog_at) => self.watchdog_check(),
                Some(expired) = self.ack_timers.next(), if !self.ack_timers.is_empty() => {
                    self.ack_timed_out(expired.into_inner());
                }
            }
            self.publish();
        }
        debug!("connection manager stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if self.wanted {
                    return;
                }
                self.wanted = true;
                self.backoff.reset();
                self.watchdog.reset();
                self.arm_watchdog();
                self.start_attempt();
            }
            Command::Close => self.close().await,
            Command::Send { message, ack } => {
                self.enqueue(message, ack);
                self.flush().await;
            }
            Command::SetOnline(online) => self.set_online(online),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connecting
    // ─────────────────────────────────────────────────────────────────────

    fn start_attempt(&mut self) {
        if !self.wanted || !self.online || self.attempt_in_flight || self.link.is_some() {
            return;
        }
        self.reconnect_at = None;
        self.attempt_in_flight = true;
        self.state = ReadyState::Opening;

        let order = transport_order(
            &self.config.transports,
            self.prior_transport,
            self.config.remember_upgrade,
        );
        let params = ConnectParams {
            client_id: self.client_id.clone(),
            page_name: self.config.page_name.clone(),
            tab_id: self.config.tab_id.clone(),
            reconnect: self.backoff.attempts(),
        };
        let connector = Arc::clone(&self.connector);
        let outcomes = self.outcomes_tx.clone();
        let generation = self.generation;
        let limit = self.config.connect_timeout();
        debug!(generation, reconnect = params.reconnect, ?order, "connect attempt");

        drop(tokio::spawn(async move {
            let result = establish(connector.as_ref(), order, &params, limit).await;
            let _ = outcomes.send(AttemptOutcome { generation, result });
        }));
    }

    async fn handle_outcome(&mut self, outcome: AttemptOutcome) {
        if outcome.generation != self.generation {
            if let Ok(stale) = outcome.result {
                debug!(connection_id = %stale.connection_id, "discarding link opened before close");
                close_link_detached(stale.link);
            }
            return;
        }
        self.attempt_in_flight = false;
        match outcome.result {
            Ok(established) => self.on_open(established).await,
            Err(error) => {
                warn!(error = %error, "connect attempt failed");
                self.state = ReadyState::Closed;
                self.emit(ClientEvent::TransportError(error));
                self.schedule_reconnect();
            }
        }
    }

    async fn on_open(&mut self, established: Established) {
        info!(
            connection_id = %established.connection_id,
            client_id = %established.client_id,
            transport = %established.transport,
            "connection open"
        );
        self.state = ReadyState::Open;
        self.reconnecting = false;
        self.reconnect_at = None;
        self.backoff.reset();
        self.watchdog.reset();
        self.prior_transport = Some(established.transport);
        self.client_id = Some(established.client_id.clone());
        self.connection_id = Some(established.connection_id.clone());
        self.payload_limit = established.max_payload_bytes;
        self.heartbeat_window = established.ping_interval + established.ping_timeout;
        self.link = Some(established.link);
        self.arm_heartbeat();
        self.emit(ClientEvent::Connected {
            connection_id: established.connection_id,
            client_id: established.client_id,
            transport: established.transport,
        });
        self.flush().await;
    }

    /// The live link went away without the application asking.
    fn link_lost(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            close_link_detached(link);
        }
        let was_open = self.state == ReadyState::Open;
        self.state = ReadyState::Closed;
        self.heartbeat_deadline = None;
        self.connection_id = None;
        if was_open {
            info!(reason, "connection lost");
            self.emit(ClientEvent::Disconnected {
                reason: reason.to_owned(),
            });
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if !self.wanted {
            return;
        }
        if let Some(max) = self.config.max_reconnect_attempts {
            if self.backoff.attempts() >= max {
                warn!(attempts = self.backoff.attempts(), "reconnect attempts exhausted");
                self.wanted = false;
                self.reconnecting = false;
                self.reconnect_at = None;
                self.watchdog_at = None;
                self.emit(ClientEvent::ReconnectFailed);
                return;
            }
        }
        self.reconnecting = true;
        if !self.online {
            debug!("offline, reconnect paused");
            return;
        }
        let delay = self.backoff.next_delay();
        debug!(attempt = self.backoff.attempts(), ?delay, "reconnect scheduled");
        self.emit(ClientEvent::Reconnecting {
            attempt: self.backoff.attempts(),
            delay,
        });
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn close(&mut self) {
        let was_active = self.wanted || self.link.is_some();
        self.wanted = false;
        self.generation = self.generation.wrapping_add(1);
        self.attempt_in_flight = false;
        self.reconnecting = false;
        self.reconnect_at = None;
        self.heartbeat_deadline = None;
        self.watchdog_at = None;

        if let Some(mut link) = self.link.take() {
            self.state = ReadyState::Closing;
            self.publish();
            let goodbye = async {
                let _ = link
                    .sink
                    .send(Frame::Close {
                        reason: "client close".into(),
                    })
                    .await;
                let _ = link.sink.close().await;
            };
            if timeout(CLOSE_TIMEOUT, goodbye).await.is_err() {
                debug!("close handshake timed out");
            }
        }
        self.state = ReadyState::Closed;
        self.connection_id = None;

        for (_, pending) in self.acks.drain() {
            let _ = pending.reply.send(Err(ClientError::Closed));
        }
        self.ack_timers.clear();

        if was_active {
            info!("connection closed");
            self.emit(ClientEvent::Closed);
        }
    }

    fn set_online(&mut self, online: bool) {
        if self.online == online {
            return;
        }
        self.online = online;
        if online {
            info!("network available");
            if self.wanted && self.state != ReadyState::Open {
                self.start_attempt();
            }
        } else {
            info!("network unavailable");
            self.reconnect_at = None;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Liveness
    // ─────────────────────────────────────────────────────────────────────

    fn arm_heartbeat(&mut self) {
        self.heartbeat_deadline = Some(Instant::now() + self.heartbeat_window);
    }

    fn arm_watchdog(&mut self) {
        self.watchdog_at = Some(Instant::now() + self.watchdog.delay());
    }

    fn watchdog_check(&mut self) {
        let connected = self.state == ReadyState::Open
            && self
                .heartbeat_deadline
                .is_some_and(|deadline| deadline > Instant::now());
        if self.watchdog.check(connected) == WatchdogVerdict::Stale {
            debug!(depth = self.watchdog.depth(), "watchdog found connection stale");
            if self.state == ReadyState::Open {
                self.link_lost("watchdog");
            }
            self.start_attempt();
        }
        if self.wanted {
            self.arm_watchdog();
        } else {
            self.watchdog_at = None;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Traffic
    // ─────────────────────────────────────────────────────────────────────

    async fn handle_inbound(&mut self, inbound: Option<std::result::Result<Frame, TransportError>>) {
        match inbound {
            None => self.link_lost("transport close"),
            Some(Err(error)) => {
                warn!(error = %error, "transport failed");
                let reason = error.to_string();
                self.emit(ClientEvent::TransportError(error));
                self.link_lost(&reason);
            }
            Some(Ok(frame)) => self.handle_frame(frame).await,
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Ping {} => {
                self.arm_heartbeat();
                let _ = self.write(Frame::Pong {}).await;
            }
            Frame::Message(_) | Frame::Batch { .. } => {
                for message in frame.into_messages() {
                    self.deliver(message);
                }
            }
            Frame::Ack { ack_id } => self.ack_received(ack_id),
            Frame::Close { reason } => self.link_lost(&reason),
            Frame::Open { .. } | Frame::Pong {} => debug!("unexpected frame from server ignored"),
        }
    }

    fn deliver(&mut self, message: WireMessage) {
        match message.channel {
            Channel::Data => self.emit(ClientEvent::Message {
                payload: message.payload,
            }),
            Channel::Control => match serde_json::from_value::<ControlMessage>(message.payload) {
                Ok(control) => {
                    self.track_auth(&control.body);
                    self.emit(ClientEvent::Control(control));
                }
                Err(e) => debug!(error = %e, "unrecognised control message ignored"),
            },
        }
    }

    fn track_auth(&mut self, body: &ControlBody) {
        match body {
            ControlBody::Authorised { auth }
            | ControlBody::AuthorisationFailure { auth }
            | ControlBody::LoggedOff { auth } => self.auth = auth.clone(),
            _ => {}
        }
    }

    fn enqueue(&mut self, mut message: WireMessage, ack: Option<(Duration, AckReply)>) {
        if let Some((after, reply)) = ack {
            self.next_ack_id = self.next_ack_id.wrapping_add(1);
            let id = self.next_ack_id;
            message.ack_id = Some(id);
            let key = self.ack_timers.insert(id, after);
            let _ = self.acks.insert(id, PendingAck { reply, key, after });
        }
        if message.channel == Channel::Data {
            self.attach_auth(&mut message.payload);
        }
        self.queue.push(message);
    }

    /// Outbound data carries the current `_auth` once a token was issued.
    fn attach_auth(&self, payload: &mut Value) {
        if self.auth.token.is_none() {
            return;
        }
        if let Value::Object(map) = payload {
            if map.contains_key("_auth") {
                return;
            }
            if let Ok(auth) = serde_json::to_value(self.auth.without_credentials()) {
                let _ = map.insert("_auth".into(), auth);
            }
        }
    }

    /// Write queued messages while open, removing exactly what was written.
    async fn flush(&mut self) {
        while self.state == ReadyState::Open {
            let Some((count, frame)) = self.queue.next_frame(self.payload_limit) else {
                break;
            };
            if !self.write(frame).await {
                break;
            }
            self.queue.commit(count);
        }
    }

    async fn write(&mut self, frame: Frame) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        match link.sink.send(frame).await {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %error, "write failed");
                let reason = error.to_string();
                self.emit(ClientEvent::TransportError(error));
                self.link_lost(&reason);
                false
            }
        }
    }

    fn ack_received(&mut self, id: u64) {
        match self.acks.remove(&id) {
            Some(pending) => {
                let _ = self.ack_timers.remove(&pending.key);
                let _ = pending.reply.send(Ok(()));
            }
            None => debug!(ack_id = id, "ack for unknown or expired message"),
        }
    }

    fn ack_timed_out(&mut self, id: u64) {
        if let Some(pending) = self.acks.remove(&id) {
            debug!(ack_id = id, "ack timed out");
            let _ = pending.reply.send(Err(TimeoutError {
                after: pending.after,
            }
            .into()));
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Output
    // ─────────────────────────────────────────────────────────────────────

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let status = ClientStatus {
            ready_state: self.state,
            reconnecting: self.reconnecting,
            attempts: self.backoff.attempts(),
            connection_id: self.connection_id.clone(),
            client_id: self.client_id.clone(),
            prior_successful_transport: self.prior_transport,
            auth: self.auth.clone(),
            queued: self.queue.len(),
            online: self.online,
        };
        let _ = self.status.send_if_modified(move |current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Try each transport in order; the first that completes the handshake wins.
async fn establish(
    connector: &dyn Connector,
    order: Vec<TransportKind>,
    params: &ConnectParams,
    limit: Duration,
) -> std::result::Result<Established, TransportError> {
    let mut last = TransportError::new("no transport configured");
    for kind in order {
        match timeout(limit, handshake(connector, kind, params)).await {
            Ok(Ok(established)) => return Ok(established),
            Ok(Err(error)) => {
                debug!(transport = %kind, error = %error, "transport unavailable");
                last = error;
            }
            Err(_) => {
                debug!(transport = %kind, "handshake timed out");
                last = TransportError::new("handshake timed out").with_context(kind.to_string());
            }
        }
    }
    Err(last)
}

async fn handshake(
    connector: &dyn Connector,
    kind: TransportKind,
    params: &ConnectParams,
) -> std::result::Result<Established, TransportError> {
    let mut link = connector.connect(kind, params).await?;
    match link.stream.next().await {
        Some(Ok(Frame::Open {
            connection_id,
            client_id,
            ping_interval_ms,
            ping_timeout_ms,
            max_payload_bytes,
        })) => Ok(Established {
            transport: kind,
            link,
            connection_id,
            client_id,
            ping_interval: Duration::from_millis(ping_interval_ms),
            ping_timeout: Duration::from_millis(ping_timeout_ms),
            max_payload_bytes,
        }),
        Some(Ok(Frame::Close { reason })) => Err(TransportError::new(reason)),
        Some(Ok(_)) => Err(TransportError::new("expected open frame")),
        Some(Err(error)) => Err(error),
        None => Err(TransportError::new("closed before handshake")),
    }
}

fn close_link_detached(mut link: Link) {
    drop(tokio::spawn(async move {
        let _ = timeout(CLOSE_TIMEOUT, link.sink.close()).await;
    }));
}

async fn next_inbound(link: &mut Option<Link>) -> Option<std::result::Result<Frame, TransportError>> {
    match link {
        Some(link) => link.stream.next().await,
        None => future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
