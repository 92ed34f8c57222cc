//! One instance's isolated routing scope.
//!
//! Membership (sessions and routing groups) sits behind a per-domain mutex
//! that is never held across an `.await`. Domains share nothing, so
//! traffic for one instance never contends with another.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};
use uib_auth::{ClientMeta, LogonPolicy, LogonState, TokenPolicy};
use uib_core::{
    AuthToken, ClientSessionSnapshot, ConnectionId, ControlMessage, InstanceId, WireMessage,
};

use crate::connection::ClientConnection;
use crate::envelope::{OutboundEnvelope, Recipient, client_group, page_group};
use crate::hooks::{BackendMessage, InstanceHooks};
use crate::metrics::{
    CONNECTIONS_ACTIVE, HOOK_FAILURES_TOTAL, MESSAGES_DROPPED_TOTAL, MESSAGES_FORWARDED_TOTAL,
    MESSAGES_SENT_TOTAL,
};

/// Default session length for issued tokens (12 hours).
pub const DEFAULT_SESSION_LENGTH: Duration = Duration::from_secs(43_200);

/// Static configuration of one instance.
#[derive(Clone, Debug)]
pub struct InstanceConfig {
    /// Instance id; also the token audience.
    pub id: InstanceId,
    /// Topic stamped on server-originated control messages and on
    /// normalized scalar payloads.
    pub topic: Option<String>,
    /// Logon rules.
    pub logon: LogonPolicy,
}

impl InstanceConfig {
    /// Configuration with security disabled.
    pub fn new(id: InstanceId) -> Self {
        Self {
            logon: LogonPolicy {
                security_enabled: false,
                dev_mode: false,
                token: TokenPolicy {
                    audience: id.clone(),
                    secret: None,
                    session_length: DEFAULT_SESSION_LENGTH,
                    check_ip: false,
                },
            },
            id,
            topic: None,
        }
    }

    /// Set the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Enable security with the given signing secret and session length.
    #[must_use]
    pub fn with_security(
        mut self,
        secret: Option<String>,
        session_length: Duration,
        check_ip: bool,
    ) -> Self {
        self.logon.security_enabled = true;
        self.logon.token.secret = secret;
        self.logon.token.session_length = session_length;
        self.logon.token.check_ip = check_ip;
        self
    }

    /// Permit logon over insecure channels.
    #[must_use]
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.logon.dev_mode = dev_mode;
        self
    }

    /// Whether messages must carry a valid token.
    pub fn security_enabled(&self) -> bool {
        self.logon.security_enabled
    }
}

/// Counters reported by `/health`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStats {
    /// Instance id.
    pub instance: InstanceId,
    /// Connected client sessions.
    pub clients: usize,
    /// Messages received from clients.
    pub received: u64,
    /// Messages forwarded to the backend.
    pub forwarded: u64,
    /// Messages dropped on full client queues.
    pub dropped: u64,
    /// Whether security is enabled.
    pub security: bool,
}

/// Server-side record of one connected client.
#[derive(Debug)]
pub(crate) struct ClientSession {
    pub(crate) connection: Arc<ClientConnection>,
    pub(crate) snapshot: ClientSessionSnapshot,
    pub(crate) meta: ClientMeta,
    pub(crate) logon: LogonState,
    pub(crate) auth: AuthToken,
}

#[derive(Debug, Default)]
struct Membership {
    sessions: HashMap<ConnectionId, ClientSession>,
    groups: HashMap<String, HashSet<ConnectionId>>,
}

impl Membership {
    fn join(&mut self, group: String, id: &ConnectionId) {
        let _ = self.groups.entry(group).or_default().insert(id.clone());
    }

    fn leave(&mut self, group: &str, id: &ConnectionId) {
        if let Some(members) = self.groups.get_mut(group) {
            let _ = members.remove(id);
            if members.is_empty() {
                let _ = self.groups.remove(group);
            }
        }
    }
}

/// Isolated routing scope bound to one instance.
pub struct RoutingDomain {
    config: InstanceConfig,
    hooks: InstanceHooks,
    membership: Mutex<Membership>,
    closed: AtomicBool,
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl RoutingDomain {
    pub(crate) fn new(config: InstanceConfig, hooks: InstanceHooks) -> Self {
        Self {
            config,
            hooks,
            membership: Mutex::new(Membership::default()),
            closed: AtomicBool::new(false),
            received: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Instance id.
    pub fn id(&self) -> &InstanceId {
        &self.config.id
    }

    /// Instance configuration.
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub(crate) fn hooks(&self) -> &InstanceHooks {
        &self.hooks
    }

    /// Number of connected sessions.
    pub fn client_count(&self) -> usize {
        self.membership.lock().sessions.len()
    }

    /// Snapshot of one session.
    pub fn session(&self, connection_id: &ConnectionId) -> Option<ClientSessionSnapshot> {
        self.membership
            .lock()
            .sessions
            .get(connection_id)
            .map(|s| s.snapshot.clone())
    }

    /// Snapshots of every session, sorted by connection id.
    pub fn sessions(&self) -> Vec<ClientSessionSnapshot> {
        let mut all: Vec<_> = self
            .membership
            .lock()
            .sessions
            .values()
            .map(|s| s.snapshot.clone())
            .collect();
        all.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        all
    }

    /// Connection ids in a routing group.
    pub fn group_members(&self, group: &str) -> Vec<ConnectionId> {
        let mut members: Vec<_> = self
            .membership
            .lock()
            .groups
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Current counters.
    pub fn stats(&self) -> DomainStats {
        DomainStats {
            instance: self.config.id.clone(),
            clients: self.client_count(),
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            security: self.config.security_enabled(),
        }
    }

    /// Whether the domain has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Add a session and join its two routing groups.
    ///
    /// Returns `false` if the domain was torn down meanwhile.
    pub(crate) fn insert(&self, session: ClientSession) -> bool {
        let mut membership = self.membership.lock();
        if self.is_closed() {
            return false;
        }
        let id = session.snapshot.connection_id.clone();
        membership.join(client_group(&session.snapshot.client_id), &id);
        membership.join(page_group(&session.snapshot.page_name), &id);
        let _ = membership.sessions.insert(id, session);
        gauge!(CONNECTIONS_ACTIVE, "instance" => self.config.id.to_string()).increment(1.0);
        true
    }

    /// Remove a session and leave its groups.
    pub(crate) fn remove(&self, connection_id: &ConnectionId) -> Option<ClientSession> {
        let mut membership = self.membership.lock();
        let session = membership.sessions.remove(connection_id)?;
        membership.leave(&client_group(&session.snapshot.client_id), connection_id);
        membership.leave(&page_group(&session.snapshot.page_name), connection_id);
        gauge!(CONNECTIONS_ACTIVE, "instance" => self.config.id.to_string()).decrement(1.0);
        Some(session)
    }

    /// Mark closed and take every session out.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn close(&self) -> Vec<ClientSession> {
        let mut membership = self.membership.lock();
        self.closed.store(true, Ordering::Release);
        membership.groups.clear();
        let drained: Vec<_> = membership.sessions.drain().map(|(_, s)| s).collect();
        gauge!(CONNECTIONS_ACTIVE, "instance" => self.config.id.to_string())
            .decrement(drained.len() as f64);
        drained
    }

    pub(crate) fn connection(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.membership
            .lock()
            .sessions
            .get(connection_id)
            .map(|s| Arc::clone(&s.connection))
    }

    /// Auth state, connection metadata and owning connection of a session.
    pub(crate) fn auth_context(
        &self,
        connection_id: &ConnectionId,
    ) -> Option<(AuthToken, ClientMeta, Arc<ClientConnection>)> {
        self.membership.lock().sessions.get(connection_id).map(|s| {
            (
                s.auth.clone(),
                s.meta.clone(),
                Arc::clone(&s.connection),
            )
        })
    }

    pub(crate) fn set_logon_state(&self, connection_id: &ConnectionId, state: LogonState) {
        if let Some(session) = self.membership.lock().sessions.get_mut(connection_id) {
            session.logon = state;
        }
    }

    pub(crate) fn set_auth(&self, connection_id: &ConnectionId, state: LogonState, auth: AuthToken) {
        if let Some(session) = self.membership.lock().sessions.get_mut(connection_id) {
            session.logon = state;
            session.auth = auth;
        }
    }

    /// Logon state of a session.
    pub fn logon_state(&self, connection_id: &ConnectionId) -> Option<LogonState> {
        self.membership
            .lock()
            .sessions
            .get(connection_id)
            .map(|s| s.logon)
    }

    pub(crate) fn record_received(&self) {
        let _ = self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Stamp the instance topic on a server-originated control message.
    pub(crate) fn server_control(&self, message: ControlMessage) -> ControlMessage {
        message.with_topic(self.config.topic.clone())
    }

    /// Recipients of an envelope, resolved under the lock.
    fn recipients(
        &self,
        recipient: &Recipient,
    ) -> Vec<(Arc<ClientConnection>, ClientSessionSnapshot)> {
        let membership = self.membership.lock();
        let pick = |s: &ClientSession| (Arc::clone(&s.connection), s.snapshot.clone());
        match recipient {
            Recipient::All => membership.sessions.values().map(pick).collect(),
            Recipient::Connection(id) => membership.sessions.get(id).map(pick).into_iter().collect(),
            Recipient::Group(group) => membership
                .groups
                .get(group)
                .into_iter()
                .flatten()
                .filter_map(|id| membership.sessions.get(id))
                .map(pick)
                .collect(),
        }
    }

    /// Deliver an envelope to its recipients. Returns how many were
    /// enqueued.
    ///
    /// The outbound middleware runs once per delivery; an error or panic in
    /// it skips that delivery only.
    pub fn send(&self, envelope: &OutboundEnvelope) -> usize {
        let recipients = self.recipients(&envelope.recipient);
        debug!(
            instance = %self.config.id,
            recipients = recipients.len(),
            channel = ?envelope.channel,
            "send to instance"
        );
        let mut delivered = 0;
        for (connection, snapshot) in recipients {
            let Some(envelope) = self.run_outbound_middleware(envelope.clone(), &snapshot) else {
                continue;
            };
            let message = WireMessage {
                channel: envelope.channel,
                payload: envelope.payload,
                ack_id: None,
            };
            if self.enqueue(&connection, message) {
                delivered += 1;
            }
        }
        delivered
    }

    fn run_outbound_middleware(
        &self,
        envelope: OutboundEnvelope,
        snapshot: &ClientSessionSnapshot,
    ) -> Option<OutboundEnvelope> {
        let Some(middleware) = self.hooks.outbound_middleware.as_ref() else {
            return Some(envelope);
        };
        match catch_unwind(AssertUnwindSafe(|| middleware.process(envelope, snapshot))) {
            Ok(Ok(Some(envelope))) => Some(envelope),
            Ok(Ok(None)) => {
                debug!(instance = %self.config.id, conn_id = %snapshot.connection_id, "envelope vetoed by outbound middleware");
                None
            }
            Ok(Err(err)) => {
                warn!(instance = %self.config.id, conn_id = %snapshot.connection_id, error = %err, "outbound middleware failed");
                self.record_hook_failure("outbound");
                None
            }
            Err(_) => {
                warn!(instance = %self.config.id, conn_id = %snapshot.connection_id, "outbound middleware panicked");
                self.record_hook_failure("outbound");
                None
            }
        }
    }

    /// Enqueue one message for one connection, counting drops.
    pub(crate) fn enqueue(&self, connection: &ClientConnection, message: WireMessage) -> bool {
        if connection.send_message(message) {
            counter!(MESSAGES_SENT_TOTAL, "instance" => self.config.id.to_string()).increment(1);
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            counter!(MESSAGES_DROPPED_TOTAL, "instance" => self.config.id.to_string()).increment(1);
            warn!(
                instance = %self.config.id,
                conn_id = %connection.id,
                dropped = connection.drop_count(),
                "client queue full or closed, message dropped"
            );
            false
        }
    }

    /// Hand a message to the backend sink. A panicking sink is contained.
    pub(crate) fn notify_backend(&self, message: BackendMessage) {
        if matches!(message, BackendMessage::Data(_)) {
            let _ = self.forwarded.fetch_add(1, Ordering::Relaxed);
            counter!(MESSAGES_FORWARDED_TOTAL, "instance" => self.config.id.to_string())
                .increment(1);
        }
        let sink = &self.hooks.sink;
        if catch_unwind(AssertUnwindSafe(|| sink.deliver(&self.config.id, message))).is_err() {
            warn!(instance = %self.config.id, "backend sink panicked");
            self.record_hook_failure("sink");
        }
    }

    pub(crate) fn record_hook_failure(&self, hook: &'static str) {
        counter!(HOOK_FAILURES_TOTAL, "instance" => self.config.id.to_string(), "hook" => hook)
            .increment(1);
    }
}

impl std::fmt::Debug for RoutingDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingDomain")
            .field("id", &self.config.id)
            .field("clients", &self.client_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::hooks::{ChannelSink, HookError, OutboundMiddleware};
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::sync::mpsc;
    use uib_core::{Channel, ClientId};

    fn domain_with(hooks: impl FnOnce(InstanceHooks) -> InstanceHooks) -> RoutingDomain {
        let (sink, _rx) = ChannelSink::new();
        let id = InstanceId::parse("myapp").unwrap();
        RoutingDomain::new(InstanceConfig::new(id), hooks(InstanceHooks::new(Arc::new(sink))))
    }

    fn session(
        conn: &str,
        client: &str,
        page: &str,
        capacity: usize,
    ) -> (ClientSession, mpsc::Receiver<Outbound>) {
        let (connection, rx) = ClientConnection::channel(ConnectionId::from(conn), capacity);
        let snapshot = ClientSessionSnapshot {
            connection_id: ConnectionId::from(conn),
            client_id: ClientId::from(client),
            tab_id: None,
            page_name: page.into(),
            reconnect_count: 0,
            remote_address: None,
            secure: false,
            connected_at: "2026-01-01T00:00:00Z".into(),
        };
        let session = ClientSession {
            connection: Arc::new(connection),
            snapshot,
            meta: ClientMeta::default(),
            logon: LogonState::Unauthenticated,
            auth: AuthToken::default(),
        };
        (session, rx)
    }

    fn payloads(rx: &mut mpsc::Receiver<Outbound>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Message { message, .. } = item {
                out.push(message.payload);
            }
        }
        out
    }

    #[test]
    fn insert_joins_groups_and_remove_leaves() {
        let domain = domain_with(|h| h);
        let (s1, _r1) = session("c1", "aa", "index.html", 4);
        let (s2, _r2) = session("c2", "aa", "other.html", 4);
        assert!(domain.insert(s1));
        assert!(domain.insert(s2));
        assert_eq!(domain.client_count(), 2);
        assert_eq!(
            domain.group_members("clientId:aa"),
            vec![ConnectionId::from("c1"), ConnectionId::from("c2")]
        );
        assert_eq!(domain.group_members("pageName:index.html"), vec![ConnectionId::from("c1")]);

        let removed = domain.remove(&ConnectionId::from("c1")).unwrap();
        assert_eq!(removed.snapshot.page_name, "index.html");
        assert!(domain.group_members("pageName:index.html").is_empty());
        assert_eq!(domain.group_members("clientId:aa"), vec![ConnectionId::from("c2")]);
        assert!(domain.remove(&ConnectionId::from("c1")).is_none());
    }

    #[test]
    fn closed_domain_refuses_sessions() {
        let domain = domain_with(|h| h);
        let (s1, _r1) = session("c1", "aa", "index.html", 4);
        assert!(domain.insert(s1));
        assert_eq!(domain.close().len(), 1);
        let (s2, _r2) = session("c2", "bb", "index.html", 4);
        assert!(!domain.insert(s2));
        assert_eq!(domain.client_count(), 0);
    }

    #[test]
    fn unicast_reaches_only_target() {
        let domain = domain_with(|h| h);
        let (s1, mut r1) = session("c1", "aa", "index.html", 4);
        let (s2, mut r2) = session("c2", "bb", "index.html", 4);
        let _ = domain.insert(s1);
        let _ = domain.insert(s2);

        let env = OutboundEnvelope::to_connection(ConnectionId::from("c2"), json!(1));
        assert_eq!(domain.send(&env), 1);
        assert!(payloads(&mut r1).is_empty());
        assert_eq!(payloads(&mut r2), vec![json!(1)]);

        let gone = OutboundEnvelope::to_connection(ConnectionId::from("nope"), json!(2));
        assert_eq!(domain.send(&gone), 0);
    }

    #[test]
    fn group_send() {
        let domain = domain_with(|h| h);
        let (s1, mut r1) = session("c1", "aa", "index.html", 4);
        let (s2, mut r2) = session("c2", "bb", "page2.html", 4);
        let _ = domain.insert(s1);
        let _ = domain.insert(s2);
        let env = OutboundEnvelope::to_group("pageName:page2.html", json!("x"));
        assert_eq!(domain.send(&env), 1);
        assert!(payloads(&mut r1).is_empty());
        assert_eq!(payloads(&mut r2), vec![json!("x")]);
    }

    #[test]
    fn full_queue_does_not_block_others() {
        let domain = domain_with(|h| h);
        let (slow, _slow_rx) = session("slow", "aa", "index.html", 1);
        let (fast, mut fast_rx) = session("fast", "bb", "index.html", 8);
        let _ = domain.insert(slow);
        let _ = domain.insert(fast);

        for i in 0..3 {
            let _ = domain.send(&OutboundEnvelope::broadcast(json!(i)));
        }
        assert_eq!(payloads(&mut fast_rx), vec![json!(0), json!(1), json!(2)]);
        assert_eq!(domain.stats().dropped, 2);
    }

    struct Filter;

    impl OutboundMiddleware for Filter {
        fn process(
            &self,
            mut envelope: OutboundEnvelope,
            session: &ClientSessionSnapshot,
        ) -> Result<Option<OutboundEnvelope>, HookError> {
            match session.connection_id.as_str() {
                "veto" => Ok(None),
                "error" => Err(HookError::new("boom")),
                "panic" => panic!("middleware bug"),
                _ => {
                    envelope.payload = json!({"wrapped": envelope.payload});
                    Ok(Some(envelope))
                }
            }
        }
    }

    #[test]
    fn outbound_middleware_is_isolated_per_delivery() {
        let domain = domain_with(|h| h.with_outbound_middleware(Arc::new(Filter)));
        let mut receivers = Vec::new();
        for conn in ["veto", "error", "panic", "ok"] {
            let (s, r) = session(conn, conn, "index.html", 4);
            let _ = domain.insert(s);
            receivers.push((conn, r));
        }
        assert_eq!(domain.send(&OutboundEnvelope::broadcast(json!(7))), 1);
        for (conn, mut rx) in receivers {
            let got = payloads(&mut rx);
            if conn == "ok" {
                assert_eq!(got, vec![json!({"wrapped": 7})]);
            } else {
                assert!(got.is_empty(), "{conn} should receive nothing");
            }
        }
    }

    #[test]
    fn control_envelope_keeps_channel() {
        let domain = domain_with(|h| h);
        let (s1, mut r1) = session("c1", "aa", "index.html", 4);
        let _ = domain.insert(s1);
        let _ = domain.send(&OutboundEnvelope::control(&ControlMessage::server(
            uib_core::ControlBody::Shutdown {},
        )));
        assert_matches!(r1.try_recv().unwrap(), Outbound::Message { message, .. } => {
            assert_eq!(message.channel, Channel::Control);
        });
    }

    #[test]
    fn instance_config_builders() {
        let config = InstanceConfig::new(InstanceId::parse("myapp").unwrap())
            .with_topic("t")
            .with_security(Some("s".into()), Duration::from_secs(60), true)
            .with_dev_mode(true);
        assert!(config.security_enabled());
        assert!(config.logon.dev_mode);
        assert!(config.logon.token.check_ip);
        assert_eq!(config.logon.token.audience.as_str(), "myapp");
        assert_eq!(config.topic.as_deref(), Some("t"));
    }
}
