//! The broker: a registry of routing domains, one per live instance.
//!
//! A [`Broker`] is an ordinary value. The embedding application constructs
//! one, hands it (in an `Arc`) to the transport layer, and creates a domain
//! for every instance it mounts.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uib_auth::token::INVALID_TOKEN_MESSAGE;
use uib_auth::{ClientMeta, LogonOutcome, LogonState, logoff, refresh_token};
use uib_core::{
    AuthToken, Channel, ClientId, ClientSessionSnapshot, ConnectionId, ControlBody,
    ControlMessage, InstanceId, PROTOCOL_VERSION, WireMessage,
};

use crate::connection::{ClientConnection, Outbound};
use crate::domain::{ClientSession, DomainStats, InstanceConfig, RoutingDomain};
use crate::envelope::OutboundEnvelope;
use crate::errors::{BrokerError, Result};
use crate::hooks::{BackendMessage, InstanceHooks};
use crate::metrics::{
    AUTH_FAILURES_TOTAL, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
    MESSAGES_RECEIVED_TOTAL,
};

/// Page name used when the client does not report one.
pub const DEFAULT_PAGE_NAME: &str = "index.html";

/// Everything the transport knows about a new connection.
#[derive(Debug)]
pub struct ConnectRequest {
    /// Outbound side of the connection.
    pub connection: Arc<ClientConnection>,
    /// Durable id from the client's cookie, if it presented a valid one.
    pub client_id: Option<ClientId>,
    /// Page the client was loaded from.
    pub page_name: Option<String>,
    /// Browser tab id.
    pub tab_id: Option<String>,
    /// Reconnect count reported by the client.
    pub reconnect_count: u32,
    /// Remote address and channel security.
    pub meta: ClientMeta,
}

/// Registry mapping instance ids to their routing domains.
#[derive(Default)]
pub struct Broker {
    domains: RwLock<HashMap<InstanceId, Arc<RoutingDomain>>>,
}

impl Broker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the routing domain for an instance.
    ///
    /// Fails with [`BrokerError::DomainExists`] if one is already live.
    pub fn create_domain(
        &self,
        config: InstanceConfig,
        hooks: InstanceHooks,
    ) -> Result<Arc<RoutingDomain>> {
        let mut domains = self.domains.write();
        if domains.contains_key(&config.id) {
            return Err(BrokerError::DomainExists(config.id));
        }
        let id = config.id.clone();
        let domain = Arc::new(RoutingDomain::new(config, hooks));
        let _ = domains.insert(id.clone(), Arc::clone(&domain));
        info!(instance = %id, security = domain.config().security_enabled(), "routing domain created");
        Ok(domain)
    }

    /// Tear down an instance's domain.
    ///
    /// Every session gets a `shutdown` control message (best effort) and is
    /// then force-disconnected. Returns `false` if there was no such domain.
    pub fn destroy_domain(&self, instance: &InstanceId) -> bool {
        let Some(domain) = self.domains.write().remove(instance) else {
            debug!(instance = %instance, "destroy of unknown domain ignored");
            return false;
        };
        let shutdown = domain.server_control(ControlMessage::server(ControlBody::Shutdown {}));
        let sessions = domain.close();
        for session in &sessions {
            let _ = domain.enqueue(&session.connection, WireMessage::control(&shutdown));
            session.connection.disconnect("instance shutdown");
            counter!(DISCONNECTIONS_TOTAL, "instance" => instance.to_string()).increment(1);
        }
        info!(instance = %instance, clients = sessions.len(), "routing domain destroyed");
        true
    }

    /// Destroy every domain. Returns how many were destroyed.
    pub fn shutdown(&self) -> usize {
        self.instances()
            .iter()
            .filter(|id| self.destroy_domain(id))
            .count()
    }

    /// Live domain for an instance.
    pub fn domain(&self, instance: &InstanceId) -> Option<Arc<RoutingDomain>> {
        self.domains.read().get(instance).cloned()
    }

    /// Ids of every live instance, sorted.
    pub fn instances(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.domains.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Counters of every live domain, sorted by instance.
    pub fn stats(&self) -> Vec<DomainStats> {
        let mut stats: Vec<_> = self.domains.read().values().map(|d| d.stats()).collect();
        stats.sort_by(|a, b| a.instance.cmp(&b.instance));
        stats
    }

    /// Establish a client session.
    ///
    /// Runs the connection middleware (if any), joins the session's routing
    /// groups, sends `client connect` to the client and reports it to the
    /// backend.
    pub async fn on_connect(
        &self,
        instance: &InstanceId,
        request: ConnectRequest,
    ) -> Result<ClientSessionSnapshot> {
        let domain = self
            .domain(instance)
            .ok_or_else(|| BrokerError::DomainNotFound(instance.clone()))?;

        let snapshot = ClientSessionSnapshot {
            connection_id: request.connection.id.clone(),
            client_id: request.client_id.unwrap_or_default(),
            tab_id: request.tab_id,
            page_name: request
                .page_name
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_PAGE_NAME.to_owned()),
            reconnect_count: request.reconnect_count,
            remote_address: request.meta.remote_address.clone(),
            secure: request.meta.secure,
            connected_at: chrono::Utc::now().to_rfc3339(),
        };

        if let Some(middleware) = domain.hooks().connection_middleware.clone() {
            let verdict = AssertUnwindSafe(middleware.on_connect(&snapshot))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    domain.record_hook_failure("connection");
                    Err(crate::hooks::HookError::new("connection middleware panicked"))
                });
            if let Err(err) = verdict {
                warn!(instance = %instance, conn_id = %snapshot.connection_id, error = %err, "connection rejected by middleware");
                counter!(CONNECTIONS_REJECTED_TOTAL, "instance" => instance.to_string()).increment(1);
                return Err(BrokerError::SessionRejected(err.to_string()));
            }
        }

        let connection = Arc::clone(&request.connection);
        let session = ClientSession {
            connection: Arc::clone(&connection),
            snapshot: snapshot.clone(),
            meta: request.meta,
            logon: LogonState::Unauthenticated,
            auth: AuthToken::default(),
        };
        if !domain.insert(session) {
            return Err(BrokerError::DomainNotFound(instance.clone()));
        }
        counter!(CONNECTIONS_TOTAL, "instance" => instance.to_string()).increment(1);
        info!(
            instance = %instance,
            conn_id = %snapshot.connection_id,
            client_id = %snapshot.client_id,
            page = %snapshot.page_name,
            clients = domain.client_count(),
            "client connected"
        );

        let hello = domain.server_control(ControlMessage::server(ControlBody::ClientConnect {
            server_timestamp: chrono::Utc::now().to_rfc3339(),
            version: PROTOCOL_VERSION.to_owned(),
            session: snapshot.clone(),
        }));
        let _ = domain.enqueue(&connection, WireMessage::control(&hello));
        domain.notify_backend(BackendMessage::Control {
            message: hello,
            connection_id: Some(snapshot.connection_id.clone()),
        });
        Ok(snapshot)
    }

    /// End a client session.
    ///
    /// Remaining clients and the backend receive `client disconnect` with
    /// the session's last snapshot. Unknown instances or connections are
    /// ignored.
    pub fn on_disconnect(&self, instance: &InstanceId, connection_id: &ConnectionId, reason: &str) {
        let Some(domain) = self.domain(instance) else {
            return;
        };
        let Some(session) = domain.remove(connection_id) else {
            return;
        };
        counter!(DISCONNECTIONS_TOTAL, "instance" => instance.to_string()).increment(1);
        info!(
            instance = %instance,
            conn_id = %connection_id,
            client_id = %session.snapshot.client_id,
            reason,
            clients = domain.client_count(),
            "client disconnected"
        );

        let goodbye = domain.server_control(ControlMessage::server(ControlBody::ClientDisconnect {
            reason: reason.to_owned(),
            session: session.snapshot,
        }));
        let _ = domain.send(&OutboundEnvelope::control(&goodbye));
        domain.notify_backend(BackendMessage::Control {
            message: goodbye,
            connection_id: Some(connection_id.clone()),
        });
    }

    /// Handle one message from a client.
    ///
    /// Data messages are normalized, stamped with `_socketId`, token-checked
    /// when security is on and forwarded to the backend. Control messages
    /// drive logon/logoff or are relayed with `from: "client"`. A message
    /// carrying `ackId` is acknowledged once processed.
    pub async fn on_client_message(
        &self,
        instance: &InstanceId,
        connection_id: &ConnectionId,
        message: WireMessage,
    ) {
        let Some(domain) = self.domain(instance) else {
            debug!(instance = %instance, "message for unknown instance dropped");
            return;
        };
        let Some(connection) = domain.connection(connection_id) else {
            debug!(instance = %instance, conn_id = %connection_id, "message from unknown connection dropped");
            return;
        };
        domain.record_received();
        counter!(MESSAGES_RECEIVED_TOTAL, "instance" => instance.to_string()).increment(1);

        match message.channel {
            Channel::Data => handle_data(&domain, connection_id, message.payload),
            Channel::Control => handle_control(&domain, connection_id, message.payload).await,
        }

        if let Some(ack_id) = message.ack_id {
            let _ = connection.send(Outbound::Ack(ack_id));
        }
    }

    /// Deliver an envelope to an instance's clients.
    ///
    /// Returns the number of clients the envelope was enqueued for. An
    /// unknown instance is logged and the envelope dropped.
    pub fn send_to_instance(&self, instance: &InstanceId, envelope: &OutboundEnvelope) -> usize {
        let Some(domain) = self.domain(instance) else {
            warn!(instance = %instance, "send to unknown instance, envelope dropped");
            return 0;
        };
        domain.send(envelope)
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("instances", &self.instances())
            .finish()
    }
}

/// Wrap a non-object payload as `{topic, payload}`.
pub fn normalize_payload(payload: Value, topic: Option<&str>) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            if let Some(topic) = topic {
                let _ = map.insert("topic".into(), Value::String(topic.to_owned()));
            }
            let _ = map.insert("payload".into(), other);
            map
        }
    }
}

fn handle_data(domain: &RoutingDomain, connection_id: &ConnectionId, payload: Value) {
    let mut msg = normalize_payload(payload, domain.config().topic.as_deref());
    if !msg.contains_key("_socketId") {
        let _ = msg.insert("_socketId".into(), Value::String(connection_id.to_string()));
    }

    if domain.config().security_enabled() {
        let Some((session_auth, meta, connection)) = domain.auth_context(connection_id) else {
            return;
        };
        // The session's own token is authoritative; a presented one only
        // matters when the session has none yet (e.g. after a reconnect).
        let presented = if session_auth.token.is_some() {
            session_auth
        } else {
            msg.get("_auth")
                .cloned()
                .and_then(|v| serde_json::from_value::<AuthToken>(v).ok())
                .unwrap_or_else(|| AuthToken::failure(String::new(), INVALID_TOKEN_MESSAGE))
        };
        let refreshed = refresh_token(&presented, &domain.config().logon.token, &meta);
        if !refreshed.info.valid_jwt {
            domain.set_auth(connection_id, LogonState::Unauthenticated, refreshed.clone());
            counter!(AUTH_FAILURES_TOTAL, "instance" => domain.id().to_string()).increment(1);
            debug!(instance = %domain.id(), conn_id = %connection_id, "data message rejected: no valid session");
            let reply = domain.server_control(ControlMessage::server(
                ControlBody::AuthorisationFailure { auth: refreshed },
            ));
            let _ = domain.enqueue(&connection, WireMessage::control(&reply));
            return;
        }
        domain.set_auth(connection_id, LogonState::Authorised, refreshed.clone());
        let _ = msg.insert(
            "_auth".into(),
            serde_json::to_value(refreshed.without_credentials()).unwrap_or(Value::Null),
        );
    }

    debug!(instance = %domain.id(), conn_id = %connection_id, "forwarding data message");
    domain.notify_backend(BackendMessage::Data(Value::Object(msg)));
}

async fn handle_control(domain: &RoutingDomain, connection_id: &ConnectionId, payload: Value) {
    let topic = payload
        .get("topic")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| domain.config().topic.clone());
    let body: ControlBody = match serde_json::from_value(payload) {
        Ok(body) => body,
        Err(err) => {
            debug!(instance = %domain.id(), conn_id = %connection_id, error = %err, "unrecognized control message dropped");
            return;
        }
    };

    match body {
        ControlBody::Logon { auth } => handle_logon(domain, connection_id, auth, topic).await,
        ControlBody::Logoff { .. } => {
            let Some((current, _, connection)) = domain.auth_context(connection_id) else {
                return;
            };
            let outcome = logoff(&current);
            info!(instance = %domain.id(), conn_id = %connection_id, id = %current.id, "logged off");
            reply_auth(domain, connection_id, &connection, outcome, topic);
        }
        body @ (ControlBody::ReadyForContent {}
        | ControlBody::Visibility { .. }
        | ControlBody::SocketError { .. }) => {
            domain.notify_backend(BackendMessage::Control {
                message: ControlMessage::client(body).with_topic(topic),
                connection_id: Some(connection_id.clone()),
            });
        }
        other => {
            debug!(
                instance = %domain.id(),
                conn_id = %connection_id,
                kind = other.kind(),
                "server-only control kind from client ignored"
            );
        }
    }
}

async fn handle_logon(
    domain: &RoutingDomain,
    connection_id: &ConnectionId,
    request: AuthToken,
    topic: Option<String>,
) {
    let Some((_, meta, connection)) = domain.auth_context(connection_id) else {
        return;
    };
    domain.set_logon_state(connection_id, LogonState::Validating);

    let validator = Arc::clone(&domain.hooks().validator);
    let id = request.id.clone();
    let outcome = AssertUnwindSafe(uib_auth::logon(
        request,
        &domain.config().logon,
        validator.as_ref(),
        &meta,
    ))
    .catch_unwind()
    .await
    .unwrap_or_else(|_| {
        warn!(instance = %domain.id(), conn_id = %connection_id, "credential validator panicked");
        domain.record_hook_failure("validator");
        LogonOutcome {
            state: LogonState::Failed,
            auth: AuthToken::failure(id, "Logon failed"),
        }
    });

    if outcome.state != LogonState::Authorised {
        counter!(AUTH_FAILURES_TOTAL, "instance" => domain.id().to_string()).increment(1);
    }
    reply_auth(domain, connection_id, &connection, outcome, topic);
}

fn reply_auth(
    domain: &RoutingDomain,
    connection_id: &ConnectionId,
    connection: &ClientConnection,
    outcome: LogonOutcome,
    topic: Option<String>,
) {
    let reply = ControlMessage::server(outcome.reply()).with_topic(topic);
    domain.set_auth(connection_id, outcome.state, outcome.auth.without_credentials());
    let _ = domain.enqueue(connection, WireMessage::control(&reply));
    domain.notify_backend(BackendMessage::Control {
        message: reply,
        connection_id: Some(connection_id.clone()),
    });
}
