//! Control-channel protocol.
//!
//! Control messages travel on a channel separate from application data and
//! are tagged by the `uibuilderCtrl` field. The set of kinds is closed:
//! [`ControlBody`] names every one of them together with its required
//! fields, and [`ControlMessage`] adds the fields common to all kinds
//! (`topic`, `from`).
//!
//! ```json
//! { "uibuilderCtrl": "client connect", "from": "server", "version": "0.1.0",
//!   "serverTimestamp": "...", "_socketId": "...", "clientId": "...", ... }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthToken;
use crate::ids::{ClientId, ConnectionId};

/// Logical channel a message travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Application payloads.
    Data,
    /// Lifecycle and authentication signals.
    Control,
}

/// Which side produced a control message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Emitted by the broker for a server-side event.
    Server,
    /// Relayed from a browser client.
    Client,
}

/// Metadata snapshot of one connected client session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSessionSnapshot {
    /// Ephemeral connection id.
    #[serde(rename = "_socketId")]
    pub connection_id: ConnectionId,
    /// Durable client id.
    pub client_id: ClientId,
    /// Browser tab id, if the client reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    /// Page the client was loaded from.
    pub page_name: String,
    /// How many times this client has reconnected.
    #[serde(default)]
    pub reconnect_count: u32,
    /// Remote address of the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    /// Whether the connection arrived over a secure channel.
    #[serde(default)]
    pub secure: bool,
    /// RFC 3339 timestamp of the connect.
    pub connected_at: String,
}

/// Kind-specific body of a control message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "uibuilderCtrl")]
pub enum ControlBody {
    /// Sent to a client right after it connects, and to the backend.
    #[serde(rename = "client connect", rename_all = "camelCase")]
    ClientConnect {
        /// RFC 3339 server time.
        server_timestamp: String,
        /// Protocol version.
        version: String,
        /// Session snapshot.
        #[serde(flatten)]
        session: ClientSessionSnapshot,
    },
    /// Sent to remaining clients and the backend when a client leaves.
    #[serde(rename = "client disconnect")]
    ClientDisconnect {
        /// Transport-supplied reason.
        reason: String,
        /// Last known session snapshot.
        #[serde(flatten)]
        session: ClientSessionSnapshot,
    },
    /// The instance is going away.
    #[serde(rename = "shutdown")]
    Shutdown {},
    /// Logon or token check failed.
    #[serde(rename = "authorisation failure")]
    AuthorisationFailure {
        /// Failed auth state (`id` and `info.error` only).
        #[serde(rename = "_auth")]
        auth: AuthToken,
    },
    /// Logon succeeded.
    #[serde(rename = "authorised")]
    Authorised {
        /// Issued auth state.
        #[serde(rename = "_auth")]
        auth: AuthToken,
    },
    /// Logoff confirmation.
    #[serde(rename = "logged off")]
    LoggedOff {
        /// Cleared auth state.
        #[serde(rename = "_auth")]
        auth: AuthToken,
    },
    /// Transport-level failure surfaced to the application.
    #[serde(rename = "socket error")]
    SocketError {
        /// Reason text.
        error: String,
        /// Optional context.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    /// Client asks to authenticate.
    #[serde(rename = "logon")]
    Logon {
        /// Requested identity and credentials.
        #[serde(rename = "_auth")]
        auth: AuthToken,
    },
    /// Client asks to end its authenticated session.
    #[serde(rename = "logoff")]
    Logoff {
        /// Current auth state.
        #[serde(rename = "_auth", default)]
        auth: AuthToken,
    },
    /// Client finished loading and wants initial content.
    #[serde(rename = "ready for content")]
    ReadyForContent {},
    /// Client tab visibility changed.
    #[serde(rename = "visibility", rename_all = "camelCase")]
    Visibility {
        /// Whether the tab is visible.
        is_visible: bool,
    },
}

impl ControlBody {
    /// The `uibuilderCtrl` string for this kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientConnect { .. } => "client connect",
            Self::ClientDisconnect { .. } => "client disconnect",
            Self::Shutdown {} => "shutdown",
            Self::AuthorisationFailure { .. } => "authorisation failure",
            Self::Authorised { .. } => "authorised",
            Self::LoggedOff { .. } => "logged off",
            Self::SocketError { .. } => "socket error",
            Self::Logon { .. } => "logon",
            Self::Logoff { .. } => "logoff",
            Self::ReadyForContent {} => "ready for content",
            Self::Visibility { .. } => "visibility",
        }
    }
}

/// A control message: kind-specific body plus common fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Kind and payload.
    #[serde(flatten)]
    pub body: ControlBody,
    /// Optional topic (the instance topic for server-originated messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Producer side.
    pub from: Origin,
}

impl ControlMessage {
    /// A server-originated control message.
    pub fn server(body: ControlBody) -> Self {
        Self {
            body,
            topic: None,
            from: Origin::Server,
        }
    }

    /// A control message relayed from a client.
    pub fn client(body: ControlBody) -> Self {
        Self {
            body,
            topic: None,
            from: Origin::Client,
        }
    }

    /// Set the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic;
        self
    }

    /// The `uibuilderCtrl` string.
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    /// Serialize into a JSON value for the wire.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> ClientSessionSnapshot {
        ClientSessionSnapshot {
            connection_id: ConnectionId::from("conn1"),
            client_id: ClientId::from("abc"),
            tab_id: Some("t1".into()),
            page_name: "index.html".into(),
            reconnect_count: 2,
            remote_address: Some("127.0.0.1".into()),
            secure: false,
            connected_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn client_connect_shape() {
        let msg = ControlMessage::server(ControlBody::ClientConnect {
            server_timestamp: "2026-01-01T00:00:00Z".into(),
            version: "0.1.0".into(),
            session: snapshot(),
        })
        .with_topic(Some("uib".into()));
        let value = msg.to_value();
        assert_eq!(value["uibuilderCtrl"], "client connect");
        assert_eq!(value["from"], "server");
        assert_eq!(value["topic"], "uib");
        assert_eq!(value["version"], "0.1.0");
        assert_eq!(value["serverTimestamp"], "2026-01-01T00:00:00Z");
        assert_eq!(value["_socketId"], "conn1");
        assert_eq!(value["clientId"], "abc");
        assert_eq!(value["pageName"], "index.html");
        assert_eq!(value["reconnectCount"], 2);
    }

    #[test]
    fn client_disconnect_round_trip() {
        let msg = ControlMessage::server(ControlBody::ClientDisconnect {
            reason: "transport close".into(),
            session: snapshot(),
        });
        let back: ControlMessage = serde_json::from_value(msg.to_value()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn shutdown_is_minimal() {
        let value = ControlMessage::server(ControlBody::Shutdown {}).to_value();
        assert_eq!(value, json!({"uibuilderCtrl": "shutdown", "from": "server"}));
    }

    #[test]
    fn parses_client_logon() {
        let raw = json!({
            "uibuilderCtrl": "logon",
            "from": "client",
            "_auth": {"id": "bob", "password": "pw"},
        });
        let msg: ControlMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.from, Origin::Client);
        match msg.body {
            ControlBody::Logon { auth } => {
                assert_eq!(auth.id, "bob");
                assert_eq!(auth.credentials["password"], "pw");
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn parses_visibility() {
        let raw = json!({"uibuilderCtrl": "visibility", "from": "client", "isVisible": false});
        let msg: ControlMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.body, ControlBody::Visibility { is_visible: false });
        assert_eq!(msg.kind(), "visibility");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let raw = json!({"uibuilderCtrl": "make coffee", "from": "client"});
        assert!(serde_json::from_value::<ControlMessage>(raw).is_err());
    }

    #[test]
    fn channel_names() {
        assert_eq!(serde_json::to_value(Channel::Data).unwrap(), "data");
        assert_eq!(serde_json::to_value(Channel::Control).unwrap(), "control");
    }
}
