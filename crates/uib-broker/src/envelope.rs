//! Outbound envelopes and their recipients.

use serde_json::Value;
use uib_core::{Channel, ClientId, ConnectionId, ControlMessage};

/// Group every connection of one durable client joins.
pub fn client_group(client_id: &ClientId) -> String {
    format!("clientId:{client_id}")
}

/// Group every connection loaded from one page joins.
pub fn page_group(page_name: &str) -> String {
    format!("pageName:{page_name}")
}

/// Who an envelope is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// Every connected session of the domain.
    All,
    /// Exactly one connection (zero recipients if it is gone).
    Connection(ConnectionId),
    /// Members of a routing group (`clientId:<id>` or `pageName:<name>`).
    Group(String),
}

/// A unit of outbound traffic.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundEnvelope {
    /// Message payload.
    pub payload: Value,
    /// Target.
    pub recipient: Recipient,
    /// Channel the payload travels on.
    pub channel: Channel,
}

impl OutboundEnvelope {
    /// Data broadcast to every session.
    pub fn broadcast(payload: Value) -> Self {
        Self {
            payload,
            recipient: Recipient::All,
            channel: Channel::Data,
        }
    }

    /// Data for one connection.
    pub fn to_connection(connection_id: ConnectionId, payload: Value) -> Self {
        Self {
            payload,
            recipient: Recipient::Connection(connection_id),
            channel: Channel::Data,
        }
    }

    /// Data for a routing group.
    pub fn to_group(group: impl Into<String>, payload: Value) -> Self {
        Self {
            payload,
            recipient: Recipient::Group(group.into()),
            channel: Channel::Data,
        }
    }

    /// Control message broadcast to every session.
    pub fn control(message: &ControlMessage) -> Self {
        Self {
            payload: message.to_value(),
            recipient: Recipient::All,
            channel: Channel::Control,
        }
    }

    /// Route a backend message: a string `_socketId` makes it unicast,
    /// otherwise it is broadcast.
    pub fn routed(payload: Value) -> Self {
        let target = payload
            .get("_socketId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ConnectionId::from);
        match target {
            Some(id) => Self::to_connection(id, payload),
            None => Self::broadcast(payload),
        }
    }

    /// Replace the recipient.
    #[must_use]
    pub fn with_recipient(mut self, recipient: Recipient) -> Self {
        self.recipient = recipient;
        self
    }

    /// Target connection when unicast.
    pub fn target_connection_id(&self) -> Option<&ConnectionId> {
        match &self.recipient {
            Recipient::Connection(id) => Some(id),
            _ => None,
        }
    }
}
