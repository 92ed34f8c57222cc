//! Transport frames and payload packing.
//!
//! Every transport text frame is a JSON object tagged by `type`. The first
//! frame on a new connection is always [`Frame::Open`], which carries the
//! heartbeat parameters and the payload limit both sides pack against.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ClientId, ConnectionId};
use crate::protocol::{Channel, ControlMessage};

/// Fixed size added once per packed batch.
pub const BATCH_BASE_BYTES: usize = 1;

/// Fixed size added per packed message on top of its JSON length.
pub const PER_MESSAGE_OVERHEAD_BYTES: usize = 1;

/// One logical message on the data or control channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Channel the payload belongs to.
    pub channel: Channel,
    /// JSON payload.
    pub payload: Value,
    /// Present when the sender wants an [`Frame::Ack`] back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
}

impl WireMessage {
    /// A data-channel message.
    pub fn data(payload: Value) -> Self {
        Self {
            channel: Channel::Data,
            payload,
            ack_id: None,
        }
    }

    /// A control-channel message.
    pub fn control(message: &ControlMessage) -> Self {
        Self {
            channel: Channel::Control,
            payload: message.to_value(),
            ack_id: None,
        }
    }
}

/// A transport frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Handshake, first frame from the server.
    #[serde(rename_all = "camelCase")]
    Open {
        /// Id of this physical connection.
        connection_id: ConnectionId,
        /// Durable client id (echoes or replaces the cookie).
        client_id: ClientId,
        /// Server ping cadence.
        ping_interval_ms: u64,
        /// Grace period after a ping before the server gives up.
        ping_timeout_ms: u64,
        /// Largest batch the peer accepts, if limited.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_payload_bytes: Option<usize>,
    },
    /// Server heartbeat.
    Ping {},
    /// Client heartbeat reply.
    Pong {},
    /// A single message.
    Message(WireMessage),
    /// Several messages packed into one write.
    Batch {
        /// Messages in submission order.
        messages: Vec<WireMessage>,
    },
    /// Acknowledges a message that carried `ackId`.
    #[serde(rename_all = "camelCase")]
    Ack {
        /// The acknowledged id.
        ack_id: u64,
    },
    /// Orderly close with a reason.
    Close {
        /// Reason text.
        reason: String,
    },
}

impl Frame {
    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Wrap packed messages: one message stays a `message` frame.
    pub fn from_messages(mut messages: Vec<WireMessage>) -> Self {
        if messages.len() == 1 {
            if let Some(only) = messages.pop() {
                return Self::Message(only);
            }
        }
        Self::Batch { messages }
    }

    /// Flatten a data-bearing frame into its messages.
    pub fn into_messages(self) -> Vec<WireMessage> {
        match self {
            Self::Message(m) => vec![m],
            Self::Batch { messages } => messages,
            _ => Vec::new(),
        }
    }
}

/// Estimated wire size of a payload: UTF-8 length of its JSON encoding.
pub fn estimate_size(payload: &Value) -> usize {
    serde_json::to_string(payload).map_or(0, |s| s.len())
}

/// How many of the queued messages (given by estimated size, in order) go
/// into the next write.
///
/// Without a limit everything goes. With a limit, the largest prefix whose
/// cumulative size fits is taken, but the first message is always included
/// even if it alone exceeds the limit. Returns 0 only for an empty queue.
pub fn pack_prefix<I>(sizes: I, limit: Option<usize>) -> usize
where
    I: IntoIterator<Item = usize>,
{
    let Some(limit) = limit else {
        return sizes.into_iter().count();
    };
    let mut total = BATCH_BASE_BYTES;
    let mut count = 0;
    for size in sizes {
        total = total
            .saturating_add(size)
            .saturating_add(PER_MESSAGE_OVERHEAD_BYTES);
        if count > 0 && total > limit {
            break;
        }
        count += 1;
    }
    count
}
