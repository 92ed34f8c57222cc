//! Transport seam: what the manager needs from a physical connection.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use serde::{Deserialize, Serialize};
use uib_core::{ClientId, Frame, TransportError};

/// Kinds of physical transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent full-duplex WebSocket.
    WebSocket,
    /// Request/response long polling.
    Polling,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => f.write_str("websocket"),
            Self::Polling => f.write_str("polling"),
        }
    }
}

/// Outbound half of a link.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a link. Ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An established physical connection.
pub struct Link {
    /// Frames to the server.
    pub sink: FrameSink,
    /// Frames from the server.
    pub stream: FrameStream,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// What the manager tells the connector about this attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectParams {
    /// Durable client id to present (as the cookie).
    pub client_id: Option<ClientId>,
    /// Page name.
    pub page_name: Option<String>,
    /// Tab id.
    pub tab_id: Option<String>,
    /// Failed cycles since the last open.
    pub reconnect: u32,
}

/// Opens links.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link of `kind`. The server's `open` frame is read by the
    /// manager, not here.
    async fn connect(&self, kind: TransportKind, params: &ConnectParams) -> Result<Link, TransportError>;
}

/// Order in which to try transports.
///
/// With `remember_upgrade`, a previously successful transport that is still
/// configured moves to the front.
pub fn transport_order(
    configured: &[TransportKind],
    prior: Option<TransportKind>,
    remember_upgrade: bool,
) -> Vec<TransportKind> {
    let mut order = configured.to_vec();
    if let Some(prior) = prior.filter(|_| remember_upgrade) {
        if let Some(pos) = order.iter().position(|k| *k == prior) {
            let kind = order.remove(pos);
            order.insert(0, kind);
        }
    }
    order
}
