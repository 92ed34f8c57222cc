//! Typed events and observable status.

use std::time::Duration;

use serde_json::Value;
use uib_core::{AuthToken, ClientId, ConnectionId, ControlMessage, TransportError};

use crate::transport::TransportKind;

/// Lifecycle state of the logical connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadyState {
    /// No link and none being opened.
    #[default]
    Closed,
    /// A connect attempt is in flight.
    Opening,
    /// Handshake received; traffic flows.
    Open,
    /// Shutting the link down.
    Closing,
}

/// Events delivered to the application.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// Handshake completed.
    Connected {
        /// Server-assigned connection id.
        connection_id: ConnectionId,
        /// Durable client id.
        client_id: ClientId,
        /// Transport that succeeded.
        transport: TransportKind,
    },
    /// The link dropped without the application asking.
    Disconnected {
        /// Why.
        reason: String,
    },
    /// A reconnect is scheduled.
    Reconnecting {
        /// Failed cycles so far, including this one.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// Reconnect attempts are exhausted; the manager stays closed.
    ReconnectFailed,
    /// The application closed the connection.
    Closed,
    /// Data-channel payload.
    Message {
        /// Payload as sent by the server.
        payload: Value,
    },
    /// Control-channel message.
    Control(ControlMessage),
    /// A connect attempt or the live link failed.
    TransportError(TransportError),
}

/// Snapshot of the manager's state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientStatus {
    /// Current ready state.
    pub ready_state: ReadyState,
    /// Whether a reconnect is pending or in progress.
    pub reconnecting: bool,
    /// Failed cycles since the last successful open.
    pub attempts: u32,
    /// Current connection id, while open.
    pub connection_id: Option<ConnectionId>,
    /// Durable client id, once known.
    pub client_id: Option<ClientId>,
    /// Transport that last completed a handshake.
    pub prior_successful_transport: Option<TransportKind>,
    /// Last auth state received on the control channel.
    pub auth: AuthToken,
    /// Messages waiting to be written.
    pub queued: usize,
    /// Whether the host reports network connectivity.
    pub online: bool,
}
