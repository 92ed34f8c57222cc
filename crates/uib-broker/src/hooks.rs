//! Hooks injected when an instance is created.
//!
//! The broker owns no application logic. What happens to inbound messages,
//! who may connect and how outbound envelopes are filtered are decided by
//! the trait objects in [`InstanceHooks`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uib_auth::{CredentialValidator, DenyAll};
use uib_core::{ClientSessionSnapshot, ConnectionId, ControlMessage, InstanceId};

use crate::envelope::OutboundEnvelope;

/// Failure reported by a hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Create a hook error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A message handed to the backend consumer.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendMessage {
    /// Normalized data message from a client (always carries `_socketId`).
    Data(Value),
    /// Control message, server- or client-originated.
    Control {
        /// The control message.
        message: ControlMessage,
        /// Connection it concerns, when there is one.
        connection_id: Option<ConnectionId>,
    },
}

/// Receives everything clients send to an instance.
pub trait BackendSink: Send + Sync {
    /// Deliver one message. Must not block.
    fn deliver(&self, instance: &InstanceId, message: BackendMessage);
}

/// Sink that forwards into an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(InstanceId, BackendMessage)>,
}

impl ChannelSink {
    /// Create a sink and the receiver the backend reads from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(InstanceId, BackendMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl BackendSink for ChannelSink {
    fn deliver(&self, instance: &InstanceId, message: BackendMessage) {
        let _ = self.tx.send((instance.clone(), message));
    }
}

/// Runs once per connection before the session is established.
#[async_trait]
pub trait ConnectionMiddleware: Send + Sync {
    /// Accept or reject the connection.
    async fn on_connect(&self, session: &ClientSessionSnapshot) -> Result<(), HookError>;
}

/// Runs once per delivery before an envelope reaches a client.
pub trait OutboundMiddleware: Send + Sync {
    /// Return the (possibly changed) envelope, or `None` to veto it.
    fn process(
        &self,
        envelope: OutboundEnvelope,
        session: &ClientSessionSnapshot,
    ) -> Result<Option<OutboundEnvelope>, HookError>;
}

/// The hook set of one instance.
#[derive(Clone)]
pub struct InstanceHooks {
    /// Backend consumer.
    pub sink: Arc<dyn BackendSink>,
    /// Logon credential check.
    pub validator: Arc<dyn CredentialValidator>,
    /// Optional per-connection gate.
    pub connection_middleware: Option<Arc<dyn ConnectionMiddleware>>,
    /// Optional per-delivery filter.
    pub outbound_middleware: Option<Arc<dyn OutboundMiddleware>>,
}

impl InstanceHooks {
    /// Hooks with the given sink, a validator that rejects every logon and
    /// no middleware.
    pub fn new(sink: Arc<dyn BackendSink>) -> Self {
        Self {
            sink,
            validator: Arc::new(DenyAll),
            connection_middleware: None,
            outbound_middleware: None,
        }
    }

    /// Set the credential validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn CredentialValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Set the connection middleware.
    #[must_use]
    pub fn with_connection_middleware(mut self, middleware: Arc<dyn ConnectionMiddleware>) -> Self {
        self.connection_middleware = Some(middleware);
        self
    }

    /// Set the outbound middleware.
    #[must_use]
    pub fn with_outbound_middleware(mut self, middleware: Arc<dyn OutboundMiddleware>) -> Self {
        self.outbound_middleware = Some(middleware);
        self
    }
}

impl std::fmt::Debug for InstanceHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHooks")
            .field("connection_middleware", &self.connection_middleware.is_some())
            .field("outbound_middleware", &self.outbound_middleware.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        let id = InstanceId::parse("myapp").unwrap();
        sink.deliver(&id, BackendMessage::Data(json!({"payload": 1})));
        let (got_id, msg) = rx.recv().await.unwrap();
        assert_eq!(got_id, id);
        assert_eq!(msg, BackendMessage::Data(json!({"payload": 1})));
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.deliver(
            &InstanceId::parse("myapp").unwrap(),
            BackendMessage::Data(json!(1)),
        );
    }

    #[test]
    fn hook_error_display() {
        assert_eq!(HookError::new("nope").to_string(), "nope");
    }
}
