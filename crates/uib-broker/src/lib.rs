//! # uib-broker
//!
//! Server-side message broker. Each mounted instance owns an isolated
//! [`RoutingDomain`]; the [`Broker`] maps instance ids to domains and is the
//! only entry point the transport layer and the backend use.
//!
//! - [`broker`]: domain registry, connect/disconnect, inbound handling, fan-out
//! - [`domain`]: per-instance sessions, routing groups and counters
//! - [`connection`]: bounded per-client outbound queues
//! - [`envelope`]: outbound envelopes and recipients
//! - [`hooks`]: backend sink, credential validator and middleware traits
//! - [`metrics`]: metric names

#![deny(unsafe_code)]

pub mod broker;
pub mod connection;
pub mod domain;
pub mod envelope;
pub mod errors;
pub mod hooks;
pub mod metrics;

pub use broker::{Broker, ConnectRequest, DEFAULT_PAGE_NAME, normalize_payload};
pub use connection::{ClientConnection, Outbound};
pub use domain::{DomainStats, InstanceConfig, RoutingDomain};
pub use envelope::{OutboundEnvelope, Recipient, client_group, page_group};
pub use errors::{BrokerError, Result};
pub use hooks::{
    BackendMessage, BackendSink, ChannelSink, ConnectionMiddleware, HookError, InstanceHooks,
    OutboundMiddleware,
};
