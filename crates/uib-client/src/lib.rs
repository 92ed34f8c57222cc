//! # uib-client
//!
//! Resilient client side of a uibuilder connection. A
//! [`ConnectionManager`] keeps one logical connection to one instance open
//! across network loss: it picks a transport, buffers outbound messages,
//! watches the server heartbeat and reconnects with jittered exponential
//! backoff.
//!
//! - [`manager`]: the actor, its handle and the connect loop
//! - [`transport`]: the [`Connector`] seam and transport ordering
//! - [`ws`]: the WebSocket connector
//! - [`queue`]: ordered outbound buffer with partial flush
//! - [`backoff`]: reconnect attempt counter
//! - [`watchdog`]: coarse staleness check
//! - [`events`]: typed events and status snapshots
//! - [`config`]: manager settings
//! - [`errors`]: client error type

#![deny(unsafe_code)]

pub mod backoff;
pub mod config;
pub mod errors;
pub mod events;
pub mod manager;
pub mod queue;
pub mod transport;
pub mod watchdog;
pub mod ws;

pub use backoff::BackoffState;
pub use config::{ClientConfig, WatchdogPolicy};
pub use errors::{ClientError, Result};
pub use events::{ClientEvent, ClientStatus, ReadyState};
pub use manager::{ConnectionHandle, ConnectionManager};
pub use queue::OutboundQueue;
pub use transport::{ConnectParams, Connector, FrameSink, FrameStream, Link, TransportKind, transport_order};
pub use watchdog::{Watchdog, WatchdogVerdict};
pub use ws::WsConnector;
