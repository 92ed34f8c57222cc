//! # uib-server
//!
//! Axum transport for the uibuilder broker. Each mounted instance is
//! reachable at `GET /{instance}/ws`; the session loop turns broker queues
//! into packed frames and inbound frames into broker calls.
//!
//! - [`server`]: router, shared state, listener
//! - [`websocket`]: upgrade handler, session loop, heartbeat, batching
//! - [`shutdown`]: graceful shutdown
//! - [`health`] and [`metrics`]: operational endpoints

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, GatewayServer};
pub use shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, ShutdownCoordinator};
pub use websocket::handler::{CLIENT_ID_COOKIE, ConnectQuery};
