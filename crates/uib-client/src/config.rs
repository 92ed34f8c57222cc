//! Connection manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uib_core::{BackoffPolicy, ClientId};

use crate::transport::TransportKind;

/// Watchdog timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchdogPolicy {
    /// First check delay.
    pub base_delay_ms: u64,
    /// Delay multiplier after every check that found the link down.
    pub factor: f64,
    /// Ceiling for the stretched delay.
    pub max_delay_ms: u64,
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            factor: 1.5,
            max_delay_ms: 60_000,
        }
    }
}

/// Settings for one logical connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Transports to try, in order of preference.
    pub transports: Vec<TransportKind>,
    /// Try the last transport that worked first on later connects.
    pub remember_upgrade: bool,
    /// Reconnect delay parameters.
    pub backoff: BackoffPolicy,
    /// Give up after this many failed cycles. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Per-transport connect and handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Secondary liveness check timing.
    pub watchdog: WatchdogPolicy,
    /// Page name reported on connect.
    pub page_name: Option<String>,
    /// Tab id reported on connect.
    pub tab_id: Option<String>,
    /// Client id to present before the server has assigned one.
    pub client_id: Option<ClientId>,
}

impl ClientConfig {
    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transports: vec![TransportKind::WebSocket],
            remember_upgrade: true,
            backoff: BackoffPolicy::default(),
            max_reconnect_attempts: None,
            connect_timeout_ms: 10_000,
            watchdog: WatchdogPolicy::default(),
            page_name: None,
            tab_id: None,
            client_id: None,
        }
    }
}
