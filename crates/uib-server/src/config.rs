//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uib_settings::ServerSettings;

/// Configuration for the gateway's HTTP/WebSocket listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between server pings in milliseconds.
    pub ping_interval_ms: u64,
    /// Grace period after a ping before a silent client is dropped.
    pub ping_timeout_ms: u64,
    /// Largest batch written in one frame. `None` disables packing limits.
    pub max_payload_bytes: Option<usize>,
    /// Per-client outbound queue depth.
    pub client_queue_capacity: usize,
    /// Honour `X-Forwarded-Proto` / `X-Forwarded-For` from a reverse proxy.
    /// Off by default: only enable behind a proxy that overwrites them.
    pub trust_forwarded_proto: bool,
}

impl ServerConfig {
    /// Ping cadence.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Ping grace period.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
            max_payload_bytes: Some(1_000_000),
            client_queue_capacity: 256,
            trust_forwarded_proto: false,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            ping_interval_ms: settings.ping_interval_ms,
            ping_timeout_ms: settings.ping_timeout_ms,
            max_payload_bytes: (settings.max_payload_bytes > 0).then_some(settings.max_payload_bytes),
            client_queue_capacity: settings.client_queue_capacity,
            trust_forwarded_proto: settings.trust_forwarded_proto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_zero() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn durations() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.ping_interval(), Duration::from_secs(25));
        assert_eq!(cfg.ping_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn from_settings() {
        let settings = ServerSettings {
            port: 4000,
            max_payload_bytes: 0,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.max_payload_bytes, None);
        assert_eq!(cfg.client_queue_capacity, 256);
        assert!(!cfg.trust_forwarded_proto);
    }

    #[test]
    fn forwarded_headers_untrusted_by_default() {
        assert!(!ServerConfig::default().trust_forwarded_proto);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("pingIntervalMs"));
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ping_timeout_ms, cfg.ping_timeout_ms);
    }
}
