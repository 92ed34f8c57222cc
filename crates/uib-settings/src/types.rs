//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields keep their default.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uib_core::InstanceId;

use crate::errors::{Result, SettingsError};

/// Root settings for the gateway.
///
/// ```json
/// {
///   "server": { "port": 3000 },
///   "instances": [
///     { "id": "myapp", "topic": "myapp", "security": { "enabled": true } }
///   ]
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// HTTP/WebSocket server settings.
    pub server: ServerSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Development mode: permits logon over insecure connections.
    pub dev_mode: bool,
    /// Instances to mount at startup.
    pub instances: Vec<InstanceSettings>,
}

impl GatewaySettings {
    /// Check every instance id and reject duplicates.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for instance in &self.instances {
            let id = InstanceId::parse(&instance.id)?;
            if !seen.insert(id) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate instance id '{}'",
                    instance.id
                )));
            }
        }
        if self.server.ping_interval_ms == 0 || self.server.ping_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "ping interval and timeout must be positive".into(),
            ));
        }
        if self.server.client_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "client queue capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP/WebSocket server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 = auto-assign).
    pub port: u16,
    /// Interval between server pings.
    pub ping_interval_ms: u64,
    /// How long after a ping the server waits for a pong.
    pub ping_timeout_ms: u64,
    /// Largest batch written to a client in one frame.
    pub max_payload_bytes: usize,
    /// Per-client outbound queue depth before messages are dropped.
    pub client_queue_capacity: usize,
    /// Trust `X-Forwarded-Proto` / `X-Forwarded-For` from a reverse proxy.
    pub trust_forwarded_proto: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
            max_payload_bytes: 1_000_000,
            client_queue_capacity: 256,
            trust_forwarded_proto: false,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// One instance to mount.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceSettings {
    /// Instance id (URL path segment).
    pub id: String,
    /// Topic stamped on server-originated control messages.
    pub topic: Option<String>,
    /// Per-instance security.
    pub security: SecuritySettings,
}

impl InstanceSettings {
    /// Name of the env var consulted when `security.secret` is unset.
    pub fn secret_env_var(&self) -> String {
        let suffix: String = self
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("UIB_SECRET_{suffix}")
    }

    /// Signing secret from the file or the per-instance env var.
    pub fn resolved_secret(&self) -> Option<String> {
        self.security
            .secret
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var(self.secret_env_var()).ok().filter(|s| !s.is_empty()))
    }
}

/// Per-instance security settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    /// Require logon and validate tokens on every message.
    pub enabled: bool,
    /// Token signing secret.
    pub secret: Option<String>,
    /// Session length in seconds.
    pub session_length_secs: u64,
    /// Require the token's embedded IP to match the connection.
    pub check_ip: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: None,
            session_length_secs: 43_200,
            check_ip: false,
        }
    }
}
