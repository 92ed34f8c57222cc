//! # uib-gateway
//!
//! Gateway binary: loads settings, mounts every configured instance on one
//! broker and serves them over HTTP/WebSocket until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uib_broker::{BackendMessage, Broker, ChannelSink, InstanceConfig, InstanceHooks};
use uib_core::InstanceId;
use uib_server::{GatewayServer, ServerConfig};
use uib_settings::{GatewaySettings, InstanceSettings};

/// uibuilder gateway.
#[derive(Parser, Debug)]
#[command(name = "uib-gateway", about = "Multi-instance uibuilder message gateway")]
struct Cli {
    /// Settings file (defaults to `~/.uibuilder/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long, default_value_t = false)]
    log_json: bool,

    /// Allow logon over insecure connections.
    #[arg(long, default_value_t = false)]
    dev_mode: bool,
}

impl Cli {
    fn apply(&self, settings: &mut GatewaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
        if self.dev_mode {
            settings.dev_mode = true;
        }
    }
}

/// Routing-domain configuration for one configured instance.
fn instance_config(instance: &InstanceSettings, dev_mode: bool) -> Result<InstanceConfig> {
    let id = InstanceId::parse(&instance.id)
        .with_context(|| format!("invalid instance id '{}'", instance.id))?;
    let mut config = InstanceConfig::new(id).with_dev_mode(dev_mode);
    if let Some(topic) = &instance.topic {
        config = config.with_topic(topic.clone());
    }
    if instance.security.enabled {
        let secret = instance.resolved_secret();
        if secret.is_none() {
            warn!(
                instance = %instance.id,
                env = %instance.secret_env_var(),
                "security enabled without a signing secret, every logon will fail"
            );
        }
        config = config.with_security(
            secret,
            Duration::from_secs(instance.security.session_length_secs),
            instance.security.check_ip,
        );
    }
    Ok(config)
}

/// Create a routing domain for every configured instance.
fn mount_instances(broker: &Broker, settings: &GatewaySettings, sink: &ChannelSink) -> Result<usize> {
    for instance in &settings.instances {
        let config = instance_config(instance, settings.dev_mode)?;
        let hooks = InstanceHooks::new(Arc::new(sink.clone()));
        let _ = broker
            .create_domain(config, hooks)
            .with_context(|| format!("failed to mount instance '{}'", instance.id))?;
    }
    Ok(settings.instances.len())
}

/// Stand-in backend consumer: logs what clients send.
async fn log_backend(mut rx: mpsc::UnboundedReceiver<(InstanceId, BackendMessage)>) {
    while let Some((instance, message)) = rx.recv().await {
        match message {
            BackendMessage::Data(payload) => {
                debug!(instance = %instance, %payload, "client message");
            }
            BackendMessage::Control {
                message,
                connection_id,
            } => {
                debug!(
                    instance = %instance,
                    kind = message.kind(),
                    conn_id = ?connection_id,
                    "control message"
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(uib_settings::settings_path);
    let mut settings = uib_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    uib_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    info!(path = %path.display(), instances = settings.instances.len(), "settings loaded");

    let broker = Arc::new(Broker::new());
    let (sink, backend_rx) = ChannelSink::new();
    let mounted = mount_instances(&broker, &settings, &sink)?;
    if mounted == 0 {
        warn!("no instances configured, every connection will be refused");
    }
    let backend = tokio::spawn(log_backend(backend_rx));

    let mut server = GatewayServer::new(ServerConfig::from(&settings.server), Arc::clone(&broker));
    match uib_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder not installed"),
    }

    let (addr, handle) = server.listen().await.context("failed to bind listener")?;
    info!("uibuilder gateway listening on http://{addr} ({mounted} instances)");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    server
        .shutdown()
        .graceful_shutdown(&broker, vec![handle], None)
        .await;
    backend.abort();

    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uib_settings::SecuritySettings;

    fn instance(id: &str) -> InstanceSettings {
        InstanceSettings {
            id: id.into(),
            ..InstanceSettings::default()
        }
    }

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["uib-gateway"]);
        let mut settings = GatewaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 3000);
        assert!(!settings.dev_mode);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "uib-gateway",
            "--port",
            "0",
            "--host",
            "0.0.0.0",
            "--log-level",
            "debug",
            "--log-json",
            "--dev-mode",
        ]);
        let mut settings = GatewaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
        assert!(settings.dev_mode);
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["uib-gateway", "--config", "/tmp/uib.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/uib.json")));
    }

    #[test]
    fn instance_config_carries_topic_and_security() {
        let settings = InstanceSettings {
            topic: Some("t".into()),
            security: SecuritySettings {
                enabled: true,
                secret: Some("s3cret".into()),
                ..SecuritySettings::default()
            },
            ..instance("myapp")
        };
        let config = instance_config(&settings, false).unwrap();
        assert_eq!(config.id.as_str(), "myapp");
        assert_eq!(config.topic.as_deref(), Some("t"));
        assert!(config.security_enabled());
    }

    #[test]
    fn instance_config_rejects_bad_id() {
        assert!(instance_config(&instance("../x"), false).is_err());
    }

    #[test]
    fn mounts_every_instance() {
        let broker = Broker::new();
        let (sink, _rx) = ChannelSink::new();
        let settings = GatewaySettings {
            instances: vec![instance("a"), instance("b")],
            ..GatewaySettings::default()
        };
        assert_eq!(mount_instances(&broker, &settings, &sink).unwrap(), 2);
        assert_eq!(broker.instances().len(), 2);
        assert!(mount_instances(&broker, &settings, &sink).is_err());
    }

    #[test]
    fn settings_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"instances": [{"id": "myapp"}], "server": {"port": 4100}}"#).unwrap();
        let settings = uib_settings::load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.port, 4100);
        assert_eq!(settings.instances[0].id, "myapp");
    }
}
