//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `UIB_*` environment overrides (highest priority)
//! 4. Validate instance ids

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::GatewaySettings;

/// Resolve the default settings path (`~/.uibuilder/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".uibuilder").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid instance id
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Overlay `source` onto `target`.
///
/// Nested objects merge key by key, `null` in `source` leaves the target
/// value alone, and anything else in `source` wins outright.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `UIB_*` environment overrides.
///
/// Numbers outside their accepted range and unrecognised booleans are
/// logged and skipped; the file or default value stays in place.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    let server = &mut settings.server;
    if let Some(host) = env_value("UIB_HOST") {
        server.host = host;
    }
    override_from_env(&mut server.port, "UIB_PORT", |v| in_range(v, 0..=u16::MAX));
    override_from_env(&mut server.ping_interval_ms, "UIB_PING_INTERVAL_MS", |v| {
        in_range(v, 1_000..=600_000)
    });
    override_from_env(&mut server.ping_timeout_ms, "UIB_PING_TIMEOUT_MS", |v| {
        in_range(v, 1_000..=600_000)
    });
    override_from_env(&mut server.max_payload_bytes, "UIB_MAX_PAYLOAD_BYTES", |v| {
        in_range(v, 1024..=1 << 30)
    });
    override_from_env(&mut server.client_queue_capacity, "UIB_CLIENT_QUEUE", |v| {
        in_range(v, 1..=1_000_000)
    });
    override_from_env(&mut server.trust_forwarded_proto, "UIB_TRUST_FORWARDED", parse_flag);
    if let Some(level) = env_value("UIB_LOG_LEVEL") {
        settings.logging.level = level;
    }
    override_from_env(&mut settings.dev_mode, "UIB_DEV_MODE", parse_flag);
}

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    const ON: [&str; 4] = ["true", "1", "yes", "on"];
    const OFF: [&str; 4] = ["false", "0", "no", "off"];
    let raw = raw.trim();
    if ON.iter().any(|v| raw.eq_ignore_ascii_case(v)) {
        Some(true)
    } else if OFF.iter().any(|v| raw.eq_ignore_ascii_case(v)) {
        Some(false)
    } else {
        None
    }
}

/// Parse a number and accept it only inside `range`.
pub fn in_range<T>(raw: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim().parse().ok().filter(|n| range.contains(n))
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn override_from_env<T>(slot: &mut T, name: &str, parse: impl FnOnce(&str) -> Option<T>) {
    let Some(raw) = env_value(name) else {
        return;
    };
    match parse(&raw) {
        Some(value) => *slot = value,
        None => warn!(key = name, value = %raw, "ignoring unusable env override"),
    }
}
