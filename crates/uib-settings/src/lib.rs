//! # uib-settings
//!
//! Gateway configuration loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: `~/.uibuilder/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `UIB_*` overrides (highest priority)
//!
//! There is no process-wide settings singleton: the binary loads a value
//! once and hands it to whatever constructs the broker and server.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = GatewaySettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.ping_interval_ms, 25_000);
        assert_eq!(settings.server.ping_timeout_ms, 20_000);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.dev_mode);
        assert!(settings.instances.is_empty());
        assert!(settings.validate().is_ok());
    }
}
