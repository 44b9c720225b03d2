//! # pulse-settings
//!
//! Configuration management with layered sources for the Pulse console layer.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PulseSettings::default()`]
//! 2. **User file**: `~/.pulse/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PULSE_*` overrides (highest priority)
//!
//! There is no process-wide settings instance. The composition root loads a
//! [`PulseSettings`] once and hands the relevant sections to each component.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = PulseSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = PulseSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.stream.max_reconnect_attempts, 10);
        assert_eq!(settings.socket.base_delay_ms, 1000);
        assert_eq!(settings.socket.max_delay_ms, 30_000);
        assert_eq!(settings.health.interval_ms, 30_000);
        assert_eq!(settings.health.failure_threshold, 3);
    }
}
