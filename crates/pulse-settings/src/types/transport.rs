//! Reconnect settings shared by the stream and socket clients.

use std::time::Duration;

use pulse_core::BackoffPolicy;
use pulse_core::backoff::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS,
};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Backoff and timeout tuning for one transport client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Delay before the first reconnect, in ms.
    pub base_delay_ms: u64,
    /// Upper bound for any reconnect delay, in ms.
    pub max_delay_ms: u64,
    /// Symmetric jitter range, 0.0–1.0 (0 disables jitter).
    pub jitter_factor: f64,
    /// Consecutive failures after which reconnecting stops.
    pub max_reconnect_attempts: u32,
    /// Timeout for opening one physical connection, in ms.
    pub connect_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: 0.0,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout_ms: 10_000,
        }
    }
}

impl TransportSettings {
    /// Backoff policy described by these settings.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay_ms, self.max_delay_ms).with_jitter(self.jitter_factor)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn validate(&self, section: &str) -> Result<()> {
        self.backoff()
            .validate()
            .map_err(|e| SettingsError::InvalidValue(format!("{section}: {e}")))?;
        if self.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(format!(
                "{section}.connectTimeoutMs must be greater than zero"
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backoff_law() {
        let settings = TransportSettings::default();
        let policy = settings.backoff();
        assert_eq!(policy.delay_ms(0), 1000);
        assert_eq!(policy.delay_ms(5), 30_000);
        assert_eq!(settings.max_reconnect_attempts, 10);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: TransportSettings =
            serde_json::from_str(r#"{"maxReconnectAttempts": 3}"#).unwrap();
        assert_eq!(settings.max_reconnect_attempts, 3);
        assert_eq!(settings.base_delay_ms, 1000);
        assert_eq!(settings.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn invalid_backoff_names_section() {
        let settings = TransportSettings {
            max_delay_ms: 10,
            ..TransportSettings::default()
        };
        let err = settings.validate("socket").unwrap_err();
        assert!(err.to_string().contains("socket: invalid maxDelayMs"));
    }

    #[test]
    fn zero_connect_timeout_rejected() {
        let settings = TransportSettings {
            connect_timeout_ms: 0,
            ..TransportSettings::default()
        };
        assert!(settings.validate("stream").is_err());
    }
}
