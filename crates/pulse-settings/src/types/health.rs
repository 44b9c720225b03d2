//! Health monitor and circuit breaker settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// One monitored endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSettings {
    /// Stable identifier reported in health snapshots.
    pub id: String,
    /// Path probed with `GET`, joined onto `api.baseUrl`. Absolute URLs are used as-is.
    pub path: String,
}

/// Health monitor and circuit breaker tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthSettings {
    /// Interval between probe passes, in ms.
    pub interval_ms: u64,
    /// Timeout for a single probe, in ms.
    pub probe_timeout_ms: u64,
    /// Successful probes slower than this are reported as degraded, in ms.
    pub degraded_latency_ms: u64,
    /// Consecutive failures that open an endpoint's breaker.
    pub failure_threshold: u32,
    /// Time an open breaker waits before allowing a trial probe, in ms.
    pub cooldown_ms: u64,
    /// Endpoints to probe.
    pub endpoints: Vec<EndpointSettings>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            probe_timeout_ms: 5000,
            degraded_latency_ms: 1000,
            failure_threshold: 3,
            cooldown_ms: 30_000,
            endpoints: vec![EndpointSettings {
                id: "api".to_string(),
                path: "/health".to_string(),
            }],
        }
    }
}

impl HealthSettings {
    /// Probe interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Probe timeout as a [`Duration`].
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Degraded-latency threshold as a [`Duration`].
    pub fn degraded_latency(&self) -> Duration {
        Duration::from_millis(self.degraded_latency_ms)
    }

    /// Breaker cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "health.intervalMs must be greater than zero".into(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "health.probeTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(SettingsError::InvalidValue(
                "health.failureThreshold must be at least 1".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.id.is_empty() {
                return Err(SettingsError::InvalidValue(
                    "health.endpoints: id must not be empty".into(),
                ));
            }
            if !seen.insert(endpoint.id.as_str()) {
                return Err(SettingsError::InvalidValue(format!(
                    "health.endpoints: duplicate id {}",
                    endpoint.id
                )));
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
