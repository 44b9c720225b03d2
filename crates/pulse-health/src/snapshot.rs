//! Health snapshots.
//!
//! [`SystemHealth`] is rebuilt from scratch after every probe pass and
//! handed out behind an `Arc`; nothing mutates a published snapshot.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use pulse_core::EndpointId;
use serde::{Deserialize, Serialize};

use crate::circuit::{BreakerState, CircuitState};

/// Health of one endpoint or of the whole system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Answering within the latency budget.
    #[default]
    Healthy,
    /// Answering, but slowly.
    Degraded,
    /// Not answering.
    Down,
}

impl HealthStatus {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the latest probe of one endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointHealth {
    /// Endpoint probed.
    pub id: EndpointId,
    /// Derived status.
    pub status: HealthStatus,
    /// Round-trip time; absent when no probe was sent or it failed.
    pub response_time_ms: Option<u64>,
    /// Failure description, when down.
    pub error: Option<String>,
    /// When the probe finished.
    pub last_checked: DateTime<Utc>,
}

/// System-wide health view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    /// Aggregate status.
    pub status: HealthStatus,
    /// Latest probe result per endpoint.
    pub endpoints: BTreeMap<EndpointId, EndpointHealth>,
    /// Breaker state per endpoint.
    pub circuits: BTreeMap<EndpointId, CircuitState>,
    /// End of the most recent full pass; `None` before the first one.
    pub last_full_check: Option<DateTime<Utc>>,
}

impl SystemHealth {
    /// Snapshot served before any pass has completed.
    pub fn placeholder() -> Self {
        Self {
            status: HealthStatus::Healthy,
            endpoints: BTreeMap::new(),
            circuits: BTreeMap::new(),
            last_full_check: None,
        }
    }

    /// Snapshot with its status derived from `endpoints` and `circuits`.
    pub fn from_parts(
        endpoints: BTreeMap<EndpointId, EndpointHealth>,
        circuits: BTreeMap<EndpointId, CircuitState>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: aggregate(&endpoints, &circuits),
            endpoints,
            circuits,
            last_full_check: Some(checked_at),
        }
    }
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self::placeholder()
    }
}

/// Overall status.
///
/// Down when some endpoint is down behind an open breaker; degraded when any
/// endpoint is not healthy or any breaker is half-open; healthy otherwise.
pub fn aggregate(
    endpoints: &BTreeMap<EndpointId, EndpointHealth>,
    circuits: &BTreeMap<EndpointId, CircuitState>,
) -> HealthStatus {
    let breaker = |id: &EndpointId| circuits.get(id).map(|c| c.state);

    let down = endpoints
        .values()
        .any(|e| e.status == HealthStatus::Down && breaker(&e.id) == Some(BreakerState::Open));
    if down {
        return HealthStatus::Down;
    }

    let unhealthy = endpoints.values().any(|e| e.status != HealthStatus::Healthy);
    let half_open = circuits.values().any(|c| c.state == BreakerState::HalfOpen);
    if unhealthy || half_open {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
