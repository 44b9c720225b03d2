//! Per-endpoint circuit breakers.
//!
//! - Closed: probes flow; `failure_threshold` consecutive failures open the breaker
//! - Open: probes are rejected until `cooldown` has elapsed; the first request
//!   after that moves the breaker to half-open and is still rejected
//! - Half-open: every request is a trial; success closes, failure reopens.
//!   A trial that never reports leaves the breaker half-open for the next one
//!
//! Cooldown is measured on the Tokio clock so paused-time tests can drive it.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_core::EndpointId;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default consecutive failures that open a breaker.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default time an open breaker waits before admitting a trial probe.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Breaker tuning, shared by every endpoint in a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time spent open before the next probe becomes a trial.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Breaker position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Probes flow normally.
    Closed,
    /// Probes are bypassed.
    Open,
    /// One trial probe decides the next state.
    HalfOpen,
}

impl BreakerState {
    /// Lowercase name used in logs and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of one endpoint's breaker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitState {
    /// Endpoint the breaker guards.
    pub endpoint: EndpointId,
    /// Current position.
    pub state: BreakerState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When the breaker entered `state`.
    pub entered_at: DateTime<Utc>,
}

/// Answer to [`CircuitBreakerRegistry::allow_probe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbePermit {
    /// Breaker closed; probe normally.
    Allowed,
    /// Half-open trial; its outcome decides the breaker.
    Trial,
    /// Breaker open, or just moved to half-open; do not probe.
    Rejected,
}

struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    entered_at: DateTime<Utc>,
    since: Instant,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            entered_at: Utc::now(),
            since: Instant::now(),
        }
    }

    fn enter(&mut self, state: BreakerState) {
        self.state = state;
        self.entered_at = Utc::now();
        self.since = Instant::now();
    }

    fn view(&self, endpoint: &EndpointId) -> CircuitState {
        CircuitState {
            endpoint: endpoint.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            entered_at: self.entered_at,
        }
    }
}

/// Circuit breakers keyed by endpoint.
///
/// Breakers are created closed on first use.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<BTreeMap<EndpointId, Breaker>>,
}

impl CircuitBreakerRegistry {
    /// Empty registry.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Tuning in effect.
    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Ask whether `endpoint` may be probed now.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open but
    /// still rejects, so the half-open state is observable before any trial.
    /// A half-open breaker answers [`ProbePermit::Trial`] to each request;
    /// callers issue at most one request per endpoint per pass.
    pub fn allow_probe(&self, endpoint: &EndpointId) -> ProbePermit {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(endpoint.clone())
            .or_insert_with(Breaker::new);
        match breaker.state {
            BreakerState::Closed => ProbePermit::Allowed,
            BreakerState::Open => {
                if breaker.since.elapsed() < self.config.cooldown {
                    return ProbePermit::Rejected;
                }
                breaker.enter(BreakerState::HalfOpen);
                info!(endpoint = %endpoint, "circuit breaker half-open, trial on next check");
                ProbePermit::Rejected
            }
            BreakerState::HalfOpen => ProbePermit::Trial,
        }
    }

    /// Record a successful probe.
    pub fn record_success(&self, endpoint: &EndpointId) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(endpoint.clone())
            .or_insert_with(Breaker::new);
        match breaker.state {
            BreakerState::Closed => breaker.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                breaker.consecutive_failures = 0;
                breaker.enter(BreakerState::Closed);
                info!(endpoint = %endpoint, "circuit breaker closed after successful trial");
            }
            BreakerState::Open => {
                debug!(endpoint = %endpoint, "ignoring success while circuit open");
            }
        }
    }

    /// Record a failed probe.
    pub fn record_failure(&self, endpoint: &EndpointId) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(endpoint.clone())
            .or_insert_with(Breaker::new);
        match breaker.state {
            BreakerState::Closed => {
                breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    breaker.enter(BreakerState::Open);
                    warn!(
                        endpoint = %endpoint,
                        failures = breaker.consecutive_failures,
                        cooldown_ms = u64::try_from(self.config.cooldown.as_millis()).unwrap_or(u64::MAX),
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
                breaker.enter(BreakerState::Open);
                warn!(endpoint = %endpoint, "trial probe failed, circuit breaker reopened");
            }
            BreakerState::Open => {
                debug!(endpoint = %endpoint, "ignoring failure while circuit open");
            }
        }
    }

    /// Current view of `endpoint`'s breaker, if it has been used.
    pub fn state(&self, endpoint: &EndpointId) -> Option<CircuitState> {
        self.breakers.lock().get(endpoint).map(|b| b.view(endpoint))
    }

    /// Views of every known breaker.
    pub fn snapshot(&self) -> BTreeMap<EndpointId, CircuitState> {
        self.breakers
            .lock()
            .iter()
            .map(|(id, b)| (id.clone(), b.view(id)))
            .collect()
    }

    /// Force `endpoint` back to closed with a zero failure count.
    pub fn reset(&self, endpoint: &EndpointId) {
        let mut breakers = self.breakers.lock();
        if let Some(breaker) = breakers.get_mut(endpoint) {
            breaker.consecutive_failures = 0;
            breaker.enter(BreakerState::Closed);
            info!(endpoint = %endpoint, "circuit breaker reset");
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
