//! Periodic health monitoring.
//!
//! [`HealthMonitor`] probes every endpoint concurrently, feeds each outcome
//! to its circuit breaker, rebuilds the [`SystemHealth`] snapshot and pushes
//! it to every listener. Probe failures never escape; they show up as `down`
//! endpoints and breaker failures.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use pulse_core::{EndpointId, Handler};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::circuit::{BreakerConfig, CircuitBreakerRegistry, ProbePermit};
use crate::errors::ProbeError;
use crate::probe::{Endpoint, HealthProbe, HttpProbe};
use crate::snapshot::{EndpointHealth, HealthStatus, SystemHealth};

/// Default time a probe may take before it counts as failed.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default latency above which a successful probe is `degraded`.
pub const DEFAULT_DEGRADED_LATENCY: Duration = Duration::from_millis(1000);

/// Default interval between periodic passes.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(30_000);

/// Probe classification and breaker tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// Successful probes slower than this are `degraded`.
    pub degraded_latency: Duration,
    /// Breaker tuning.
    pub breaker: BreakerConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            degraded_latency: DEFAULT_DEGRADED_LATENCY,
            breaker: BreakerConfig::default(),
        }
    }
}

struct Inner {
    config: MonitorConfig,
    endpoints: Vec<Endpoint>,
    probe: Arc<dyn HealthProbe>,
    breakers: CircuitBreakerRegistry,
    current: RwLock<Arc<SystemHealth>>,
    listeners: Mutex<Vec<(u64, Handler<SystemHealth>)>>,
    next_listener: AtomicU64,
    pass: tokio::sync::Mutex<()>,
}

struct Periodic {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Probes endpoints and publishes [`SystemHealth`] snapshots.
///
/// Owns its breaker registry; consumers only read snapshots. Dropping the
/// monitor stops periodic checking.
pub struct HealthMonitor {
    inner: Arc<Inner>,
    periodic: Mutex<Option<Periodic>>,
}

impl HealthMonitor {
    /// Monitor using [`HttpProbe`].
    pub fn new(config: MonitorConfig, endpoints: Vec<Endpoint>) -> Self {
        Self::with_probe(config, endpoints, Arc::new(HttpProbe::default()))
    }

    /// Monitor using a custom probe.
    pub fn with_probe(
        config: MonitorConfig,
        endpoints: Vec<Endpoint>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                breakers: CircuitBreakerRegistry::new(config.breaker),
                config,
                endpoints,
                probe,
                current: RwLock::new(Arc::new(SystemHealth::placeholder())),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                pass: tokio::sync::Mutex::new(()),
            }),
            periodic: Mutex::new(None),
        }
    }

    /// Endpoints being monitored.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.inner.endpoints
    }

    /// Probe every endpoint each `interval`, starting now.
    ///
    /// Calling again while running does nothing. Must be called from within
    /// a Tokio runtime.
    pub fn start_periodic_check(&self, interval: Duration) {
        let mut periodic = self.periodic.lock();
        if periodic.as_ref().is_some_and(|p| !p.handle.is_finished()) {
            debug!("health monitor already running");
            return;
        }

        let interval = interval.max(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_periodic(self.inner.clone(), interval, cancel.clone()));
        *periodic = Some(Periodic { cancel, handle });
        info!(
            interval_ms = millis(interval),
            endpoints = self.inner.endpoints.len(),
            "health monitor started"
        );
    }

    /// Stop periodic checking. A pass in progress is abandoned.
    pub fn stop(&self) {
        if let Some(periodic) = self.periodic.lock().take() {
            periodic.cancel.cancel();
            info!("health monitor stopped");
        }
    }

    /// Whether periodic checking is active.
    pub fn is_running(&self) -> bool {
        self.periodic
            .lock()
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Run one pass now and return the resulting snapshot.
    ///
    /// Waits for any pass already in progress; passes never overlap.
    pub async fn check_all(&self) -> Arc<SystemHealth> {
        self.inner.check_all().await
    }

    /// Latest snapshot, or the placeholder if no pass has completed.
    pub fn get_health(&self) -> Arc<SystemHealth> {
        self.inner.current.read().clone()
    }

    /// Call `listener` with every new snapshot until the guard is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, listener: Handler<SystemHealth>) -> HealthSubscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, listener));
        HealthSubscription {
            monitor: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Force `endpoint`'s breaker closed. Takes effect in the next snapshot.
    pub fn reset_circuit(&self, endpoint: &EndpointId) {
        self.inner.breakers.reset(endpoint);
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(periodic) = self.periodic.get_mut().take() {
            periodic.cancel.cancel();
        }
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.inner.config)
            .field("endpoints", &self.inner.endpoints.len())
            .finish_non_exhaustive()
    }
}

/// Listener registration returned by [`HealthMonitor::subscribe`].
///
/// Dropping it removes the listener.
pub struct HealthSubscription {
    monitor: Weak<Inner>,
    id: u64,
}

impl fmt::Debug for HealthSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl HealthSubscription {
    /// Remove the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for HealthSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Probe pass
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    async fn check_all(&self) -> Arc<SystemHealth> {
        let _pass = self.pass.lock().await;

        let results = join_all(self.endpoints.iter().map(|e| self.check_endpoint(e))).await;
        let endpoints: BTreeMap<_, _> = results.into_iter().map(|h| (h.id.clone(), h)).collect();
        let snapshot = Arc::new(SystemHealth::from_parts(
            endpoints,
            self.breakers.snapshot(),
            Utc::now(),
        ));

        let previous = std::mem::replace(&mut *self.current.write(), snapshot.clone());
        if previous.status != snapshot.status {
            info!(from = %previous.status, to = %snapshot.status, "system health changed");
        }
        self.notify(&snapshot);
        snapshot
    }

    async fn check_endpoint(&self, endpoint: &Endpoint) -> EndpointHealth {
        if self.breakers.allow_probe(&endpoint.id) == ProbePermit::Rejected {
            debug!(endpoint = %endpoint.id, "circuit open, skipping probe");
            return down(endpoint, &ProbeError::CircuitOpen);
        }

        let started = Instant::now();
        let result = tokio::time::timeout(self.config.probe_timeout, self.probe.check(endpoint))
            .await
            .unwrap_or_else(|_| {
                Err(ProbeError::Timeout {
                    timeout_ms: millis(self.config.probe_timeout),
                })
            });
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                self.breakers.record_success(&endpoint.id);
                let status = if elapsed > self.config.degraded_latency {
                    warn!(endpoint = %endpoint.id, latency_ms = millis(elapsed), "endpoint slow");
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                EndpointHealth {
                    id: endpoint.id.clone(),
                    status,
                    response_time_ms: Some(millis(elapsed)),
                    error: None,
                    last_checked: Utc::now(),
                }
            }
            Err(e) => {
                warn!(endpoint = %endpoint.id, error = %e, "health probe failed");
                self.breakers.record_failure(&endpoint.id);
                down(endpoint, &e)
            }
        }
    }

    fn notify(&self, snapshot: &SystemHealth) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }
}

async fn run_periodic(inner: Arc<Inner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = inner.check_all() => {}
        }
    }
    debug!("health monitor loop exited");
}

fn down(endpoint: &Endpoint, error: &ProbeError) -> EndpointHealth {
    EndpointHealth {
        id: endpoint.id.clone(),
        status: HealthStatus::Down,
        response_time_ms: None,
        error: Some(error.to_string()),
        last_checked: Utc::now(),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
