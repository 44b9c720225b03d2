//! # pulse-health
//!
//! Endpoint liveness for the Pulse console layer.
//!
//! - **Breakers**: [`CircuitBreakerRegistry`] tracks closed / open / half-open per endpoint
//! - **Probes**: [`HealthProbe`] trait with an HTTP implementation ([`HttpProbe`])
//! - **Snapshots**: [`SystemHealth`] aggregates endpoint and breaker state
//! - **Monitor**: [`HealthMonitor`] probes on an interval and pushes snapshots to listeners

#![deny(unsafe_code)]

pub mod circuit;
pub mod errors;
pub mod monitor;
pub mod probe;
pub mod snapshot;

pub use circuit::{BreakerConfig, BreakerState, CircuitBreakerRegistry, CircuitState, ProbePermit};
pub use errors::ProbeError;
pub use monitor::{HealthMonitor, HealthSubscription, MonitorConfig};
pub use probe::{Endpoint, HealthProbe, HttpProbe};
pub use snapshot::{EndpointHealth, HealthStatus, SystemHealth};
