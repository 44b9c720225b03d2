//! # pulse-core
//!
//! Foundation types shared by the Pulse real-time resilience layer.
//!
//! - **Backoff**: [`BackoffPolicy`] with the capped doubling law used by every transport
//! - **Lifecycle**: [`ConnectionState`] and its explicit transition table
//! - **Handlers**: [`HandlerRegistry`] keyed, ordered callbacks removed by reference
//! - **IDs**: [`EndpointId`] and [`Channel`] newtypes
//! - **Errors**: [`TransportError`] and [`ConfigError`] via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stack

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod handlers;
pub mod ids;
pub mod logging;
pub mod state;

pub use backoff::BackoffPolicy;
pub use errors::{ConfigError, TransportError};
pub use handlers::{Handler, HandlerRegistry, handler};
pub use ids::{Channel, EndpointId};
pub use state::{ConnectionState, InvalidTransition, LifecycleEvent};
