//! Connection lifecycle state machine.
//!
//! Both transport clients drive their connection through the same explicit
//! transition table:
//!
//! | from                  | event           | to         |
//! |-----------------------|-----------------|------------|
//! | any                   | `Connect`       | connecting |
//! | any                   | `Disconnect`    | closed     |
//! | connecting            | `Opened`        | open       |
//! | connecting, open      | `Failed`        | error      |
//! | open                  | `ClosedCleanly` | closed     |
//! | error                 | `Retry`         | connecting |
//!
//! Every other pair is rejected with [`InvalidTransition`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of one physical connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// Opening a physical connection.
    Connecting,
    /// Connected and delivering messages.
    Open,
    /// Closed by the caller or cleanly by the server.
    Closed,
    /// Lost or failed to open; may be waiting for a reconnect.
    Error,
}

/// Input to the lifecycle state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Caller asked for a (new) connection.
    Connect,
    /// The transport finished opening.
    Opened,
    /// Opening failed or an open connection was lost.
    Failed,
    /// The server closed the connection with a normal close.
    ClosedCleanly,
    /// A backoff timer fired.
    Retry,
    /// Caller tore the connection down.
    Disconnect,
}

/// Rejected lifecycle transition.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("invalid transition from {from} on {event}")]
pub struct InvalidTransition {
    /// State the machine was in.
    pub from: ConnectionState,
    /// Event that was applied.
    pub event: LifecycleEvent,
}

impl ConnectionState {
    /// Apply `event`, returning the next state.
    pub fn transition(self, event: LifecycleEvent) -> Result<Self, InvalidTransition> {
        use ConnectionState as S;
        use LifecycleEvent as E;

        match (self, event) {
            (_, E::Connect) => Ok(S::Connecting),
            (_, E::Disconnect) => Ok(S::Closed),
            (S::Connecting, E::Opened) => Ok(S::Open),
            (S::Connecting | S::Open, E::Failed) => Ok(S::Error),
            (S::Open, E::ClosedCleanly) => Ok(S::Closed),
            (S::Error, E::Retry) => Ok(S::Connecting),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    /// Wire/display name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }

    /// Whether messages can currently flow.
    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Opened => "opened",
            Self::Failed => "failed",
            Self::ClosedCleanly => "closed_cleanly",
            Self::Retry => "retry",
            Self::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
