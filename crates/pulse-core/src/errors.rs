//! Error types for transports and configuration.
//!
//! - [`TransportError`]: why a physical connection could not be opened or was lost
//! - [`ConfigError`]: a policy or settings value that cannot be used
//!
//! Transport errors never reach consumers of the clients directly. They are
//! logged and folded into the connection state; they exist so connectors can
//! report a cause the reconnect loop can classify.

use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// TransportError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of a physical stream or socket connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The target URL could not be parsed or has an unsupported scheme.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-success HTTP status.
    #[error("unexpected status {status} from server")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The server answered with a body that is not an event stream.
    #[error("unexpected content type: {0}")]
    ContentType(String),

    /// Opening the connection took longer than the configured timeout.
    #[error("connection timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// An established stream failed mid-flight.
    #[error("stream error: {0}")]
    Stream(String),

    /// The server ended the stream or dropped the socket without a close frame.
    #[error("connection ended by server")]
    Ended,

    /// The server closed the socket with a close frame.
    #[error("connection closed with code {code}")]
    Closed {
        /// WebSocket close code.
        code: u16,
    },

    /// An outbound frame could not be written.
    #[error("send failed: {0}")]
    Send(String),
}

/// Normal-closure code for WebSocket close frames.
pub const CLOSE_NORMAL: u16 = 1000;

impl TransportError {
    /// Whether the server closed the connection deliberately and cleanly.
    ///
    /// A clean close ends the connection without scheduling a reconnect.
    #[must_use]
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::Closed { code } if *code == CLOSE_NORMAL)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigError
// ─────────────────────────────────────────────────────────────────────────────

/// A configuration value that fails validation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ConfigError {
    /// The field that failed validation.
    pub field: &'static str,
    /// Human-readable reason.
    pub reason: String,
}

impl ConfigError {
    /// Create a validation error for `field`.
    #[must_use]
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
