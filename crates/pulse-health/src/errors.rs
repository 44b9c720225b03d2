//! Probe failures.

/// Why a single health probe did not succeed.
///
/// Never escapes the monitor: every variant becomes a `down` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The endpoint URL could not be built.
    #[error("invalid endpoint url {url}: {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// Request failed before a response arrived.
    #[error("request failed: {0}")]
    Request(String),

    /// Endpoint answered with a non-2xx status.
    #[error("unhealthy status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// No answer within the probe timeout.
    #[error("probe timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The endpoint's breaker is open; the probe was not sent.
    #[error("circuit open")]
    CircuitOpen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(ProbeError::Status { status: 503 }.to_string(), "unhealthy status 503");
        assert_eq!(
            ProbeError::Timeout { timeout_ms: 5000 }.to_string(),
            "probe timed out after 5000ms"
        );
        assert_eq!(ProbeError::CircuitOpen.to_string(), "circuit open");
    }
}
