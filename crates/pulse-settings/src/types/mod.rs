//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the console's
//! JSON format. Each type implements [`Default`] with production values and
//! is marked `#[serde(default)]`, so partial JSON is accepted.

mod health;
mod transport;

pub use health::*;
pub use transport::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "api": { "baseUrl": "https://console.example.com" },
///   "health": { "intervalMs": 10000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Settings schema version.
    pub version: String,
    /// Backend locations and credentials.
    pub api: ApiSettings,
    /// Reconnect behavior of the event-stream client.
    pub stream: TransportSettings,
    /// Reconnect behavior of the socket client.
    pub socket: TransportSettings,
    /// Health monitor and circuit breaker tuning.
    pub health: HealthSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            api: ApiSettings::default(),
            stream: TransportSettings::default(),
            socket: TransportSettings::default(),
            health: HealthSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PulseSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        self.stream.validate("stream")?;
        self.socket.validate("socket")?;
        self.health.validate()?;
        Ok(())
    }
}

/// Backend locations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL for HTTP requests and health probes.
    pub base_url: String,
    /// Path of the server-sent event stream, joined onto `base_url`.
    pub stream_path: String,
    /// Full URL of the WebSocket endpoint.
    pub socket_url: String,
    /// Credential appended as the `token` query parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            stream_path: "/api/events/stream".to_string(),
            socket_url: "ws://localhost:8000/ws".to_string(),
            token: None,
        }
    }
}

impl ApiSettings {
    /// Absolute URL of the event stream.
    pub fn stream_url(&self) -> String {
        join_url(&self.base_url, &self.stream_path)
    }

    fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SettingsError::InvalidValue(format!(
                "api.baseUrl must be http(s): {}",
                self.base_url
            )));
        }
        if !(self.socket_url.starts_with("ws://") || self.socket_url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "api.socketUrl must be ws(s): {}",
                self.socket_url
            )));
        }
        Ok(())
    }
}

/// Join a base URL and a path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Log level filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level (most verbose).
    Trace,
    /// Debug-level.
    Debug,
    /// Info-level (default).
    #[default]
    Info,
    /// Warning-level.
    Warn,
    /// Error-level (least verbose).
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level written to stderr.
    pub level: LogLevel,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
