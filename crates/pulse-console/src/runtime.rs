//! Composition root.
//!
//! Builds every client and the health monitor from [`PulseSettings`] and owns
//! them for the life of the process. Components receive their configuration
//! here; nothing reaches for a global.

use anyhow::{Context, Result};
use pulse_core::handler;
use pulse_health::{BreakerConfig, Endpoint, HealthMonitor, HealthSubscription, MonitorConfig};
use pulse_settings::{HealthSettings, PulseSettings, TransportSettings, join_url};
use pulse_transport::{
    MessageKind, SocketClient, SocketConfig, SocketEvent, StreamClient, StreamConfig,
    StreamMessage,
};
use tracing::{info, warn};

/// Stream tuning from a transport section.
pub fn stream_config(settings: &TransportSettings) -> StreamConfig {
    StreamConfig {
        backoff: settings.backoff(),
        max_reconnect_attempts: settings.max_reconnect_attempts,
        connect_timeout: settings.connect_timeout(),
    }
}

/// Socket tuning from a transport section.
pub fn socket_config(settings: &TransportSettings) -> SocketConfig {
    SocketConfig {
        backoff: settings.backoff(),
        max_reconnect_attempts: settings.max_reconnect_attempts,
        connect_timeout: settings.connect_timeout(),
    }
}

/// Monitor tuning from the health section.
pub fn monitor_config(settings: &HealthSettings) -> MonitorConfig {
    MonitorConfig {
        probe_timeout: settings.probe_timeout(),
        degraded_latency: settings.degraded_latency(),
        breaker: BreakerConfig {
            failure_threshold: settings.failure_threshold,
            cooldown: settings.cooldown(),
        },
    }
}

/// Probe targets: each configured path joined onto the API base URL.
pub fn endpoints(settings: &PulseSettings) -> Result<Vec<Endpoint>> {
    settings
        .health
        .endpoints
        .iter()
        .map(|e| {
            let url = join_url(&settings.api.base_url, &e.path);
            Endpoint::new(e.id.as_str(), &url)
                .with_context(|| format!("Invalid health endpoint '{}'", e.id))
        })
        .collect()
}

/// What the console connects to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Targets {
    /// Event-stream URL.
    pub stream_url: String,
    /// Socket URL.
    pub socket_url: String,
    /// Credential sent with both connections.
    pub token: String,
    /// Channels to subscribe to.
    pub channels: Vec<String>,
    /// Stream event types to log.
    pub events: Vec<String>,
}

/// Live clients and monitor.
pub struct Console {
    stream: StreamClient,
    socket: SocketClient,
    monitor: HealthMonitor,
    interval: std::time::Duration,
    targets: Targets,
    _health: HealthSubscription,
}

impl Console {
    /// Construct every component. Nothing connects until [`Self::start`].
    pub fn build(settings: &PulseSettings, targets: Targets) -> Result<Self> {
        let stream = StreamClient::new(stream_config(&settings.stream));
        for event in &targets.events {
            stream.on(
                event.as_str(),
                handler(|m: &StreamMessage| {
                    info!(event = %m.event, id = ?m.id, data = %m.data, "stream event");
                }),
            );
        }

        let socket = SocketClient::new(socket_config(&settings.socket));
        for channel in &targets.channels {
            socket.subscribe(channel.as_str());
        }
        socket.on(
            MessageKind::Event,
            handler(|e: &SocketEvent| {
                info!(channel = ?e.channel.as_deref(), payload = %e.payload, "socket event");
            }),
        );
        socket.on(
            MessageKind::Ack,
            handler(|e: &SocketEvent| {
                info!(channel = ?e.channel.as_deref(), "socket ack");
            }),
        );

        let monitor = HealthMonitor::new(monitor_config(&settings.health), endpoints(settings)?);
        let health = monitor.subscribe(handler(|h: &pulse_health::SystemHealth| {
            match serde_json::to_string(h) {
                Ok(json) => info!(status = %h.status, snapshot = %json, "system health"),
                Err(e) => warn!(error = %e, "failed to serialize health snapshot"),
            }
        }));

        Ok(Self {
            stream,
            socket,
            monitor,
            interval: settings.health.interval(),
            targets,
            _health: health,
        })
    }

    /// Connect both transports and begin periodic health checks.
    pub fn start(&self) -> Result<()> {
        self.stream
            .connect(&self.targets.stream_url, &self.targets.token)
            .context("Failed to start event stream")?;
        self.socket
            .connect(&self.targets.socket_url, &self.targets.token)
            .context("Failed to start socket")?;
        self.monitor.start_periodic_check(self.interval);
        info!(
            stream = %self.targets.stream_url,
            socket = %self.targets.socket_url,
            channels = self.targets.channels.len(),
            "console started"
        );
        Ok(())
    }

    /// Health monitor, for one-off passes.
    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Subscribed socket channels.
    pub fn channels(&self) -> Vec<String> {
        self.socket
            .subscriptions()
            .into_iter()
            .map(pulse_core::Channel::into_inner)
            .collect()
    }

    /// Disconnect both transports and stop health checks.
    pub fn shutdown(&self) {
        self.monitor.stop();
        self.stream.disconnect();
        self.socket.disconnect();
        info!("console stopped");
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
