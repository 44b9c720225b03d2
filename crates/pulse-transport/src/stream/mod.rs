//! Reconnecting event-stream client.
//!
//! [`StreamClient`] keeps one server-sent event stream open and delivers
//! each event to the handlers registered for its event type. When the
//! connection fails or the server ends the stream it reconnects with the
//! shared backoff policy, resuming from the last seen event id. After the
//! attempt budget is spent the client rests in [`ConnectionState::Error`]
//! until `connect` is called again.

mod connector;

pub use connector::{
    DEFAULT_EVENT_TYPE, FrameStream, HttpStreamConnector, StreamConnector, StreamFrame,
    StreamRequest,
};

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use pulse_core::backoff::DEFAULT_MAX_RECONNECT_ATTEMPTS;
use pulse_core::{
    BackoffPolicy, ConnectionState, Handler, HandlerRegistry, LifecycleEvent, TransportError,
};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::lifecycle::{Lifecycle, ReconnectPolicy, Session};
use crate::url::{redacted, with_token};

/// A decoded event delivered to handlers.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamMessage {
    /// Event type the message arrived under.
    pub event: String,
    /// JSON payload.
    pub data: Value,
    /// Event id, if the server sent one.
    pub id: Option<String>,
}

/// Reconnect tuning for a [`StreamClient`].
#[derive(Clone, Copy, Debug)]
pub struct StreamConfig {
    /// Delay law between reconnect attempts.
    pub backoff: BackoffPolicy,
    /// Consecutive failures after which reconnecting stops.
    pub max_reconnect_attempts: u32,
    /// Timeout for opening one physical connection.
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct Shared {
    lifecycle: Lifecycle,
    handlers: HandlerRegistry<String, StreamMessage>,
    last_event_id: Mutex<Option<String>>,
    connect_timeout: Duration,
}

/// Reconnecting server-sent event client.
///
/// Must be used from within a Tokio runtime. Dropping the client disconnects it.
pub struct StreamClient {
    shared: Arc<Shared>,
    connector: Arc<dyn StreamConnector>,
}

impl StreamClient {
    /// Client using [`HttpStreamConnector`].
    pub fn new(config: StreamConfig) -> Self {
        Self::with_connector(config, Arc::new(HttpStreamConnector::default()))
    }

    /// Client using a custom connector.
    pub fn with_connector(config: StreamConfig, connector: Arc<dyn StreamConnector>) -> Self {
        let policy = ReconnectPolicy {
            backoff: config.backoff,
            max_attempts: config.max_reconnect_attempts,
        };
        Self {
            shared: Arc::new(Shared {
                lifecycle: Lifecycle::new("stream", policy),
                handlers: HandlerRegistry::new(),
                last_event_id: Mutex::new(None),
                connect_timeout: config.connect_timeout,
            }),
            connector,
        }
    }

    /// Open a stream to `url`, replacing any existing connection.
    ///
    /// The token is sent as the `token` query parameter. Only an unusable
    /// URL is reported here; connection failures are retried in the
    /// background and surface through [`Self::state`].
    pub fn connect(&self, url: &str, token: &str) -> Result<(), TransportError> {
        let url = with_token(url, token, &["http", "https"])?;
        let session = self.shared.lifecycle.begin();
        *self.shared.last_event_id.lock() = None;
        info!(url = %redacted(&url), generation = session.generation(), "connecting event stream");
        drop(tokio::spawn(drive(
            self.shared.clone(),
            self.connector.clone(),
            url,
            session,
        )));
        Ok(())
    }

    /// Register `handler` for `event_type`.
    ///
    /// Unnamed events are delivered under [`DEFAULT_EVENT_TYPE`]. A handler
    /// added while connected receives every later event of that type.
    pub fn on(&self, event_type: impl Into<String>, handler: Handler<StreamMessage>) {
        self.shared.handlers.on(event_type.into(), handler);
    }

    /// Remove `handler` from `event_type`. Returns `false` if it was not registered.
    pub fn off(&self, event_type: &str, handler: &Handler<StreamMessage>) -> bool {
        self.shared.handlers.off(event_type, handler)
    }

    /// Close the connection, cancel any pending reconnect and drop all handlers.
    ///
    /// Safe to call repeatedly.
    pub fn disconnect(&self) {
        if self.shared.lifecycle.shutdown() {
            info!("event stream disconnected");
        }
        self.shared.handlers.clear();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle.state()
    }

    /// Reconnect attempts consumed since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lifecycle.attempts()
    }

    /// Receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.lifecycle.watch()
    }

    /// Id of the most recent event received, if any.
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.last_event_id.lock().clone()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        let _ = self.shared.lifecycle.shutdown();
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("lifecycle", &self.shared.lifecycle)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

async fn drive(
    shared: Arc<Shared>,
    connector: Arc<dyn StreamConnector>,
    url: Url,
    session: Session,
) {
    loop {
        let request = StreamRequest {
            url: url.clone(),
            last_event_id: shared.last_event_id.lock().clone(),
        };
        let opened = tokio::select! {
            biased;
            () = session.cancelled() => return,
            result = tokio::time::timeout(shared.connect_timeout, connector.open(&request)) => {
                result.unwrap_or_else(|_| Err(TransportError::Timeout {
                    timeout_ms: u64::try_from(shared.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                }))
            }
        };

        let failure = match opened {
            Ok(mut frames) => {
                if !shared.lifecycle.opened(&session) {
                    return;
                }
                info!(generation = session.generation(), "event stream open");
                match pump(&shared, &mut frames, &session).await {
                    Some(err) => err,
                    None => return,
                }
            }
            Err(err) => err,
        };

        warn!(error = %failure, generation = session.generation(), "event stream failed");
        if !shared.lifecycle.apply(&session, LifecycleEvent::Failed) {
            return;
        }
        let Some(delay) = shared.lifecycle.next_retry(&session) else {
            return;
        };
        tokio::select! {
            biased;
            () = session.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        if !shared.lifecycle.apply(&session, LifecycleEvent::Retry) {
            return;
        }
    }
}

/// Deliver frames until the stream fails. `None` means the session was cancelled.
async fn pump(
    shared: &Shared,
    frames: &mut FrameStream,
    session: &Session,
) -> Option<TransportError> {
    loop {
        tokio::select! {
            biased;
            () = session.cancelled() => return None,
            item = frames.next() => match item {
                Some(Ok(frame)) => dispatch(shared, frame, session),
                Some(Err(err)) => return Some(err),
                None => return Some(TransportError::Ended),
            },
        }
    }
}

fn dispatch(shared: &Shared, frame: StreamFrame, session: &Session) {
    {
        // Checked under the id lock so a superseded session cannot write
        // after `connect` has cleared it.
        let mut last_event_id = shared.last_event_id.lock();
        if !shared.lifecycle.is_current(session) {
            debug!(generation = session.generation(), "dropping frame from superseded stream");
            return;
        }
        if let Some(id) = &frame.id {
            *last_event_id = Some(id.clone());
        }
    }
    let data = match serde_json::from_str::<Value>(&frame.data) {
        Ok(data) => data,
        Err(err) => {
            warn!(event = %frame.event, error = %err, "dropping malformed stream payload");
            return;
        }
    };
    let message = StreamMessage {
        event: frame.event,
        data,
        id: frame.id,
    };
    let delivered = shared.handlers.emit(message.event.as_str(), &message);
    debug!(event = %message.event, delivered, "stream event dispatched");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
