//! Physical event-stream connections.
//!
//! [`StreamConnector`] opens one stream and yields decoded frames; the
//! reconnect loop in [`super::StreamClient`] never touches HTTP directly.
//! [`HttpStreamConnector`] is the production implementation over `reqwest`
//! and `eventsource-stream`.

use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use pulse_core::TransportError;
use reqwest::Url;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tracing::debug;

/// Event type used when a frame carries no `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One server-sent event before payload decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFrame {
    /// Event type (`message` when unnamed).
    pub event: String,
    /// Raw `data:` payload, multi-line data joined with `\n`.
    pub data: String,
    /// Event id, if the server sent one.
    pub id: Option<String>,
}

/// Frames of one open stream. Ends when the server closes the response.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, TransportError>> + Send>>;

/// What to open.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    /// Target URL, credential already applied.
    pub url: Url,
    /// Id of the last event seen on a previous connection.
    pub last_event_id: Option<String>,
}

/// Opens physical event streams.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Open a stream. Resolves once the server has accepted it.
    async fn open(&self, request: &StreamRequest) -> Result<FrameStream, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────────────────────────

/// `text/event-stream` over `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct HttpStreamConnector {
    client: reqwest::Client,
}

impl HttpStreamConnector {
    /// Connector sharing an existing HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn open(&self, request: &StreamRequest) -> Result<FrameStream, TransportError> {
        let mut builder = self
            .client
            .get(request.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = &request.last_event_id {
            builder = builder.header("Last-Event-ID", id.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("text/event-stream") {
            return Err(TransportError::ContentType(content_type));
        }
        debug!(status = status.as_u16(), "event stream accepted");

        let frames = response.bytes_stream().eventsource().map(|item| match item {
            Ok(event) => Ok(StreamFrame {
                event: if event.event.is_empty() {
                    DEFAULT_EVENT_TYPE.to_string()
                } else {
                    event.event
                },
                data: event.data,
                id: (!event.id.is_empty()).then_some(event.id),
            }),
            Err(e) => Err(TransportError::Stream(e.to_string())),
        });
        Ok(Box::pin(frames))
    }
}
