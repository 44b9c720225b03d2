//! Physical socket connections.
//!
//! A [`SocketConnector`] yields a [`SocketLink`]: a sink of outbound text
//! frames and a source of inbound text frames. A close frame from the server
//! surfaces as [`TransportError::Closed`] on the source.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use pulse_core::TransportError;
use reqwest::Url;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

/// Close code used when the server sends a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Outbound half of a socket.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
/// Inbound half of a socket.
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One open socket.
pub struct SocketLink {
    /// Outbound text frames.
    pub sink: FrameSink,
    /// Inbound text frames.
    pub source: FrameSource,
}

impl std::fmt::Debug for SocketLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketLink").finish_non_exhaustive()
    }
}

/// Opens physical sockets.
#[async_trait]
pub trait SocketConnector: Send + Sync + 'static {
    /// Complete the handshake with `url`.
    async fn connect(&self, url: &Url) -> Result<SocketLink, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket implementation
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<SocketLink, TransportError> {
        let (ws, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(status = response.status().as_u16(), "websocket handshake complete");

        let (write, read) = ws.split();
        let sink = write
            .with(|text: String| futures::future::ready(Ok::<_, WsError>(Message::text(text))))
            .sink_map_err(|e: WsError| TransportError::Send(e.to_string()));
        let source = read.filter_map(|item| futures::future::ready(inbound(item)));

        Ok(SocketLink {
            sink: Box::pin(sink),
            source: Box::pin(source),
        })
    }
}

fn inbound(
    item: Result<Message, WsError>,
) -> Option<Result<String, TransportError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
        Ok(Message::Close(frame)) => Some(Err(TransportError::Closed {
            code: frame.map_or(CLOSE_NO_STATUS, |f| u16::from(f.code)),
        })),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(TransportError::Stream(e.to_string()))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
