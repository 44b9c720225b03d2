//! # pulse-transport
//!
//! Reconnecting real-time transports for the Pulse console layer.
//!
//! - **Stream**: [`StreamClient`] over server-sent events (`reqwest` + `eventsource-stream`)
//! - **Socket**: [`SocketClient`] over WebSocket (`tokio-tungstenite`) with channel subscriptions
//! - **Connectors**: [`StreamConnector`] / [`SocketConnector`] traits separating the
//!   reconnect logic from the network
//!
//! Both clients share the same lifecycle bookkeeping: one physical connection
//! per client, capped exponential backoff between attempts, and a terminal
//! error state once the attempt budget is spent.

#![deny(unsafe_code)]

mod lifecycle;
pub mod socket;
pub mod stream;
pub mod url;

pub use socket::{
    MessageKind, SocketClient, SocketConfig, SocketConnector, SocketEvent, SocketMessage,
    WsConnector,
};
pub use stream::{HttpStreamConnector, StreamClient, StreamConfig, StreamConnector, StreamMessage};
