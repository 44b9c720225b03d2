//! Socket wire envelope.
//!
//! Every frame is a JSON object discriminated by `type`:
//!
//! ```json
//! {"type": "subscribe", "channel": "jobs"}
//! {"type": "unsubscribe", "channel": "jobs"}
//! {"type": "event", "channel": "jobs", "event": {"id": 7, "status": "done"}}
//! {"type": "ack", "channel": "jobs"}
//! ```

use pulse_core::Channel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame exchanged with the socket server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SocketMessage {
    /// Client asks to receive a channel.
    Subscribe {
        /// Channel to join.
        channel: Channel,
    },
    /// Client stops receiving a channel.
    Unsubscribe {
        /// Channel to leave.
        channel: Channel,
    },
    /// Server pushes a domain event.
    Event {
        /// Channel the event belongs to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<Channel>,
        /// Event payload.
        #[serde(default)]
        event: Value,
    },
    /// Server acknowledges a control message.
    Ack {
        /// Channel the acknowledgement refers to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<Channel>,
    },
}

/// Discriminant of a [`SocketMessage`], used to key handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `subscribe`
    Subscribe,
    /// `unsubscribe`
    Unsubscribe,
    /// `event`
    Event,
    /// `ack`
    Ack,
}

impl SocketMessage {
    /// Discriminant of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Subscribe { .. } => MessageKind::Subscribe,
            Self::Unsubscribe { .. } => MessageKind::Unsubscribe,
            Self::Event { .. } => MessageKind::Event,
            Self::Ack { .. } => MessageKind::Ack,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Payload handed to socket handlers.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketEvent {
    /// Kind of message that produced this delivery.
    pub kind: MessageKind,
    /// Channel named by the message, if any.
    pub channel: Option<Channel>,
    /// Event payload (`null` for acknowledgements).
    pub payload: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
