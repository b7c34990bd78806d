//! Agent wire frames.
//!
//! The persistent agent connection speaks JSON frames shaped as
//! `{"type": ..., "data": ...}` in both directions.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

/// An event payload as pushed by the agent, before stamping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Free-form event tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload.
    #[serde(default)]
    pub content: serde_json::Value,
    /// Optional opaque metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A chat payload as sent by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Message body.
    pub content: String,
    /// Optional author override; defaults to the channel name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Frames the agent sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum AgentFrame {
    /// A single structured event.
    Event(EventPayload),
    /// A batch of events, emitted in array order.
    Events(Vec<EventPayload>),
    /// A chat message authored by the agent.
    Chat(ChatPayload),
    /// Keep-alive acknowledgment; heartbeat only.
    Pong,
}

/// Frames the relay sends to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Handshake acknowledgment after a successful connect.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// The channel this connection is bound to.
        channel_id: String,
    },
    /// A viewer chat message forwarded to the agent.
    Chat(ChatMessage),
    /// Keep-alive probe; the agent answers with `pong`.
    Ping,
    /// Terminal error, sent before the relay closes the connection.
    Error {
        /// Human-readable reason.
        message: String,
    },
}
