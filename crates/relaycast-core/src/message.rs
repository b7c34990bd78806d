//! Message types flowing through the relay.
//!
//! Events are ephemeral and never buffered; chat messages additionally land
//! in the per-channel rolling buffer kept by [`crate::ChatFanout`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::now_ms;

/// Atomic counter for ensuring unique IDs even within the same millisecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a prefixed, monotonic-ish message ID.
///
/// Combines the millisecond timestamp with a process-wide counter so two
/// messages stamped in the same instant still get distinct IDs.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}{:04x}", prefix, now_ms(), counter & 0xffff)
}

/// A structured event fanned out to channel viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutEvent {
    /// Unique event identifier.
    pub id: String,
    /// Channel this event belongs to.
    pub channel_id: ChannelRef,
    /// Free-form event tag, e.g. `"command"` or `"success"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload.
    pub content: serde_json::Value,
    /// Optional opaque metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Creation timestamp in epoch milliseconds.
    pub created_at: u64,
}

/// Channel reference carried inside messages.
pub type ChannelRef = String;

impl FanoutEvent {
    /// Create a new event, stamping its ID and timestamp.
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        kind: impl Into<String>,
        content: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: generate_id("evt"),
            channel_id: channel_id.into(),
            kind: kind.into(),
            content,
            metadata,
            created_at: now_ms(),
        }
    }
}

/// A chat message relayed between viewers and the channel's agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique message identifier.
    pub id: String,
    /// Channel this message belongs to.
    pub channel_id: ChannelRef,
    /// Display name of the sender.
    pub author: String,
    /// Message body.
    pub content: String,
    /// Whether the sender authenticated with the channel secret.
    ///
    /// Always derived server-side; a client-asserted value is ignored.
    pub is_agent: bool,
    /// Creation timestamp in epoch milliseconds.
    pub created_at: u64,
}

impl ChatMessage {
    /// Create a new chat message, stamping its ID and timestamp.
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
        is_agent: bool,
    ) -> Self {
        Self {
            id: generate_id("msg"),
            channel_id: channel_id.into(),
            author: author.into(),
            content: content.into(),
            is_agent,
            created_at: now_ms(),
        }
    }
}
