//! The bridge contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use relaycast_core::{ChatMessage, FanoutEvent};

/// Identifies one relay instance across the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Generate a fresh instance id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("relay_{}", Uuid::new_v4().simple()))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend topic for a channel's event traffic.
#[must_use]
pub fn event_topic(namespace: &str, channel_id: &str) -> String {
    format!("{namespace}:events:{channel_id}")
}

/// Backend topic for a channel's chat traffic.
#[must_use]
pub fn chat_topic(namespace: &str, channel_id: &str) -> String {
    format!("{namespace}:chat:{channel_id}")
}

/// Wire envelope for bridged messages.
///
/// Tags the payload with the publishing instance so subscribers can discard
/// their own echoes instead of re-delivering them locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Source instance id.
    pub origin: String,
    /// The bridged payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wrap a payload for publication from `origin`.
    #[must_use]
    pub fn new(origin: &InstanceId, payload: T) -> Self {
        Self {
            origin: origin.0.clone(),
            payload,
        }
    }

    /// True when this envelope was published by a different instance.
    #[must_use]
    pub fn is_foreign(&self, local: &InstanceId) -> bool {
        self.origin != local.0
    }
}

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The backend connection failed.
    ///
    /// Callers log this and fall back to standalone operation rather than
    /// failing the process.
    #[error("backend connection failed: {0}")]
    Connection(String),

    /// Publishing a message to the backend failed.
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Cross-instance relay of fan-out traffic.
///
/// Implementations mirror every local emission to the backend and feed
/// foreign emissions back into the local fan-outs via the raw-injection
/// paths (`emit_raw` / `send_raw`), which never re-publish.
#[async_trait]
pub trait PubSubBridge: Send + Sync {
    /// Establish the backend connection and start the inbound relay.
    ///
    /// # Errors
    ///
    /// `Connection` when the backend is unreachable.
    async fn connect(&self) -> Result<(), BridgeError>;

    /// Mirror a locally emitted event to the backend.
    ///
    /// # Errors
    ///
    /// `Publish` when the backend rejects the message.
    async fn publish_event(&self, channel_id: &str, event: &FanoutEvent)
        -> Result<(), BridgeError>;

    /// Mirror a locally sent chat message to the backend.
    ///
    /// # Errors
    ///
    /// `Publish` when the backend rejects the message.
    async fn publish_chat(&self, channel_id: &str, message: &ChatMessage)
        -> Result<(), BridgeError>;

    /// Whether a backend is configured and connected.
    fn is_enabled(&self) -> bool;

    /// Tear down the backend connection.
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_keys() {
        assert_eq!(event_topic("relaycast", "ch_1"), "relaycast:events:ch_1");
        assert_eq!(chat_topic("relaycast", "ch_1"), "relaycast:chat:ch_1");
    }

    #[test]
    fn test_envelope_origin_filtering() {
        let local = InstanceId::generate();
        let remote = InstanceId::generate();

        let event = FanoutEvent::new("ch_1", "command", json!(1), None);
        let own = Envelope::new(&local, event.clone());
        let theirs = Envelope::new(&remote, event);

        assert!(!own.is_foreign(&local));
        assert!(theirs.is_foreign(&local));
    }

    #[test]
    fn test_envelope_round_trip() {
        let local = InstanceId::generate();
        let message = ChatMessage::new("ch_1", "alice", "hello", false);
        let envelope = Envelope::new(&local, message.clone());

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope<ChatMessage> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.origin, local.as_str());
        assert_eq!(decoded.payload, message);
    }
}
