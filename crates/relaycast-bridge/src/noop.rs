//! The disabled bridge.
//!
//! Used whenever no backend is configured: every method is a no-op and the
//! relay runs standalone.

use async_trait::async_trait;
use tracing::debug;

use relaycast_core::{ChatMessage, FanoutEvent};

use crate::traits::{BridgeError, PubSubBridge};

/// A bridge that relays nothing.
#[derive(Debug, Default)]
pub struct NoopBridge;

impl NoopBridge {
    /// Create a disabled bridge.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PubSubBridge for NoopBridge {
    async fn connect(&self) -> Result<(), BridgeError> {
        debug!("Bridge disabled, running standalone");
        Ok(())
    }

    async fn publish_event(
        &self,
        _channel_id: &str,
        _event: &FanoutEvent,
    ) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn publish_chat(
        &self,
        _channel_id: &str,
        _message: &ChatMessage,
    ) -> Result<(), BridgeError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_bridge_does_nothing() {
        let bridge = NoopBridge::new();
        assert!(!bridge.is_enabled());
        assert!(bridge.connect().await.is_ok());

        let event = FanoutEvent::new("ch_1", "command", json!(1), None);
        assert!(bridge.publish_event("ch_1", &event).await.is_ok());

        let message = ChatMessage::new("ch_1", "alice", "hello", false);
        assert!(bridge.publish_chat("ch_1", &message).await.is_ok());

        bridge.shutdown().await;
    }
}
