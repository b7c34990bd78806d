//! Channel identity and lifecycle state.
//!
//! A channel is the unit of registration and authorization: an agent
//! registers one, receives its secret once, and every mutating operation
//! afterwards must present that secret.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::now_ms;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Channel name contains control characters");
    }
    Ok(())
}

/// Liveness state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Agent recently active (heartbeat within TTL).
    Live,
    /// No heartbeat within TTL, or agent disconnected past the grace window.
    Offline,
}

/// Parameters for registering a new channel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChannel {
    /// Display name of the channel.
    pub name: String,
    /// Optional category tag for listing filters.
    pub category: Option<String>,
    /// Identifier of the owning agent, if it has one.
    pub agent_id: Option<String>,
    /// Opaque key/value bag.
    pub metadata: Option<serde_json::Value>,
}

/// A registered channel.
///
/// The secret is never serialized; the register response hands it to the
/// caller exactly once as `apiKey`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Opaque, unique, server-generated identifier.
    pub id: ChannelId,
    /// Display name.
    pub name: String,
    /// Optional category tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Identifier of the owning agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Shared secret, generated at registration and immutable afterwards.
    #[serde(skip_serializing)]
    pub secret: String,
    /// Liveness state.
    pub status: ChannelStatus,
    /// Registration timestamp in epoch milliseconds.
    pub registered_at: u64,
    /// Last liveness signal in epoch milliseconds.
    pub last_heartbeat: u64,
    /// Opaque key/value bag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Channel {
    /// Create a live channel from registration parameters, generating its
    /// identifier and secret.
    #[must_use]
    pub fn create(params: NewChannel) -> Self {
        let now = now_ms();
        Self {
            id: format!("ch_{}", Uuid::new_v4().simple()),
            name: params.name,
            category: params.category,
            agent_id: params.agent_id,
            secret: format!("sk_{}", Uuid::new_v4().simple()),
            status: ChannelStatus::Live,
            registered_at: now,
            last_heartbeat: now,
            metadata: params.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_creation() {
        let channel = Channel::create(NewChannel {
            name: "Demo".into(),
            ..NewChannel::default()
        });

        assert!(channel.id.starts_with("ch_"));
        assert!(channel.secret.starts_with("sk_"));
        assert_eq!(channel.status, ChannelStatus::Live);
        assert_eq!(channel.registered_at, channel.last_heartbeat);
    }

    #[test]
    fn test_secret_never_serialized() {
        let channel = Channel::create(NewChannel {
            name: "Demo".into(),
            ..NewChannel::default()
        });

        let value = serde_json::to_value(&channel).unwrap();
        assert!(value.get("secret").is_none());
        assert_eq!(value["status"], "live");
    }

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("Demo Stream").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("   ").is_err());
        assert!(validate_channel_name("bad\nname").is_err());

        let long_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
    }
}
