//! # relaycast-core
//!
//! Core state and fan-out machinery for the Relaycast relay.
//!
//! This crate provides the building blocks the server wires together:
//!
//! - **ChannelRegistry** - channel identity, secrets, liveness and expiry
//! - **PresenceTracker** - concurrent viewer counts per channel
//! - **EventFanout** / **ChatFanout** - per-channel pub/sub delivery
//! - **Frames** - the agent wire protocol
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │    Agent    │────▶│  ChannelRegistry │     │   Viewers   │
//! └─────────────┘     └──────────────────┘     └─────────────┘
//!        │                                            ▲
//!        │            ┌──────────────────┐            │
//!        └───────────▶│ Event/ChatFanout │────────────┘
//!                     └──────────────────┘
//! ```

pub mod channel;
pub mod fanout;
pub mod frames;
pub mod message;
pub mod presence;
pub mod registry;

pub use channel::{Channel, ChannelId, ChannelStatus, NewChannel};
pub use fanout::{ChatFanout, EventFanout, Subscription};
pub use frames::{AgentFrame, ServerFrame};
pub use message::{ChatMessage, FanoutEvent};
pub use presence::PresenceTracker;
pub use registry::{ChannelRegistry, RegistryConfig, RegistryError, SweepStats};

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
