//! # relaycast-bridge
//!
//! Cross-instance relay contract for Relaycast.
//!
//! A bridge mirrors local fan-out traffic to a shared backend so several
//! relay instances can serve the same channels. This crate defines the
//! contract and ships the no-op implementation used when no backend is
//! configured:
//!
//! - every local emission is published to `{namespace}:events:{channel}` /
//!   `{namespace}:chat:{channel}`;
//! - inbound backend messages are re-emitted into the local fan-outs through
//!   their raw-injection paths, which do not publish back out (no loops);
//! - outbound messages carry a source-instance id, and an instance ignores
//!   inbound messages carrying its own id.

pub mod noop;
pub mod traits;

pub use noop::NoopBridge;
pub use traits::{chat_topic, event_topic, BridgeError, Envelope, InstanceId, PubSubBridge};
