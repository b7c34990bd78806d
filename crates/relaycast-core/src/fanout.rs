//! Per-channel pub/sub fan-out.
//!
//! Each channel gets a broadcast sender; every viewer stream holds its own
//! receiver, so delivery to one subscriber preserves emission order and a
//! slow or broken subscriber lags on its own queue without blocking the
//! rest. Dropping the last [`Subscription`] removes the channel entry from
//! the map so empty sets never stay resident.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::message::{ChatMessage, FanoutEvent};

/// Default per-subscriber broadcast queue depth.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default rolling chat buffer capacity.
pub const DEFAULT_CHAT_BUFFER_CAPACITY: usize = 100;

type SenderMap<T> = Arc<DashMap<String, broadcast::Sender<Arc<T>>>>;

/// Generic per-channel fan-out of `T` values.
#[derive(Debug)]
struct Fanout<T> {
    channels: SenderMap<T>,
    capacity: usize,
}

impl<T: Send + Sync + 'static> Fanout<T> {
    fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Register a subscriber on a channel.
    fn subscribe(&self, channel_id: &str) -> Subscription<T> {
        let rx = self
            .channels
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel_id, "Creating fan-out channel");
                broadcast::channel(self.capacity).0
            })
            .subscribe();

        Subscription {
            channel_id: channel_id.to_string(),
            rx: Some(rx),
            channels: Arc::clone(&self.channels),
        }
    }

    /// Deliver a value to all current subscribers.
    ///
    /// Returns the number of subscribers it reached; publishing to a channel
    /// with no subscribers is a silent no-op.
    fn publish(&self, channel_id: &str, value: T) -> usize {
        match self.channels.get(channel_id) {
            Some(tx) => tx.send(Arc::new(value)).unwrap_or_default(),
            None => 0,
        }
    }

    fn subscriber_count(&self, channel_id: &str) -> usize {
        self.channels
            .get(channel_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    fn has_channel(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    fn clear(&self, channel_id: &str) {
        self.channels.remove(channel_id);
    }
}

/// A live subscription to one channel's fan-out.
///
/// Dropping the subscription unregisters it; the last one out removes the
/// channel entry entirely.
#[derive(Debug)]
pub struct Subscription<T> {
    channel_id: String,
    rx: Option<broadcast::Receiver<Arc<T>>>,
    channels: SenderMap<T>,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
    /// Receive the next value on this channel.
    ///
    /// # Errors
    ///
    /// `Lagged` when this subscriber fell behind and dropped messages from
    /// its own queue; `Closed` once the channel has been cleared.
    pub async fn recv(&mut self) -> Result<Arc<T>, broadcast::error::RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }

    /// Non-blocking receive, mostly useful in tests.
    ///
    /// # Errors
    ///
    /// See [`broadcast::Receiver::try_recv`].
    pub fn try_recv(&mut self) -> Result<Arc<T>, broadcast::error::TryRecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.try_recv(),
            None => Err(broadcast::error::TryRecvError::Closed),
        }
    }

    /// The channel this subscription is attached to.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        // Drop our receiver before the emptiness check so the count
        // reflects this unsubscribe.
        self.rx.take();
        let removed = self
            .channels
            .remove_if(&self.channel_id, |_, tx| tx.receiver_count() == 0);
        if removed.is_some() {
            debug!(channel = %self.channel_id, "Removed empty fan-out channel");
        }
    }
}

/// Fan-out of structured [`FanoutEvent`]s. Events are never buffered.
#[derive(Debug)]
pub struct EventFanout {
    inner: Fanout<FanoutEvent>,
}

impl EventFanout {
    /// Create an event fan-out with the default queue depth.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Fanout::new(DEFAULT_CHANNEL_CAPACITY),
        }
    }

    /// Register a subscriber on a channel.
    #[must_use]
    pub fn subscribe(&self, channel_id: &str) -> Subscription<FanoutEvent> {
        self.inner.subscribe(channel_id)
    }

    /// Stamp and deliver an event, returning the delivered message.
    pub fn emit(
        &self,
        channel_id: &str,
        kind: impl Into<String>,
        content: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> FanoutEvent {
        let event = FanoutEvent::new(channel_id, kind, content, metadata);
        let delivered = self.inner.publish(channel_id, event.clone());
        trace!(channel = %channel_id, kind = %event.kind, delivered, "Event emitted");
        event
    }

    /// Deliver an already-stamped event as-is.
    ///
    /// This is the injection path for messages arriving from another
    /// instance over the bridge; it bypasses stamping so ids survive the
    /// hop, and callers must not publish it back out.
    pub fn emit_raw(&self, event: FanoutEvent) -> usize {
        let channel_id = event.channel_id.clone();
        self.inner.publish(&channel_id, event)
    }

    /// Number of live subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.inner.subscriber_count(channel_id)
    }

    /// Whether a channel entry currently exists (for leak checks).
    #[must_use]
    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.inner.has_channel(channel_id)
    }

    /// Drop a channel's subscriber set. Live receivers observe `Closed`.
    pub fn clear(&self, channel_id: &str) {
        self.inner.clear(channel_id);
    }
}

impl Default for EventFanout {
    fn default() -> Self {
        Self::new()
    }
}

/// Fan-out of [`ChatMessage`]s plus a bounded rolling history per channel.
///
/// The buffer is independent of the subscriber set: messages sent with zero
/// subscribers are still retained for late joiners.
#[derive(Debug)]
pub struct ChatFanout {
    inner: Fanout<ChatMessage>,
    buffers: DashMap<String, VecDeque<ChatMessage>>,
    buffer_capacity: usize,
}

impl ChatFanout {
    /// Create a chat fan-out with the default buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer_capacity(DEFAULT_CHAT_BUFFER_CAPACITY)
    }

    /// Create a chat fan-out with a specific rolling buffer capacity.
    #[must_use]
    pub fn with_buffer_capacity(buffer_capacity: usize) -> Self {
        Self {
            inner: Fanout::new(DEFAULT_CHANNEL_CAPACITY),
            buffers: DashMap::new(),
            buffer_capacity: buffer_capacity.max(1),
        }
    }

    /// Register a subscriber on a channel.
    #[must_use]
    pub fn subscribe(&self, channel_id: &str) -> Subscription<ChatMessage> {
        self.inner.subscribe(channel_id)
    }

    /// Stamp, buffer and deliver a chat message, returning it.
    pub fn send(
        &self,
        channel_id: &str,
        author: impl Into<String>,
        content: impl Into<String>,
        is_agent: bool,
    ) -> ChatMessage {
        let message = ChatMessage::new(channel_id, author, content, is_agent);
        self.buffer(message.clone());
        let delivered = self.inner.publish(channel_id, message.clone());
        trace!(channel = %channel_id, delivered, "Chat sent");
        message
    }

    /// Buffer and deliver an already-stamped message as-is.
    ///
    /// Bridge injection path; see [`EventFanout::emit_raw`].
    pub fn send_raw(&self, message: ChatMessage) -> usize {
        let channel_id = message.channel_id.clone();
        self.buffer(message.clone());
        self.inner.publish(&channel_id, message)
    }

    fn buffer(&self, message: ChatMessage) {
        let mut buffer = self
            .buffers
            .entry(message.channel_id.clone())
            .or_default();
        buffer.push_back(message);
        while buffer.len() > self.buffer_capacity {
            buffer.pop_front();
        }
    }

    /// Recent messages on a channel, newest-first, at most `limit`.
    #[must_use]
    pub fn recent(&self, channel_id: &str, limit: usize) -> Vec<ChatMessage> {
        self.buffers.get(channel_id).map_or_else(Vec::new, |buf| {
            buf.iter().rev().take(limit).cloned().collect()
        })
    }

    /// Number of live subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.inner.subscriber_count(channel_id)
    }

    /// Whether a channel's subscriber entry currently exists.
    #[must_use]
    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.inner.has_channel(channel_id)
    }

    /// Drop a channel's subscribers and history. Used on channel deletion.
    pub fn clear(&self, channel_id: &str) {
        self.inner.clear(channel_id);
        self.buffers.remove(channel_id);
    }
}

impl Default for ChatFanout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fanout_delivers_to_all_subscribers() {
        let fanout = EventFanout::new();

        let mut subs: Vec<_> = (0..3).map(|_| fanout.subscribe("ch_1")).collect();
        assert_eq!(fanout.subscriber_count("ch_1"), 3);

        let emitted = fanout.emit("ch_1", "command", json!({"n": 1}), None);

        for sub in &mut subs {
            let received = sub.recv().await.unwrap();
            assert_eq!(received.id, emitted.id);
        }

        // One unsubscribes; the rest still receive.
        subs.pop();
        let second = fanout.emit("ch_1", "success", json!({"n": 2}), None);
        for sub in &mut subs {
            assert_eq!(sub.recv().await.unwrap().id, second.id);
        }
        assert_eq!(fanout.subscriber_count("ch_1"), 2);
    }

    #[tokio::test]
    async fn test_per_subscriber_emission_order() {
        let fanout = EventFanout::new();
        let mut sub = fanout.subscribe("ch_1");

        fanout.emit("ch_1", "command", json!("look"), None);
        fanout.emit("ch_1", "success", json!("done"), None);

        assert_eq!(sub.recv().await.unwrap().kind, "command");
        assert_eq!(sub.recv().await.unwrap().kind, "success");
    }

    #[test]
    fn test_last_unsubscribe_removes_channel_entry() {
        let fanout = EventFanout::new();

        let first = fanout.subscribe("ch_1");
        let second = fanout.subscribe("ch_1");
        assert!(fanout.has_channel("ch_1"));

        drop(first);
        assert!(fanout.has_channel("ch_1"));
        assert_eq!(fanout.subscriber_count("ch_1"), 1);

        drop(second);
        assert!(!fanout.has_channel("ch_1"));
        assert_eq!(fanout.subscriber_count("ch_1"), 0);
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let fanout = EventFanout::new();
        let event = fanout.emit("ch_1", "command", json!(null), None);
        assert!(event.id.starts_with("evt_"));
        assert!(!fanout.has_channel("ch_1"));
    }

    #[test]
    fn test_chat_buffers_without_subscribers() {
        let chat = ChatFanout::new();
        chat.send("ch_1", "alice", "hello", false);
        chat.send("ch_1", "bob", "hi", false);

        let recent = chat.recent("ch_1", 10);
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].author, "bob");
        assert_eq!(recent[1].author, "alice");
    }

    #[test]
    fn test_chat_buffer_caps_at_capacity() {
        let chat = ChatFanout::with_buffer_capacity(5);
        for i in 0..12 {
            chat.send("ch_1", "alice", format!("m{i}"), false);
        }

        let recent = chat.recent("ch_1", 100);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].content, "m11");
        assert_eq!(recent[4].content, "m7");

        assert_eq!(chat.recent("ch_1", 2).len(), 2);
        assert!(chat.recent("ch_other", 10).is_empty());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_does_not_block_others() {
        let chat = ChatFanout::new();
        let mut slow = chat.subscribe("ch_1");
        let mut fast = chat.subscribe("ch_1");

        // Overflow the slow receiver's queue.
        for i in 0..DEFAULT_CHANNEL_CAPACITY + 10 {
            chat.send("ch_1", "alice", format!("m{i}"), false);
            // Keep the fast one drained.
            while fast.try_recv().is_ok() {}
        }

        // The slow receiver observes a lag, then keeps receiving.
        assert!(matches!(
            slow.recv().await,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_))
        ));
        assert!(slow.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_closes_subscribers() {
        let chat = ChatFanout::new();
        let mut sub = chat.subscribe("ch_1");
        chat.send("ch_1", "alice", "hello", false);
        assert!(sub.recv().await.is_ok());

        chat.clear("ch_1");
        assert!(matches!(
            sub.recv().await,
            Err(tokio::sync::broadcast::error::RecvError::Closed)
        ));
        assert!(chat.recent("ch_1", 10).is_empty());
    }

    #[test]
    fn test_raw_injection_preserves_ids() {
        let fanout = EventFanout::new();
        let mut sub = fanout.subscribe("ch_1");

        let foreign = FanoutEvent {
            id: "evt_remote".into(),
            channel_id: "ch_1".into(),
            kind: "command".into(),
            content: json!(1),
            metadata: None,
            created_at: 42,
        };
        assert_eq!(fanout.emit_raw(foreign), 1);
        let received = sub.try_recv().unwrap();
        assert_eq!(received.id, "evt_remote");
        assert_eq!(received.created_at, 42);
    }
}
