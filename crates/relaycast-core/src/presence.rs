//! Viewer presence tracking.
//!
//! Pure bookkeeping: one integer per channel, incremented when a viewer
//! stream opens and decremented when it closes. No zero-valued entries are
//! kept resident.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

/// Per-channel viewer counts.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    counts: DashMap<String, usize>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a viewer stream opening. Returns the new count.
    pub fn increment(&self, channel_id: &str) -> usize {
        let mut entry = self.counts.entry(channel_id.to_string()).or_insert(0);
        *entry += 1;
        let count = *entry;
        trace!(channel = %channel_id, viewers = count, "Viewer joined");
        count
    }

    /// Record a viewer stream closing. Floors at zero and removes the entry
    /// when it gets there. Returns the new count.
    pub fn decrement(&self, channel_id: &str) -> usize {
        match self.counts.entry(channel_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let count = entry.get().saturating_sub(1);
                if count == 0 {
                    entry.remove();
                } else {
                    *entry.get_mut() = count;
                }
                trace!(channel = %channel_id, viewers = count, "Viewer left");
                count
            }
            Entry::Vacant(_) => 0,
        }
    }

    /// Current viewer count for a channel (0 if absent).
    #[must_use]
    pub fn count(&self, channel_id: &str) -> usize {
        self.counts.get(channel_id).map_or(0, |c| *c)
    }

    /// Sum of viewers across all channels.
    #[must_use]
    pub fn total_viewers(&self) -> usize {
        self.counts.iter().map(|c| *c).sum()
    }

    /// Drop a channel's count entirely. Used on channel deletion.
    pub fn clear(&self, channel_id: &str) {
        self.counts.remove(channel_id);
    }

    /// Number of channels with at least one viewer.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_decrement_net() {
        let presence = PresenceTracker::new();

        assert_eq!(presence.increment("ch_1"), 1);
        assert_eq!(presence.increment("ch_1"), 2);
        assert_eq!(presence.increment("ch_1"), 3);
        assert_eq!(presence.decrement("ch_1"), 2);
        assert_eq!(presence.count("ch_1"), 2);
    }

    #[test]
    fn test_never_negative_and_no_zero_entries() {
        let presence = PresenceTracker::new();

        assert_eq!(presence.decrement("ch_1"), 0);
        assert_eq!(presence.count("ch_1"), 0);
        assert_eq!(presence.channel_count(), 0);

        presence.increment("ch_1");
        assert_eq!(presence.channel_count(), 1);
        presence.decrement("ch_1");
        // The entry must be gone, not parked at zero.
        assert_eq!(presence.channel_count(), 0);

        assert_eq!(presence.decrement("ch_1"), 0);
        assert_eq!(presence.channel_count(), 0);
    }

    #[test]
    fn test_total_viewers() {
        let presence = PresenceTracker::new();
        presence.increment("ch_1");
        presence.increment("ch_1");
        presence.increment("ch_2");

        assert_eq!(presence.total_viewers(), 3);

        presence.clear("ch_1");
        assert_eq!(presence.total_viewers(), 1);
        assert_eq!(presence.count("ch_1"), 0);
    }
}
