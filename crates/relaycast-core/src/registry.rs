//! Channel registry: identity, authentication and timed expiry.
//!
//! The registry is the single owner of channel state. Mutating operations
//! authenticate with the channel secret; liveness toggles (`mark_live`,
//! `mark_offline`, `touch`) are internal paths used by the connection
//! manager after it has already authenticated the agent.

use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelId, ChannelStatus, NewChannel};
use crate::now_ms;

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Unknown channel id.
    #[error("channel not found: {0}")]
    NotFound(String),

    /// Presented secret does not match the channel's secret.
    #[error("channel secret mismatch")]
    Forbidden,
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// A live channel with no heartbeat for longer than this goes offline.
    pub heartbeat_ttl: Duration,
    /// An offline channel with no heartbeat for longer than this is deleted.
    pub prune_after: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl: Duration::from_secs(60),
            prune_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Listing filter for [`ChannelRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    /// Only channels in this status.
    pub status: Option<ChannelStatus>,
    /// Only channels with this category.
    pub category: Option<String>,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Default)]
pub struct SweepStats {
    /// Channels that transitioned live -> offline this sweep.
    pub went_offline: Vec<ChannelId>,
    /// Channels deleted after being offline past the prune threshold.
    pub pruned: Vec<ChannelId>,
}

impl SweepStats {
    /// True when the sweep changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.went_offline.is_empty() && self.pruned.is_empty()
    }
}

/// The channel registry.
///
/// All state is process-local; on restart agents must re-register.
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Channel>,
    config: RegistryConfig,
}

impl ChannelRegistry {
    /// Create a registry with default expiry settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom expiry settings.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            channels: DashMap::new(),
            config,
        }
    }

    /// Register a new channel and return it, secret included.
    ///
    /// This is the only place the secret leaves the registry.
    pub fn register(&self, params: NewChannel) -> Channel {
        let channel = Channel::create(params);
        info!(channel = %channel.id, name = %channel.name, "Channel registered");
        self.channels.insert(channel.id.clone(), channel.clone());
        channel
    }

    /// Look up a channel by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Channel> {
        self.channels.get(id).map(|c| c.clone())
    }

    /// List channels matching the filter, newest-registered-first.
    #[must_use]
    pub fn list(&self, filter: &ChannelFilter) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .filter(|c| {
                filter.status.map_or(true, |s| c.status == s)
                    && filter
                        .category
                        .as_deref()
                        .map_or(true, |cat| c.category.as_deref() == Some(cat))
            })
            .map(|c| c.clone())
            .collect();
        channels.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        channels
    }

    /// Number of registered channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Record an authenticated heartbeat: refresh the staleness clock and
    /// force the channel live.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `Forbidden` on secret mismatch; the
    /// heartbeat timestamp is left untouched in both cases.
    pub fn heartbeat(&self, id: &str, secret: &str) -> Result<(), RegistryError> {
        let mut channel = self
            .channels
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if channel.secret != secret {
            return Err(RegistryError::Forbidden);
        }
        channel.last_heartbeat = now_ms();
        channel.status = ChannelStatus::Live;
        Ok(())
    }

    /// Refresh liveness without a secret check.
    ///
    /// Used for inbound frames on an already-authenticated agent connection.
    /// Returns `false` if the channel no longer exists.
    pub fn touch(&self, id: &str) -> bool {
        match self.channels.get_mut(id) {
            Some(mut channel) => {
                channel.last_heartbeat = now_ms();
                channel.status = ChannelStatus::Live;
                true
            }
            None => false,
        }
    }

    /// Remove a channel.
    ///
    /// Returns `Ok(false)` if the channel was already gone. Dependent state
    /// (presence, fan-out, agent session) is the caller's to clean up.
    ///
    /// # Errors
    ///
    /// `Forbidden` on secret mismatch.
    pub fn deregister(&self, id: &str, secret: &str) -> Result<bool, RegistryError> {
        {
            let Some(channel) = self.channels.get(id) else {
                return Ok(false);
            };
            if channel.secret != secret {
                return Err(RegistryError::Forbidden);
            }
        }
        self.channels.remove(id);
        info!(channel = %id, "Channel deregistered");
        Ok(true)
    }

    /// Check a secret without failing.
    #[must_use]
    pub fn validate_secret(&self, id: &str, secret: &str) -> bool {
        self.channels
            .get(id)
            .map_or(false, |c| c.secret == secret)
    }

    /// Mark a channel live. Returns `false` if it does not exist.
    pub fn mark_live(&self, id: &str) -> bool {
        self.set_status(id, ChannelStatus::Live)
    }

    /// Mark a channel offline. Returns `false` if it does not exist.
    pub fn mark_offline(&self, id: &str) -> bool {
        self.set_status(id, ChannelStatus::Offline)
    }

    fn set_status(&self, id: &str, status: ChannelStatus) -> bool {
        match self.channels.get_mut(id) {
            Some(mut channel) => {
                if channel.status != status {
                    debug!(channel = %id, ?status, "Channel status changed");
                }
                channel.status = status;
                true
            }
            None => false,
        }
    }

    /// Run one expiry sweep against the current clock.
    pub fn sweep(&self) -> SweepStats {
        self.sweep_at(now_ms())
    }

    /// Run one expiry sweep against an explicit clock.
    ///
    /// Two-stage policy: live channels stale past the TTL go offline;
    /// offline channels stale past the prune threshold are deleted. A
    /// channel transitions at most one stage per sweep, so even a long-dead
    /// live channel is observably offline for one sweep before deletion.
    pub fn sweep_at(&self, now: u64) -> SweepStats {
        let ttl_ms = self.config.heartbeat_ttl.as_millis() as u64;
        let prune_ms = self.config.prune_after.as_millis() as u64;
        let mut stats = SweepStats::default();

        for mut entry in self.channels.iter_mut() {
            let stale = now.saturating_sub(entry.last_heartbeat);
            match entry.status {
                ChannelStatus::Live if stale > ttl_ms => {
                    entry.status = ChannelStatus::Offline;
                    stats.went_offline.push(entry.id.clone());
                }
                ChannelStatus::Offline if stale > prune_ms => {
                    stats.pruned.push(entry.id.clone());
                }
                _ => {}
            }
        }

        for id in &stats.pruned {
            self.channels.remove(id);
        }

        if !stats.is_empty() {
            info!(
                went_offline = stats.went_offline.len(),
                pruned = stats.pruned.len(),
                "Expiry sweep"
            );
        }
        stats
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
