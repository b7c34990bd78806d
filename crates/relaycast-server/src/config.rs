//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RELAYCAST_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origin; `*` or absent means permissive.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: Option<String>,

    /// Bridge configuration.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Heartbeat and expiry configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Agent connection configuration.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Chat configuration.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Cross-instance bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Backend URL; absent disables the bridge.
    #[serde(default = "default_bridge_url")]
    pub url: Option<String>,

    /// Topic namespace prefix.
    #[serde(default = "default_bridge_namespace")]
    pub namespace: String,
}

/// Heartbeat and expiry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// A live channel with no heartbeat for this long goes offline.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the expiry sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Agent connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Keep-alive ping interval on the agent connection.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Grace window after an agent disconnect before the channel goes
    /// offline.
    #[serde(default = "default_reconnect_grace_secs")]
    pub reconnect_grace_secs: u64,
}

/// Chat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Rolling history capacity per channel.
    #[serde(default = "default_chat_buffer_capacity")]
    pub buffer_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RELAYCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("RELAYCAST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_cors_origin() -> Option<String> {
    std::env::var("RELAYCAST_CORS_ORIGIN").ok()
}

fn default_bridge_url() -> Option<String> {
    std::env::var("RELAYCAST_BRIDGE_URL").ok()
}

fn default_bridge_namespace() -> String {
    std::env::var("RELAYCAST_BRIDGE_NAMESPACE").unwrap_or_else(|_| "relaycast".to_string())
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    env_u64("RELAYCAST_HEARTBEAT_TTL_SECS", 60)
}

fn default_sweep_interval_secs() -> u64 {
    env_u64("RELAYCAST_SWEEP_INTERVAL_SECS", 15)
}

fn default_ping_interval_secs() -> u64 {
    env_u64("RELAYCAST_AGENT_PING_INTERVAL_SECS", 30)
}

fn default_reconnect_grace_secs() -> u64 {
    env_u64("RELAYCAST_RECONNECT_GRACE_SECS", 30)
}

fn default_chat_buffer_capacity() -> usize {
    env_u64("RELAYCAST_CHAT_BUFFER_CAPACITY", 100) as usize
}

fn default_metrics_port() -> u16 {
    std::env::var("RELAYCAST_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090)
}

fn env_u64(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            bridge: BridgeConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            agent: AgentConfig::default(),
            chat: ChatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            namespace: default_bridge_namespace(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            reconnect_grace_secs: default_reconnect_grace_secs(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_chat_buffer_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "relaycast.toml",
            "/etc/relaycast/relaycast.toml",
            "~/.config/relaycast/relaycast.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host/port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Heartbeat TTL as a duration.
    #[must_use]
    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat.ttl_secs)
    }

    /// Sweep interval as a duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.sweep_interval_secs)
    }

    /// Agent ping interval as a duration.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.agent.ping_interval_secs)
    }

    /// Reconnect grace window as a duration.
    #[must_use]
    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.agent.reconnect_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.heartbeat.ttl_secs, 60);
        assert_eq!(config.heartbeat.sweep_interval_secs, 15);
        assert_eq!(config.agent.reconnect_grace_secs, 30);
        assert_eq!(config.chat.buffer_capacity, 100);
        assert!(config.bridge.url.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [heartbeat]
            ttl_secs = 120
            sweep_interval_secs = 30

            [chat]
            buffer_capacity = 500

            [bridge]
            url = "redis://localhost:6379"
            namespace = "staging"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.heartbeat.ttl_secs, 120);
        assert_eq!(config.chat.buffer_capacity, 500);
        assert_eq!(config.bridge.url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.bridge.namespace, "staging");
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 8080,
            ..Config::default()
        };
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }
}
