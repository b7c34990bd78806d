//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CHANNELS_ACTIVE: &str = "relaycast_channels_active";
    pub const CHANNELS_REGISTERED_TOTAL: &str = "relaycast_channels_registered_total";
    pub const VIEWERS_ACTIVE: &str = "relaycast_viewers_active";
    pub const AGENT_SESSIONS_ACTIVE: &str = "relaycast_agent_sessions_active";
    pub const EVENTS_TOTAL: &str = "relaycast_events_total";
    pub const CHAT_MESSAGES_TOTAL: &str = "relaycast_chat_messages_total";
    pub const ERRORS_TOTAL: &str = "relaycast_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of registered channels");
    metrics::describe_counter!(
        names::CHANNELS_REGISTERED_TOTAL,
        "Total channels registered since server start"
    );
    metrics::describe_gauge!(names::VIEWERS_ACTIVE, "Current number of open viewer streams");
    metrics::describe_gauge!(
        names::AGENT_SESSIONS_ACTIVE,
        "Current number of active agent connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total events fanned out");
    metrics::describe_counter!(names::CHAT_MESSAGES_TOTAL, "Total chat messages relayed");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a channel registration.
pub fn record_channel_registered() {
    counter!(names::CHANNELS_REGISTERED_TOTAL).increment(1);
}

/// Update the registered channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record a fanned-out event.
pub fn record_event() {
    counter!(names::EVENTS_TOTAL).increment(1);
}

/// Record a relayed chat message.
pub fn record_chat_message(direction: &str) {
    counter!(names::CHAT_MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Record an agent session opening.
pub fn record_agent_connected() {
    gauge!(names::AGENT_SESSIONS_ACTIVE).increment(1.0);
}

/// Record an agent session closing.
pub fn record_agent_disconnected() {
    gauge!(names::AGENT_SESSIONS_ACTIVE).decrement(1.0);
}

/// Metrics guard for a viewer stream: counts up on open, down on drop.
pub struct ViewerMetricsGuard;

impl ViewerMetricsGuard {
    /// Create a new guard, recording the stream open.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::VIEWERS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ViewerMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ViewerMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::VIEWERS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_guard() {
        // Just test that it doesn't panic
        let _guard = ViewerMetricsGuard::new();
    }
}
