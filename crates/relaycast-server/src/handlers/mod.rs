//! HTTP surface and server wiring.

pub mod agent;
pub mod channels;
pub mod streams;

use anyhow::Result;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use relaycast_bridge::{NoopBridge, PubSubBridge};
use relaycast_core::{ChannelRegistry, ChatFanout, EventFanout, PresenceTracker, RegistryConfig};

use crate::config::Config;
use crate::metrics;

use agent::AgentConnectionManager;

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Channel identity and liveness.
    pub registry: Arc<ChannelRegistry>,
    /// Viewer counts.
    pub presence: Arc<PresenceTracker>,
    /// Structured event fan-out.
    pub events: Arc<EventFanout>,
    /// Chat fan-out and rolling history.
    pub chat: Arc<ChatFanout>,
    /// Agent connection lifecycle.
    pub agents: Arc<AgentConnectionManager>,
    /// Cross-instance relay (no-op unless configured).
    pub bridge: Arc<dyn PubSubBridge>,
}

impl AppState {
    /// Create new app state from configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ChannelRegistry::with_config(RegistryConfig {
            heartbeat_ttl: config.heartbeat_ttl(),
            ..RegistryConfig::default()
        }));
        let agents = Arc::new(AgentConnectionManager::new(
            Arc::clone(&registry),
            config.ping_interval(),
            config.reconnect_grace(),
        ));

        Self {
            registry,
            presence: Arc::new(PresenceTracker::new()),
            events: Arc::new(EventFanout::new()),
            chat: Arc::new(ChatFanout::with_buffer_capacity(
                config.chat.buffer_capacity,
            )),
            agents,
            bridge: select_bridge(&config),
            config,
        }
    }
}

/// Pick the bridge implementation from configuration.
///
/// The Redis-backed relay is not built in; a configured URL still gets the
/// no-op bridge so a single instance keeps working, it just logs the fact.
fn select_bridge(config: &Config) -> Arc<dyn PubSubBridge> {
    if let Some(url) = &config.bridge.url {
        warn!(
            %url,
            namespace = %config.bridge.namespace,
            "No pub/sub backend is built in; running with the bridge disabled"
        );
    }
    Arc::new(NoopBridge::new())
}

/// Assemble the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/channels",
            post(channels::register_channel).get(channels::list_channels),
        )
        .route(
            "/channels/:id",
            get(channels::get_channel).delete(channels::delete_channel),
        )
        .route("/channels/:id/heartbeat", post(channels::heartbeat))
        .route("/channels/:id/events", post(streams::push_events))
        .route(
            "/channels/:id/chat",
            post(streams::post_chat).get(streams::recent_chat),
        )
        .route("/channels/:id/stream", get(streams::event_stream))
        .route("/channels/:id/chat/stream", get(streams::chat_stream))
        .route("/channels/:id/agent", get(agent::agent_ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    match origin {
        None | Some("*") => CorsLayer::permissive(),
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => {
                warn!(%origin, "Unparseable CORS origin, falling back to permissive");
                CorsLayer::permissive()
            }
        },
    }
}

/// Run the relay server.
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn run_server(config: Config) -> Result<()> {
    if config.heartbeat.ttl_secs < config.heartbeat.sweep_interval_secs {
        warn!(
            ttl = config.heartbeat.ttl_secs,
            sweep = config.heartbeat.sweep_interval_secs,
            "Heartbeat TTL is shorter than the sweep interval; channel status may flap"
        );
    }

    let state = Arc::new(AppState::new(config.clone()));

    // Backend failures degrade to standalone operation, never a dead process.
    if let Err(e) = state.bridge.connect().await {
        warn!(error = %e, "Bridge connect failed, continuing standalone");
    }

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    spawn_sweep_task(Arc::clone(&state));

    let app = router(Arc::clone(&state));
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relaycast listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Background expiry sweep: offline on TTL, prune after long offline, and
/// dependent cleanup for everything a pruned channel owned.
fn spawn_sweep_task(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.sweep_interval());
        loop {
            ticker.tick().await;
            let stats = state.registry.sweep();
            for channel_id in &stats.pruned {
                state.presence.clear(channel_id);
                state.events.clear(channel_id);
                state.chat.clear(channel_id);
                state.agents.close_channel(channel_id);
            }
            if !stats.is_empty() {
                metrics::set_active_channels(state.registry.channel_count());
            }
        }
    });
}

/// Health check handler.
async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": state.registry.channel_count(),
        "viewers": state.presence.total_viewers(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycast_core::NewChannel;
    use serde_json::json;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default()))
    }

    #[tokio::test]
    async fn test_register_then_stream_two_events_in_order() {
        let state = test_state();

        // Register channel "Demo"; the response hands back id + apiKey.
        let channel = state.registry.register(NewChannel {
            name: "Demo".into(),
            ..NewChannel::default()
        });
        assert!(!channel.secret.is_empty());

        // A viewer subscribed before the push sees both events, in order.
        let mut subscription = state.events.subscribe(&channel.id);

        for (kind, content) in [("command", json!({"n": 1})), ("success", json!({"n": 2}))] {
            state.events.emit(&channel.id, kind, content, None);
        }

        let first = subscription.recv().await.unwrap();
        let second = subscription.recv().await.unwrap();
        assert_eq!(first.kind, "command");
        assert_eq!(second.kind, "success");
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_deleted_channel_cleanup_closes_viewers() {
        let state = test_state();
        let channel = state.registry.register(NewChannel {
            name: "Demo".into(),
            ..NewChannel::default()
        });

        let mut subscription = state.chat.subscribe(&channel.id);
        state.presence.increment(&channel.id);

        // The delete handler's cleanup path.
        assert_eq!(
            state.registry.deregister(&channel.id, &channel.secret),
            Ok(true)
        );
        state.presence.clear(&channel.id);
        state.events.clear(&channel.id);
        state.chat.clear(&channel.id);
        state.agents.close_channel(&channel.id);

        assert_eq!(state.presence.count(&channel.id), 0);
        assert!(matches!(
            subscription.recv().await,
            Err(tokio::sync::broadcast::error::RecvError::Closed)
        ));
    }
}
