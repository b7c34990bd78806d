//! Event/chat ingestion and viewer streaming endpoints.
//!
//! Viewer streams are SSE: presence counts up on open and back down when
//! the client disconnects and the stream drops. The first frame is always a
//! `connected` acknowledgment.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use relaycast_core::frames::EventPayload;
use relaycast_core::{ChatMessage, PresenceTracker, Subscription};

use crate::auth::{extract_api_key, AuthQuery};
use crate::error::ApiError;
use crate::handlers::AppState;
use crate::metrics::{self, ViewerMetricsGuard};

/// Body of `POST /channels/:id/events`.
#[derive(Debug, Deserialize)]
pub struct PushEventsBody {
    pub events: Vec<EventPayload>,
}

/// `POST /channels/:id/events`
pub async fn push_events(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    Json(body): Json<PushEventsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = extract_api_key(&headers, &query).ok_or(ApiError::Unauthorized)?;
    if state.registry.get(&channel_id).is_none() {
        return Err(ApiError::NotFound(channel_id));
    }
    if !state.registry.validate_secret(&channel_id, &key) {
        return Err(ApiError::Forbidden);
    }

    let pushed = body.events.len();
    for payload in body.events {
        let event = state
            .events
            .emit(&channel_id, payload.kind, payload.content, payload.metadata);
        metrics::record_event();
        if let Err(e) = state.bridge.publish_event(&channel_id, &event).await {
            warn!(channel = %channel_id, error = %e, "Bridge event publish failed");
        }
    }

    Ok(Json(serde_json::json!({ "pushed": pushed })))
}

/// Body of `POST /channels/:id/chat`.
///
/// `isAgent` is advisory only; the server derives the authoritative value
/// from whether a valid secret was presented.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostChatBody {
    pub author: Option<String>,
    pub content: String,
    #[allow(dead_code)]
    pub is_agent: Option<bool>,
}

/// `POST /channels/:id/chat`
pub async fn post_chat(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    Json(body): Json<PostChatBody>,
) -> Result<Json<ChatMessage>, ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::UnprocessableEntity("empty chat content".into()));
    }
    let channel = state
        .registry
        .get(&channel_id)
        .ok_or_else(|| ApiError::NotFound(channel_id.clone()))?;

    // A valid secret makes this the agent speaking, under the channel's
    // name; anything else is a viewer message no matter what it claims.
    let key = extract_api_key(&headers, &query);
    let (author, is_agent) = match key {
        Some(ref k) if state.registry.validate_secret(&channel_id, k) => (channel.name, true),
        _ => (
            body.author.unwrap_or_else(|| "viewer".to_string()),
            false,
        ),
    };

    let message = state.chat.send(&channel_id, author, body.content, is_agent);
    metrics::record_chat_message(if is_agent { "agent" } else { "viewer" });
    if let Err(e) = state.bridge.publish_chat(&channel_id, &message).await {
        warn!(channel = %channel_id, error = %e, "Bridge chat publish failed");
    }

    Ok(Json(message))
}

/// Query of `GET /channels/:id/chat`.
#[derive(Debug, Default, Deserialize)]
pub struct RecentChatQuery {
    pub limit: Option<usize>,
    pub since: Option<u64>,
}

/// `GET /channels/:id/chat`
pub async fn recent_chat(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(query): Query<RecentChatQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    if state.registry.get(&channel_id).is_none() {
        return Err(ApiError::NotFound(channel_id));
    }

    let limit = query.limit.unwrap_or(state.config.chat.buffer_capacity);
    let mut messages = state.chat.recent(&channel_id, limit);
    if let Some(since) = query.since {
        messages.retain(|m| m.created_at > since);
    }
    Ok(Json(messages))
}

/// Keeps the viewer accounted for as long as its stream lives.
struct PresenceGuard {
    presence: Arc<PresenceTracker>,
    channel_id: String,
    _metrics: ViewerMetricsGuard,
}

impl PresenceGuard {
    fn new(presence: Arc<PresenceTracker>, channel_id: String) -> Self {
        presence.increment(&channel_id);
        Self {
            presence,
            channel_id,
            _metrics: ViewerMetricsGuard::new(),
        }
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.presence.decrement(&self.channel_id);
    }
}

/// `GET /channels/:id/stream`
pub async fn event_stream(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if state.registry.get(&channel_id).is_none() {
        return Err(ApiError::NotFound(channel_id));
    }

    let subscription = state.events.subscribe(&channel_id);
    let guard = PresenceGuard::new(Arc::clone(&state.presence), channel_id.clone());

    let stream = viewer_stream(subscription, guard, channel_id, |event| {
        Event::default()
            .event(event.kind.clone())
            .json_data(event)
            .ok()
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `GET /channels/:id/chat/stream`
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if state.registry.get(&channel_id).is_none() {
        return Err(ApiError::NotFound(channel_id));
    }

    let subscription = state.chat.subscribe(&channel_id);
    let guard = PresenceGuard::new(Arc::clone(&state.presence), channel_id.clone());

    let stream = viewer_stream(subscription, guard, channel_id, |message| {
        Event::default().event("chat").json_data(message).ok()
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Build the SSE stream for one viewer: a `connected` acknowledgment, then
/// fan-out deliveries until the subscription closes. The subscription and
/// the presence guard live inside the stream, so a client disconnect
/// unsubscribes and decrements presence on drop.
fn viewer_stream<T, F>(
    subscription: Subscription<T>,
    guard: PresenceGuard,
    channel_id: String,
    to_event: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Clone + serde::Serialize + Send + Sync + 'static,
    F: Fn(&T) -> Option<Event> + Send + 'static,
{
    let connected = tokio_stream::once(Ok::<_, Infallible>(
        Event::default()
            .event("connected")
            .data(serde_json::json!({ "channelId": channel_id }).to_string()),
    ));

    let deliveries = futures_util::stream::unfold(
        (subscription, guard, to_event),
        |(mut subscription, guard, to_event)| async move {
            loop {
                match subscription.recv().await {
                    Ok(value) => {
                        // An unserializable payload is skipped, not fatal.
                        let Some(event) = to_event(&value) else {
                            continue;
                        };
                        return Some((Ok(event), (subscription, guard, to_event)));
                    }
                    Err(RecvError::Lagged(missed)) => {
                        let event = Event::default()
                            .event("lagged")
                            .data(serde_json::json!({ "missed": missed }).to_string());
                        return Some((Ok(event), (subscription, guard, to_event)));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    );

    connected.chain(deliveries)
}
