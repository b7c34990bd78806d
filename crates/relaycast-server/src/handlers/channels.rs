//! Channel registration and lifecycle endpoints.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use relaycast_core::channel::validate_channel_name;
use relaycast_core::registry::ChannelFilter;
use relaycast_core::{Channel, ChannelStatus, NewChannel};

use crate::auth::{extract_api_key, AuthQuery};
use crate::error::ApiError;
use crate::handlers::AppState;
use crate::metrics;

/// Response to a successful registration.
///
/// The only place the channel secret crosses the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub api_key: String,
    pub status: ChannelStatus,
}

impl From<Channel> for RegisterResponse {
    fn from(channel: Channel) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            category: channel.category,
            agent_id: channel.agent_id,
            api_key: channel.secret,
            status: channel.status,
        }
    }
}

/// `POST /channels`
pub async fn register_channel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewChannel>,
) -> Result<Json<RegisterResponse>, ApiError> {
    validate_channel_name(&body.name)
        .map_err(|reason| ApiError::UnprocessableEntity(reason.to_string()))?;

    let channel = state.registry.register(body);
    metrics::record_channel_registered();
    metrics::set_active_channels(state.registry.channel_count());
    Ok(Json(RegisterResponse::from(channel)))
}

/// Listing filters accepted on `GET /channels`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<ChannelStatus>,
    pub category: Option<String>,
}

/// `GET /channels`
pub async fn list_channels(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Channel>> {
    let filter = ChannelFilter {
        status: query.status,
        category: query.category,
    };
    Json(state.registry.list(&filter))
}

/// `GET /channels/:id`
pub async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    state
        .registry
        .get(&channel_id)
        .map(Json)
        .ok_or(ApiError::NotFound(channel_id))
}

/// `DELETE /channels/:id`
pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = extract_api_key(&headers, &query).ok_or(ApiError::Unauthorized)?;

    if !state.registry.deregister(&channel_id, &key)? {
        return Err(ApiError::NotFound(channel_id));
    }

    // Dependent cleanup: presence, fan-out, history, agent session.
    state.presence.clear(&channel_id);
    state.events.clear(&channel_id);
    state.chat.clear(&channel_id);
    state.agents.close_channel(&channel_id);
    metrics::set_active_channels(state.registry.channel_count());
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// `POST /channels/:id/heartbeat`
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = extract_api_key(&headers, &query).ok_or(ApiError::Unauthorized)?;
    state.registry.heartbeat(&channel_id, &key)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
