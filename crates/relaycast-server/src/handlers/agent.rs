//! The persistent agent connection.
//!
//! One authoritative connection per channel. The manager owns the active
//! session map and the pending disconnect timers; the WebSocket task talks
//! to it through `install` on open and `finish` on close.
//!
//! Reconnect handling is deliberate about ordering: a new connection first
//! cancels any pending grace timer, then explicitly retires a superseded
//! session before installing itself, and the close path only tears state
//! down when the closing connection is still the registered one. A stale
//! close from a superseded connection must never evict its replacement.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use relaycast_core::frames::EventPayload;
use relaycast_core::{AgentFrame, ChannelRegistry, ServerFrame};

use crate::auth::{extract_api_key, AuthQuery};
use crate::handlers::AppState;
use crate::metrics;

/// Commands delivered to an agent socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCommand {
    /// Write a frame to the agent.
    Send(ServerFrame),
    /// Close the connection; sent when the session is superseded or its
    /// channel is deleted.
    Close,
}

/// Write handle onto an agent socket task.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    tx: mpsc::UnboundedSender<AgentCommand>,
}

impl AgentHandle {
    /// Wrap a command sender.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<AgentCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, command: AgentCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

struct ActiveSession {
    conn_id: String,
    handle: AgentHandle,
    ping_task: JoinHandle<()>,
}

impl ActiveSession {
    /// Stop pinging and tell the socket task to close.
    fn retire(self) {
        self.ping_task.abort();
        self.handle.send(AgentCommand::Close);
    }
}

/// Owner of per-channel agent sessions and disconnect grace timers.
pub struct AgentConnectionManager {
    sessions: Arc<DashMap<String, ActiveSession>>,
    grace_timers: Arc<DashMap<String, JoinHandle<()>>>,
    registry: Arc<ChannelRegistry>,
    ping_interval: Duration,
    reconnect_grace: Duration,
}

impl AgentConnectionManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        registry: Arc<ChannelRegistry>,
        ping_interval: Duration,
        reconnect_grace: Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            grace_timers: Arc::new(DashMap::new()),
            registry,
            ping_interval,
            reconnect_grace,
        }
    }

    /// Install a newly authenticated connection as the channel's active
    /// session.
    ///
    /// Cancels a pending grace timer (a fast reconnect must not flap the
    /// channel offline) and explicitly retires any superseded session
    /// before the new one goes in.
    pub fn install(&self, channel_id: &str, conn_id: &str, handle: AgentHandle) {
        if let Some((_, timer)) = self.grace_timers.remove(channel_id) {
            timer.abort();
            debug!(channel = %channel_id, "Reconnect within grace window");
        }

        if let Some((_, previous)) = self.sessions.remove(channel_id) {
            info!(
                channel = %channel_id,
                old = %previous.conn_id,
                new = %conn_id,
                "Superseding active agent connection"
            );
            previous.retire();
        }

        let ping_handle = handle.clone();
        let interval = self.ping_interval;
        let ping_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !ping_handle.send(AgentCommand::Send(ServerFrame::Ping)) {
                    break;
                }
            }
        });

        self.sessions.insert(
            channel_id.to_string(),
            ActiveSession {
                conn_id: conn_id.to_string(),
                handle,
                ping_task,
            },
        );
        self.registry.mark_live(channel_id);
        debug!(channel = %channel_id, conn = %conn_id, "Agent connection active");
    }

    /// Handle a connection close.
    ///
    /// The identity check is the reconnect-race fix: only the currently
    /// registered connection may tear the session down and start the grace
    /// timer. Returns `false` for a stale close.
    pub fn finish(&self, channel_id: &str, conn_id: &str) -> bool {
        let Some((_, session)) = self
            .sessions
            .remove_if(channel_id, |_, s| s.conn_id == conn_id)
        else {
            debug!(channel = %channel_id, conn = %conn_id, "Stale close ignored");
            return false;
        };
        session.ping_task.abort();

        let sessions = Arc::clone(&self.sessions);
        let grace_timers = Arc::clone(&self.grace_timers);
        let registry = Arc::clone(&self.registry);
        let channel = channel_id.to_string();
        let grace = self.reconnect_grace;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if grace_timers.remove(&channel).is_some() && !sessions.contains_key(&channel) {
                registry.mark_offline(&channel);
                info!(channel = %channel, "Channel offline after grace window");
            }
        });
        if let Some(previous) = self.grace_timers.insert(channel_id.to_string(), timer) {
            previous.abort();
        }

        debug!(channel = %channel_id, conn = %conn_id, "Agent disconnected, grace timer started");
        true
    }

    /// Tear down everything for a deleted channel.
    pub fn close_channel(&self, channel_id: &str) {
        if let Some((_, session)) = self.sessions.remove(channel_id) {
            session.retire();
        }
        if let Some((_, timer)) = self.grace_timers.remove(channel_id) {
            timer.abort();
        }
    }

    /// Whether `conn_id` is the channel's current active connection.
    #[must_use]
    pub fn is_active(&self, channel_id: &str, conn_id: &str) -> bool {
        self.sessions
            .get(channel_id)
            .map_or(false, |s| s.conn_id == conn_id)
    }

    /// Whether any connection is active for the channel.
    #[must_use]
    pub fn has_session(&self, channel_id: &str) -> bool {
        self.sessions.contains_key(channel_id)
    }

    /// Whether a disconnect grace timer is pending for the channel.
    #[must_use]
    pub fn grace_pending(&self, channel_id: &str) -> bool {
        self.grace_timers.contains_key(channel_id)
    }

    /// Number of active agent sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Agent WebSocket upgrade handler.
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    Path(channel_id): Path<String>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let key = extract_api_key(&headers, &query);
    ws.on_upgrade(move |socket| run_agent_session(socket, state, channel_id, key))
}

/// Drive one agent connection from handshake to close.
async fn run_agent_session(
    socket: WebSocket,
    state: Arc<AppState>,
    channel_id: String,
    key: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Authenticate inside the socket so the agent gets an error frame
    // instead of a bare HTTP rejection.
    if state.registry.get(&channel_id).is_none() {
        let _ = send_frame(
            &mut sender,
            &ServerFrame::Error {
                message: format!("channel not found: {channel_id}"),
            },
        )
        .await;
        metrics::record_error("agent_unknown_channel");
        return;
    }
    let authorized = key.map_or(false, |k| state.registry.validate_secret(&channel_id, &k));
    if !authorized {
        let _ = send_frame(
            &mut sender,
            &ServerFrame::Error {
                message: "invalid api key".into(),
            },
        )
        .await;
        metrics::record_error("agent_auth");
        return;
    }

    let conn_id = format!("agent_{}", Uuid::new_v4().simple());
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let mut chat_sub = state.chat.subscribe(&channel_id);

    state
        .agents
        .install(&channel_id, &conn_id, AgentHandle::new(cmd_tx));
    metrics::record_agent_connected();

    let _ = send_frame(
        &mut sender,
        &ServerFrame::Connected {
            channel_id: channel_id.clone(),
        },
    )
    .await;

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(AgentCommand::Send(frame)) => {
                    if send_frame(&mut sender, &frame).await.is_err() {
                        break;
                    }
                }
                Some(AgentCommand::Close) | None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },

            chat = chat_sub.recv() => match chat {
                Ok(message) => {
                    // Only viewer chat goes back to the agent.
                    if !message.is_agent {
                        let frame = ServerFrame::Chat((*message).clone());
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                        metrics::record_chat_message("forwarded");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(channel = %channel_id, missed, "Agent chat forwarding lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    // Every inbound frame is a liveness signal.
                    if !state.registry.touch(&channel_id) {
                        break;
                    }
                    handle_agent_frame(&state, &channel_id, &text).await;
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    state.registry.touch(&channel_id);
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(channel = %channel_id, "Ignoring binary frame from agent");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(channel = %channel_id, error = %e, "Agent socket error");
                    break;
                }
            },
        }
    }

    metrics::record_agent_disconnected();
    state.agents.finish(&channel_id, &conn_id);
    debug!(channel = %channel_id, conn = %conn_id, "Agent session ended");
}

/// Decode and dispatch one inbound agent frame.
async fn handle_agent_frame(state: &Arc<AppState>, channel_id: &str, text: &str) {
    let frame: AgentFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(channel = %channel_id, error = %e, "Undecodable agent frame");
            metrics::record_error("agent_frame");
            return;
        }
    };

    match frame {
        AgentFrame::Event(payload) => emit_event(state, channel_id, payload).await,
        AgentFrame::Events(batch) => {
            for payload in batch {
                emit_event(state, channel_id, payload).await;
            }
        }
        AgentFrame::Chat(payload) => {
            let author = match payload.author {
                Some(author) => author,
                None => state
                    .registry
                    .get(channel_id)
                    .map(|c| c.name)
                    .unwrap_or_else(|| channel_id.to_string()),
            };
            let message = state.chat.send(channel_id, author, payload.content, true);
            metrics::record_chat_message("agent");
            if let Err(e) = state.bridge.publish_chat(channel_id, &message).await {
                warn!(channel = %channel_id, error = %e, "Bridge chat publish failed");
            }
        }
        AgentFrame::Pong => {
            // Heartbeat only; the touch already happened.
        }
    }
}

async fn emit_event(state: &Arc<AppState>, channel_id: &str, payload: EventPayload) {
    let event = state
        .events
        .emit(channel_id, payload.kind, payload.content, payload.metadata);
    metrics::record_event();
    if let Err(e) = state.bridge.publish_event(channel_id, &event).await {
        warn!(channel = %channel_id, error = %e, "Bridge event publish failed");
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycast_core::{ChannelStatus, NewChannel, RegistryConfig};

    const PING: Duration = Duration::from_secs(30);
    const GRACE: Duration = Duration::from_secs(30);

    fn manager() -> (Arc<AgentConnectionManager>, Arc<ChannelRegistry>, String) {
        let registry = Arc::new(ChannelRegistry::with_config(RegistryConfig::default()));
        let channel = registry.register(NewChannel {
            name: "Demo".into(),
            ..NewChannel::default()
        });
        let manager = Arc::new(AgentConnectionManager::new(
            Arc::clone(&registry),
            PING,
            GRACE,
        ));
        (manager, registry, channel.id)
    }

    fn connection() -> (AgentHandle, mpsc::UnboundedReceiver<AgentCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AgentHandle::new(tx), rx)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connection_supersedes_first() {
        let (manager, registry, channel) = manager();

        let (first, mut first_rx) = connection();
        manager.install(&channel, "conn_a", first);
        assert!(manager.is_active(&channel, "conn_a"));

        // Second connection for the same channel: the handshake must close
        // the first explicitly.
        let (second, _second_rx) = connection();
        manager.install(&channel, "conn_b", second);
        assert_eq!(first_rx.recv().await, Some(AgentCommand::Close));
        assert!(manager.is_active(&channel, "conn_b"));
        assert_eq!(manager.session_count(), 1);

        // The first connection's close-handler fires afterwards. It is
        // stale and must not evict the new session or start a grace timer.
        assert!(!manager.finish(&channel, "conn_a"));
        assert!(manager.is_active(&channel, "conn_b"));
        assert!(!manager.grace_pending(&channel));

        // The channel stays live as long as the second connection is up.
        tokio::time::advance(GRACE * 3).await;
        settle().await;
        assert_eq!(registry.get(&channel).unwrap().status, ChannelStatus::Live);

        // Only the second connection's close starts the grace countdown.
        assert!(manager.finish(&channel, "conn_b"));
        assert!(manager.grace_pending(&channel));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_keeps_channel_live() {
        let (manager, registry, channel) = manager();

        let (first, _rx) = connection();
        manager.install(&channel, "conn_a", first);
        assert!(manager.finish(&channel, "conn_a"));
        assert!(manager.grace_pending(&channel));
        settle().await;

        // 10 seconds into a 30 second grace window the agent comes back.
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(registry.get(&channel).unwrap().status, ChannelStatus::Live);

        let (second, _rx2) = connection();
        manager.install(&channel, "conn_b", second);
        assert!(!manager.grace_pending(&channel));

        // Long after the original deadline the channel is still live.
        tokio::time::advance(GRACE * 2).await;
        settle().await;
        assert_eq!(registry.get(&channel).unwrap().status, ChannelStatus::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_marks_channel_offline() {
        let (manager, registry, channel) = manager();

        let (handle, _rx) = connection();
        manager.install(&channel, "conn_a", handle);
        assert!(manager.finish(&channel, "conn_a"));
        settle().await;

        tokio::time::advance(GRACE + Duration::from_millis(1)).await;
        settle().await;

        assert_eq!(
            registry.get(&channel).unwrap().status,
            ChannelStatus::Offline
        );
        assert!(!manager.grace_pending(&channel));

        // A late reconnect flips it back.
        let (second, _rx2) = connection();
        manager.install(&channel, "conn_b", second);
        assert_eq!(registry.get(&channel).unwrap().status, ChannelStatus::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_channel_tears_down_session_and_timer() {
        let (manager, _registry, channel) = manager();

        let (handle, mut rx) = connection();
        manager.install(&channel, "conn_a", handle);
        manager.close_channel(&channel);

        assert_eq!(rx.recv().await, Some(AgentCommand::Close));
        assert!(!manager.has_session(&channel));
        assert!(!manager.grace_pending(&channel));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_task_sends_keepalives() {
        let (manager, _registry, channel) = manager();

        let (handle, mut rx) = connection();
        manager.install(&channel, "conn_a", handle);
        settle().await;

        tokio::time::advance(PING + Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(rx.recv().await, Some(AgentCommand::Send(ServerFrame::Ping)));
    }
}
