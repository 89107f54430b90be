// crates/server/src/ws.rs
//! WebSocket fan-out: one client, one connection, one selected session.
//!
//! On connect the client gets a `sessions_list` and a `full_state` for a
//! server-chosen default. After that it receives only deltas affecting its
//! selected session (per the Registry membership filter), plus list updates
//! when sessions come and go. A client switches sessions with
//! `{type:"select_session"}` — other clients are unaffected.
//!
//! Ordering: deltas reach each connection in Registry emission order.
//! Backpressure: a slow client's incremental deltas are dropped before
//! snapshots; snapshot frames always queue.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use agent_town_types::{Agent, ClientFrame, Delta, ServerFrame};

use crate::auth::{authorize, token_from_query};
use crate::error::ApiError;
use crate::state::AppState;

/// Per-connection outbound queue depth.
const CLIENT_QUEUE: usize = 256;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let query_token = query.as_deref().and_then(token_from_query);
    if !authorize(state.auth_token.as_deref(), &headers, query_token.as_deref()) {
        return ApiError::Unauthorized.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-client subscription state.
struct ClientView {
    selected: Option<String>,
    /// Ids of agents the client currently sees — needed to route
    /// `agent_removed`, whose subject no longer exists for a membership
    /// check.
    member_ids: HashSet<String>,
}

impl ClientView {
    fn snapshot(state: &AppState, selected: Option<String>) -> (Self, Vec<ServerFrame>) {
        let sessions = state.registry.sessions_snapshot(selected.as_deref());
        let full = state.registry.full_state(selected.as_deref());
        let member_ids = full.agents.iter().map(|a| a.id.clone()).collect();
        (
            Self {
                selected,
                member_ids,
            },
            vec![
                ServerFrame::SessionsList { sessions },
                ServerFrame::FullState(full),
            ],
        )
    }

    fn resnapshot(&mut self, state: &AppState) -> Vec<ServerFrame> {
        let (view, frames) = Self::snapshot(state, self.selected.take());
        *self = view;
        frames
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before the snapshot so no delta can slip between them.
    let mut deltas = state.registry.subscribe();

    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(CLIENT_QUEUE);

    // Forward task: serialize queued frames onto the socket. Dies with the
    // connection; pending sends are abandoned.
    let forward = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let (mut view, frames) = ClientView::snapshot(&state, state.registry.default_session_for_client());
    for frame in frames {
        if out_tx.send(frame).await.is_err() {
            forward.abort();
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::SelectSession { session_id }) => {
                                if state.registry.session_exists(&session_id) {
                                    view.selected = Some(session_id);
                                    for frame in view.resnapshot(&state) {
                                        if out_tx.send(frame).await.is_err() {
                                            break;
                                        }
                                    }
                                } else {
                                    tracing::debug!(session_id = %session_id, "select for unknown session ignored");
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "unparseable client frame");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            delta = deltas.recv() => {
                match delta {
                    Ok(delta) => {
                        if !dispatch_delta(&state, &mut view, &out_tx, delta).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Fell behind the registry; resync with snapshots.
                        tracing::warn!(skipped, "ws client lagged; resyncing");
                        for frame in view.resnapshot(&state) {
                            if out_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    forward.abort();
}

/// Map one Registry delta onto this client's frames. Returns false when the
/// outbound queue is gone (disconnect).
async fn dispatch_delta(
    state: &Arc<AppState>,
    view: &mut ClientView,
    out_tx: &mpsc::Sender<ServerFrame>,
    delta: Delta,
) -> bool {
    match delta {
        Delta::AgentAdded(agent) => {
            if client_sees(state, view, &agent) {
                view.member_ids.insert(agent.id.clone());
                return send_delta(out_tx, ServerFrame::AgentAdded(agent)).await;
            }
        }
        Delta::AgentUpdated(agent) => {
            if client_sees(state, view, &agent) {
                view.member_ids.insert(agent.id.clone());
                return send_delta(out_tx, ServerFrame::AgentUpdate(agent)).await;
            }
        }
        Delta::AgentRemoved { id } => {
            if view.member_ids.remove(&id) {
                return send_delta(out_tx, ServerFrame::AgentRemoved { id }).await;
            }
        }
        Delta::TaskUpdated(task) => {
            let is_team = view
                .selected
                .as_deref()
                .map(|sid| state.registry.is_team_session(sid))
                .unwrap_or(false);
            if is_team {
                return send_delta(out_tx, ServerFrame::TaskUpdate(task)).await;
            }
        }
        // Task removals surface through the next snapshot.
        Delta::TaskRemoved { .. } => {}
        Delta::NewMessage(message) => {
            return send_delta(out_tx, ServerFrame::NewMessage(message)).await;
        }
        Delta::SessionStarted(session) => {
            if !send_delta(out_tx, ServerFrame::SessionStarted(session)).await {
                return false;
            }
            return send_sessions_list(state, view, out_tx).await;
        }
        Delta::SessionEnded { session_id } => {
            if !send_delta(
                out_tx,
                ServerFrame::SessionEnded {
                    session_id: session_id.clone(),
                },
            )
            .await
            {
                return false;
            }
            if view.selected.as_deref() == Some(session_id.as_str()) {
                // This client's session is gone; fall back to the server's
                // choice and resnapshot.
                view.selected = state
                    .registry
                    .selected_session()
                    .or_else(|| state.registry.default_session_for_client());
                for frame in view.resnapshot(state) {
                    if out_tx.send(frame).await.is_err() {
                        return false;
                    }
                }
                return true;
            }
            return send_sessions_list(state, view, out_tx).await;
        }
        Delta::SessionsListChanged => {
            return send_sessions_list(state, view, out_tx).await;
        }
        // Server-global selection changes only matter to future clients and
        // to fallbacks handled above.
        Delta::SelectionChanged { .. } => {}
    }
    true
}

fn client_sees(state: &Arc<AppState>, view: &ClientView, agent: &Agent) -> bool {
    view.selected
        .as_deref()
        .map(|sid| state.registry.is_member(agent, sid))
        .unwrap_or(false)
}

async fn send_sessions_list(
    state: &Arc<AppState>,
    view: &ClientView,
    out_tx: &mpsc::Sender<ServerFrame>,
) -> bool {
    let sessions = state.registry.sessions_snapshot(view.selected.as_deref());
    // Snapshots always queue, even on a congested connection.
    out_tx
        .send(ServerFrame::SessionsList { sessions })
        .await
        .is_ok()
}

/// Queue an incremental delta. On a full queue the delta is dropped —
/// snapshots will repair the client.
async fn send_delta(out_tx: &mpsc::Sender<ServerFrame>, frame: ServerFrame) -> bool {
    match out_tx.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(frame)) => {
            if frame.is_snapshot() {
                out_tx.send(frame).await.is_ok()
            } else {
                tracing::debug!("ws queue full; dropping delta");
                true
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
