// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket handshake and the per-session event loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth;
use crate::events::UserSnapshot;
use crate::state::AppState;

/// Server ping cadence.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /ws` — authenticated WebSocket upgrade.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let ip = auth::client_ip(&headers, peer);

    if let Err(e) = state.rate_limiter.check(&ip) {
        state.metrics.error_occurred(e.code(), &ip);
        return e.to_http_response().into_response();
    }

    let token = auth::extract_token(&headers, query.token.as_deref());
    let user = match state.auth.authenticate(token.as_deref()).await {
        Ok(user) => user,
        Err(e) => {
            state.metrics.error_occurred(e.code(), &ip);
            return e.to_http_response().into_response();
        }
    };

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let country = headers
        .get("cf-ipcountry")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    ws.on_upgrade(move |socket| run_session(state, socket, user, ip, user_agent, country))
        .into_response()
}

/// Per-session loop: drain the outbound queue, heartbeat, and dispatch
/// inbound frames in order. Events from one session never run concurrently
/// with one another.
async fn run_session(
    state: Arc<AppState>,
    socket: WebSocket,
    user: UserSnapshot,
    ip: String,
    user_agent: Option<String>,
    country: Option<String>,
) {
    let (session, mut outbound) = state.hub.connect(user, ip, user_agent.clone()).await;
    state.metrics.connection_opened(user_agent.as_deref(), country.as_deref());
    info!(session_id = %session.id, email = %session.user.email, "session connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }

            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if ws_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = heartbeat.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.handlers.dispatch(&session, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(reason))) => {
                        debug!(session_id = %session.id, ?reason, "client closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session_id = %session.id, err = %e, "socket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.handlers.handle_disconnect(&session).await;
    state.hub.disconnect(&session.id).await;
    state.metrics.connection_closed();
    info!(session_id = %session.id, email = %session.user.email, "session disconnected");
}
