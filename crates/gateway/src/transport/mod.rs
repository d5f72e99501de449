// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the collaboration gateway.

pub mod http;
pub mod hub;
pub mod wire;
pub mod ws;

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::GatewayConfig;
use crate::state::AppState;

/// Build the axum `Router` with all gateway routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        // Health (no auth)
        .route("/health", get(http::health))
        // Metrics
        .route("/metrics", get(http::metrics_summary))
        .route("/metrics/detailed", get(http::metrics_detailed))
        .route("/health/redis", get(http::store_health))
        // Admin
        .route("/admin/redis/cache", post(http::configure_cache))
        .route("/admin/auth/revoke", post(http::revoke_token))
        // WebSocket
        .route("/ws", get(ws::ws_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), http::metrics_gate))
        .layer(cors)
        .with_state(state)
}

/// CORS for the configured browser origin, with credentials. A wildcard or
/// unparseable origin falls back to the permissive credential-less layer.
fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    match config.cors_origin.parse::<HeaderValue>() {
        Ok(origin) if config.cors_origin != "*" => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        _ => CorsLayer::permissive(),
    }
}
