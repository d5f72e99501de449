// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collab-gateway: real-time presence and fan-out for workspaces,
//! collections, notes, and agendas, backed by a Redis-shaped shared store.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod state;
pub mod store;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::state::AppState;
use crate::transport::build_router;

/// Run the gateway until shutdown.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(config.clone(), shutdown.clone()));

    if config.is_production() && config.jwt_secret.is_none() {
        warn!("JWT_SECRET is unset in production; all handshakes will be rejected");
    }

    // Shared store: connect now, keep retrying in the background on failure.
    if let Err(e) = state.store.connect().await {
        warn!(err = %e, "shared store unreachable at startup, serving degraded");
        state.store.spawn_connect_loop();
    }
    state.store.spawn_cache_sweeper();

    // Operational loops.
    state.handlers.spawn_sweepers(&config, shutdown.clone());
    state.rate_limiter.spawn_sweeper(shutdown.clone());
    metrics::loops::spawn_system_loop(
        Arc::clone(&state.metrics),
        state.store.clone(),
        shutdown.clone(),
    );
    metrics::loops::spawn_snapshot_loop(Arc::clone(&state.metrics), shutdown.clone());
    metrics::loops::spawn_alert_loop(Arc::clone(&state.metrics), shutdown.clone());
    metrics::loops::spawn_cleanup_loop(
        Arc::clone(&state.metrics),
        state.store.clone(),
        shutdown.clone(),
    );

    // Ctrl-C triggers a clean shutdown.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("collab-gateway listening on {addr}");
    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    state.store.close().await;
    info!("collab-gateway stopped");
    Ok(())
}
