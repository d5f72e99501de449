// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: health, metrics, and admin endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::constant_time_eq;
use crate::error::GatewayError;
use crate::state::AppState;
use crate::store::HealthStatus;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub uptime: u64,
    pub environment: String,
}

#[derive(Debug, Deserialize)]
pub struct CacheConfigRequest {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub ttl: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
    #[serde(default)]
    pub ttl: Option<u64>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health` — liveness, no auth.
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_owned(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime: s.started_at.elapsed().as_secs(),
        environment: s.config.env.clone(),
    })
}

/// `GET /metrics`
pub async fn metrics_summary(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(s.metrics.summary(false))
}

/// `GET /metrics/detailed`
pub async fn metrics_detailed(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(s.metrics.summary(true))
}

/// `GET /health/redis` — probes the shared store; the HTTP status mirrors
/// the probe result (200 / 429 / 503).
pub async fn store_health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let health = s.store.health_check().await;
    let status = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::TOO_MANY_REQUESTS,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = json!({
        "status": health.status,
        "responseTime": health.response_time_ms,
        "error": health.error,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "metrics": s.store.stats(),
    });
    (status, Json(body))
}

/// `POST /admin/redis/cache` — runtime cache reconfiguration.
pub async fn configure_cache(
    State(s): State<Arc<AppState>>,
    Json(req): Json<CacheConfigRequest>,
) -> impl IntoResponse {
    let config = s.store.configure_cache(req.enabled, req.ttl);
    Json(json!({"success": true, "config": config}))
}

/// `POST /admin/auth/revoke` — blacklist a bearer token.
pub async fn revoke_token(
    State(s): State<Arc<AppState>>,
    Json(req): Json<RevokeRequest>,
) -> Response {
    match s.auth.revoke(&req.token, req.ttl.map(Duration::from_secs)).await {
        Ok(()) => Json(json!({"success": true})).into_response(),
        Err(e) => GatewayError::from(e).to_http_response().into_response(),
    }
}

// -- Auth gate ----------------------------------------------------------------

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// In production, everything except `/health` and the WebSocket upgrade
/// requires the metrics API key.
pub async fn metrics_gate(
    State(s): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/health" || path == "/ws" || !s.config.is_production() {
        return next.run(req).await;
    }
    let authorized = match (s.config.metrics_api_key.as_deref(), bearer(req.headers())) {
        (Some(key), Some(token)) => constant_time_eq(token, key),
        _ => false,
    };
    if !authorized {
        return GatewayError::AuthRejected("metrics key required".into())
            .to_http_response()
            .into_response();
    }
    next.run(req).await
}
