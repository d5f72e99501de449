// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::auth::rate_limit::RateLimiter;
use crate::auth::Authenticator;
use crate::config::GatewayConfig;
use crate::handlers::Handlers;
use crate::metrics::Metrics;
use crate::store::SharedStore;
use crate::transport::hub::Hub;

/// Shared gateway state.
pub struct AppState {
    pub config: GatewayConfig,
    pub shutdown: CancellationToken,
    pub hub: Arc<Hub>,
    pub store: SharedStore,
    pub metrics: Arc<Metrics>,
    pub auth: Authenticator,
    pub rate_limiter: Arc<RateLimiter>,
    pub handlers: Handlers,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig, shutdown: CancellationToken) -> Self {
        let hub = Arc::new(Hub::new());
        let store = SharedStore::new(&config, shutdown.clone());
        let metrics = Arc::new(Metrics::new());
        let auth = Authenticator::new(
            config.jwt_secret.clone(),
            config.is_production(),
            store.clone(),
        );
        let rate_limiter = Arc::new(RateLimiter::new(
            config.max_connections_per_minute,
            std::time::Duration::from_secs(60),
        ));
        let handlers =
            Handlers::new(Arc::clone(&hub), store.clone(), Arc::clone(&metrics), &config);
        Self {
            config,
            shutdown,
            hub,
            store,
            metrics,
            auth,
            rate_limiter,
            handlers,
            started_at: Instant::now(),
        }
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
