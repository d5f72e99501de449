// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the collaboration gateway.
#[derive(Debug, Clone, clap::Parser)]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3001, env = "PORT")]
    pub port: u16,

    /// Deployment environment ("production" tightens auth and log format).
    #[arg(long, default_value = "development", env = "NODE_ENV")]
    pub env: String,

    /// Symmetric secret for bearer-token verification (HS256).
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Shared-store host.
    #[arg(long, default_value = "127.0.0.1", env = "REDIS_HOST")]
    pub redis_host: String,

    /// Shared-store port.
    #[arg(long, default_value_t = 6379, env = "REDIS_PORT")]
    pub redis_port: u16,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Origin allowed to open browser connections.
    #[arg(long, default_value = "http://localhost:3000", env = "CORS_ORIGIN")]
    pub cors_origin: String,

    /// Bearer key protecting /metrics and admin endpoints in production.
    #[arg(long, env = "METRICS_API_KEY")]
    pub metrics_api_key: Option<String>,

    /// Maximum retained chat messages per workspace.
    #[arg(long, default_value_t = 100, env = "MESSAGE_LIMIT")]
    pub message_limit: usize,

    /// Typing-indicator timeout (also the sweep interval) in milliseconds.
    #[arg(long, default_value_t = 5000, env = "TYPING_TIMEOUT_MS")]
    pub typing_timeout_ms: u64,

    /// Grace window for reconnecting with the same email after a disconnect.
    #[arg(long, default_value_t = 5000, env = "RECONNECT_GRACE_MS")]
    pub reconnect_grace_ms: u64,

    /// Per-entry TTL of the local read-through cache in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "CACHE_TTL_MS")]
    pub cache_ttl_ms: u64,

    /// Upper bound on local cache entries.
    #[arg(long, default_value_t = 10_000, env = "CACHE_MAX_ENTRIES")]
    pub cache_max_entries: usize,

    /// Connection handshakes allowed per client IP per minute.
    #[arg(long, default_value_t = 60, env = "MAX_CONNECTIONS_PER_MINUTE")]
    pub max_connections_per_minute: u32,

    /// Consecutive store failures before the circuit breaker opens.
    #[arg(long, default_value_t = 5, env = "FAILURE_THRESHOLD")]
    pub failure_threshold: u32,

    /// How long the breaker stays open before the next probe, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "RESET_TIMEOUT_MS")]
    pub reset_timeout_ms: u64,

    /// Base delay for store reconnect backoff in milliseconds.
    #[arg(long, default_value_t = 1000, env = "RECONNECT_DELAY_MS")]
    pub reconnect_delay_ms: u64,

    /// Reconnect attempts before backing off to the long retry cycle.
    #[arg(long, default_value_t = 10, env = "MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// Duplicate-presence sweep interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "DUPLICATE_SWEEP_MS")]
    pub duplicate_sweep_ms: u64,
}

impl GatewayConfig {
    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }

    pub fn typing_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn reconnect_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_grace_ms)
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn reset_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn duplicate_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.duplicate_sweep_ms)
    }
}

#[cfg(test)]
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        env: "test".into(),
        jwt_secret: Some("test-secret".into()),
        redis_host: "127.0.0.1".into(),
        redis_port: 6379,
        log_level: "info".into(),
        cors_origin: "http://localhost:3000".into(),
        metrics_api_key: None,
        message_limit: 100,
        typing_timeout_ms: 5000,
        reconnect_grace_ms: 5000,
        cache_ttl_ms: 30_000,
        cache_max_entries: 10_000,
        max_connections_per_minute: 60,
        failure_threshold: 5,
        reset_timeout_ms: 30_000,
        reconnect_delay_ms: 1000,
        max_reconnect_attempts: 10,
        duplicate_sweep_ms: 30_000,
    }
}
