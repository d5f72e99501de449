// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared-state client: a Redis-backed key-value + pub/sub wrapper with a
//! local read-through cache, a circuit breaker, and jittered reconnect.
//!
//! Every public operation returns a typed result and never panics. While the
//! store is unreachable the breaker absorbs the failures and callers degrade
//! to local-only behavior.

pub mod breaker;
pub mod cache;
#[cfg(test)]
pub(crate) mod memory;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use breaker::{BreakerState, CircuitBreaker};
use cache::{CacheConfig, CacheStats, LocalCache};

/// Round-trip above which a reachable store reports `degraded`.
const HEALTHY_LATENCY_MS: u64 = 100;
/// Breaker hold after exhausting the reconnect attempt budget.
const EXHAUSTED_HOLD: Duration = Duration::from_secs(60);
/// Pause before restarting the reconnect cycle after exhaustion.
const EXHAUSTED_RETRY: Duration = Duration::from_secs(300);
/// Cache eviction sweep interval.
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Breaker open or transport not connected; the store was not contacted.
    Unavailable,
    /// The store was contacted and the operation failed.
    Operation(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => f.write_str("shared store unavailable"),
            Self::Operation(e) => write!(f, "shared store operation failed: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for crate::error::GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable => Self::StoreUnavailable,
            StoreError::Operation(d) => Self::StoreOperationFailed(d),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Result of a `health_check` probe.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time store/cache counters for the metrics registry.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub connected: bool,
    pub breaker_open: bool,
    pub consecutive_failures: u32,
    pub cache: CacheStats,
}

struct StoreInner {
    url: String,
    conn: RwLock<Option<ConnectionManager>>,
    client: RwLock<Option<redis::Client>>,
    cache: LocalCache,
    breaker: CircuitBreaker,
    connected: AtomicBool,
    attempts: AtomicU32,
    reconnect_delay: Duration,
    max_attempts: u32,
    shutdown: CancellationToken,
    #[cfg(test)]
    memory: Option<Arc<memory::MemoryStore>>,
}

/// Process-singleton shared-state client. Cheap to clone.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<StoreInner>,
}

impl SharedStore {
    pub fn new(config: &GatewayConfig, shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                url: config.redis_url(),
                conn: RwLock::new(None),
                client: RwLock::new(None),
                cache: LocalCache::new(config.cache_ttl(), config.cache_max_entries),
                breaker: CircuitBreaker::new(config.failure_threshold, config.reset_timeout()),
                connected: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                reconnect_delay: config.reconnect_delay(),
                max_attempts: config.max_reconnect_attempts.max(1),
                shutdown,
                #[cfg(test)]
                memory: None,
            }),
        }
    }

    /// Test-only store backed by a shared in-memory map instead of Redis.
    /// Instances built over one backing see each other's writes, each with
    /// its own local cache, like gateway instances sharing one Redis.
    #[cfg(test)]
    pub(crate) fn in_memory(config: &GatewayConfig, backing: Arc<memory::MemoryStore>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                url: config.redis_url(),
                conn: RwLock::new(None),
                client: RwLock::new(None),
                cache: LocalCache::new(config.cache_ttl(), config.cache_max_entries),
                breaker: CircuitBreaker::new(config.failure_threshold, config.reset_timeout()),
                connected: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                reconnect_delay: config.reconnect_delay(),
                max_attempts: config.max_reconnect_attempts.max(1),
                shutdown: CancellationToken::new(),
                memory: Some(backing),
            }),
        }
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Establish the managed connection. Safe to call repeatedly.
    pub async fn connect(&self) -> StoreResult<()> {
        let client = redis::Client::open(self.inner.url.as_str())
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        *self.inner.client.write().await = Some(client);
        *self.inner.conn.write().await = Some(manager);
        self.inner.connected.store(true, Ordering::Relaxed);
        self.inner.attempts.store(0, Ordering::Relaxed);
        self.inner.breaker.record_success();
        info!(url = %self.inner.url, "shared store connected");
        Ok(())
    }

    /// Connect in the background with jittered exponential backoff. After
    /// `max_attempts` failures the breaker is held open for a minute and the
    /// cycle restarts five minutes later with a fresh attempt counter.
    pub fn spawn_connect_loop(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                if store.inner.shutdown.is_cancelled() {
                    return;
                }
                match store.connect().await {
                    Ok(()) => return,
                    Err(e) => {
                        let attempt = store.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(attempt, err = %e, "shared store connect failed");
                        if attempt >= store.inner.max_attempts {
                            warn!(
                                attempts = attempt,
                                "reconnect budget exhausted, backing off"
                            );
                            store.inner.breaker.force_open(EXHAUSTED_HOLD);
                            store.inner.attempts.store(0, Ordering::Relaxed);
                            tokio::select! {
                                _ = store.inner.shutdown.cancelled() => return,
                                _ = tokio::time::sleep(EXHAUSTED_RETRY) => {}
                            }
                        } else {
                            let delay = backoff_delay(store.inner.reconnect_delay, attempt);
                            tokio::select! {
                                _ = store.inner.shutdown.cancelled() => return,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        });
    }

    /// Periodically evict expired cache entries.
    pub fn spawn_cache_sweeper(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = store.inner.shutdown.cancelled() => return,
                    _ = timer.tick() => {}
                }
                let evicted = store.inner.cache.sweep_expired();
                if evicted > 0 {
                    debug!(evicted, "cache sweep");
                }
            }
        });
    }

    /// Drop the connection; subsequent operations fail until reconnected.
    pub async fn close(&self) {
        *self.inner.conn.write().await = None;
        *self.inner.client.write().await = None;
        self.inner.connected.store(false, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    // -- Internals ------------------------------------------------------------

    async fn conn(&self) -> StoreResult<ConnectionManager> {
        if !self.inner.breaker.allow() {
            return Err(StoreError::Unavailable);
        }
        match self.inner.conn.read().await.clone() {
            Some(conn) => Ok(conn),
            None => {
                self.record_failure("not connected");
                Err(StoreError::Unavailable)
            }
        }
    }

    fn record_failure(&self, context: &str) {
        if self.inner.breaker.record_failure() {
            warn!(context, "circuit breaker opened");
        }
    }

    fn op_err(&self, e: redis::RedisError) -> StoreError {
        self.record_failure("operation error");
        StoreError::Operation(e.to_string())
    }

    // -- Key-value operations -------------------------------------------------

    /// Write a JSON value, optionally with a TTL. Updates the local cache.
    pub async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> StoreResult<()> {
        #[cfg(test)]
        if let Some(memory) = &self.inner.memory {
            memory.set(key, value.clone());
            self.inner.cache.put(key, value.clone());
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let encoded = value.to_string();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(&encoded);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        cmd.query_async::<()>(&mut conn).await.map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        self.inner.cache.put(key, value.clone());
        Ok(())
    }

    /// Read a value, serving from the local cache unless bypassed. Values
    /// that are not valid JSON come back as plain strings.
    pub async fn get(&self, key: &str, bypass_cache: bool) -> StoreResult<Option<Value>> {
        if !bypass_cache {
            if let Some(hit) = self.inner.cache.get(key) {
                return Ok(Some(hit));
            }
        }
        #[cfg(test)]
        if let Some(memory) = &self.inner.memory {
            let value = memory.get(key);
            if let Some(ref value) = value {
                self.inner.cache.put(key, value.clone());
            }
            return Ok(value);
        }
        let mut conn = self.conn().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        Ok(raw.map(|raw| {
            let value = decode_value(raw);
            self.inner.cache.put(key, value.clone());
            value
        }))
    }

    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        #[cfg(test)]
        if let Some(memory) = &self.inner.memory {
            memory.delete(key);
            self.inner.cache.remove(key);
            return Ok(());
        }
        let mut conn = self.conn().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        self.inner.cache.remove(key);
        Ok(())
    }

    pub async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Value>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        Ok(raw.into_iter().map(|r| r.map(decode_value)).collect())
    }

    pub async fn mset(&self, pairs: &[(String, Value)]) -> StoreResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("MSET");
        for (key, value) in pairs {
            cmd.arg(key).arg(value.to_string());
        }
        cmd.query_async::<()>(&mut conn).await.map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        for (key, value) in pairs {
            self.inner.cache.put(key, value.clone());
        }
        Ok(())
    }

    pub async fn increment(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        let total: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        self.inner.cache.put(key, Value::from(total));
        Ok(total)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        Ok(())
    }

    /// Cursor-scan all keys matching a glob pattern.
    pub async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        #[cfg(test)]
        if let Some(memory) = &self.inner.memory {
            return Ok(memory.keys(pattern));
        }
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| self.op_err(e))?;
            found.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        self.inner.breaker.record_success();
        Ok(found)
    }

    // -- List operations (bounded history) ------------------------------------

    /// Append to a list and trim it to the trailing `limit` entries.
    pub async fn list_push_trim(&self, key: &str, value: &Value, limit: usize) -> StoreResult<()> {
        #[cfg(test)]
        if let Some(memory) = &self.inner.memory {
            memory.list_push_trim(key, value.clone(), limit.max(1));
            return Ok(());
        }
        let mut conn = self.conn().await?;
        redis::pipe()
            .cmd("RPUSH")
            .arg(key)
            .arg(value.to_string())
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(-(limit.max(1) as i64))
            .arg(-1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        Ok(())
    }

    pub async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Value>> {
        #[cfg(test)]
        if let Some(memory) = &self.inner.memory {
            return Ok(memory.list_range(key, start, stop));
        }
        let mut conn = self.conn().await?;
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        Ok(raw.into_iter().map(decode_value).collect())
    }

    // -- Pub/sub ---------------------------------------------------------------

    pub async fn publish(&self, channel: &str, payload: &Value) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload.to_string())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();
        Ok(())
    }

    /// Subscribe to a channel. Messages arrive on the returned receiver until
    /// the connection drops or the gateway shuts down.
    pub async fn subscribe(&self, channel: &str) -> StoreResult<mpsc::Receiver<String>> {
        let client = match self.inner.client.read().await.clone() {
            Some(client) => client,
            None => {
                self.record_failure("not connected");
                return Err(StoreError::Unavailable);
            }
        };
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| self.op_err(e))?;
        pubsub.subscribe(channel).await.map_err(|e| self.op_err(e))?;
        self.inner.breaker.record_success();

        let (tx, rx) = mpsc::channel(256);
        let shutdown = self.inner.shutdown.clone();
        let channel = channel.to_owned();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = stream.next() => {
                        let Some(msg) = msg else { break };
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                debug!(channel, err = %e, "undecodable pub/sub payload");
                                continue;
                            }
                        };
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(channel, "pub/sub subscription ended");
        });
        Ok(rx)
    }

    // -- Health & introspection ------------------------------------------------

    /// Ping the store and classify the round-trip.
    pub async fn health_check(&self) -> StoreHealth {
        if !self.inner.breaker.allow() {
            return StoreHealth {
                status: HealthStatus::Unhealthy,
                response_time_ms: None,
                error: Some("circuit breaker open".to_owned()),
            };
        }
        let conn = self.inner.conn.read().await.clone();
        let Some(mut conn) = conn else {
            return StoreHealth {
                status: HealthStatus::Unhealthy,
                response_time_ms: None,
                error: Some("not connected".to_owned()),
            };
        };
        let started = Instant::now();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => {
                self.inner.breaker.record_success();
                let elapsed = started.elapsed().as_millis() as u64;
                let status = if elapsed < HEALTHY_LATENCY_MS {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                };
                StoreHealth { status, response_time_ms: Some(elapsed), error: None }
            }
            Err(e) => {
                self.record_failure("ping failed");
                StoreHealth {
                    status: HealthStatus::Unhealthy,
                    response_time_ms: Some(started.elapsed().as_millis() as u64),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            connected: self.is_connected(),
            breaker_open: self.inner.breaker.state() == BreakerState::Open,
            consecutive_failures: self.inner.breaker.failures(),
            cache: self.inner.cache.stats(),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        self.inner.cache.config()
    }

    pub fn configure_cache(&self, enabled: Option<bool>, ttl_ms: Option<u64>) -> CacheConfig {
        self.inner.cache.configure(enabled, ttl_ms)
    }
}

/// JSON-decode a stored value, falling back to the raw text.
fn decode_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// Exponential backoff with 30% jitter: `base * 1.5^(attempt-1)`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    use rand::Rng;
    let exp = 1.5f64.powi(attempt.saturating_sub(1).min(16) as i32);
    let jitter = 1.0 + rand::rng().random_range(0.0..0.3);
    base.mul_f64(exp * jitter)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
