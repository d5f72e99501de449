// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-IP fixed-window connection rate limiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::GatewayError;

struct Bucket {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

/// Fixed 60-second windows per client IP; buckets idle for more than two
/// windows are swept.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Count a handshake attempt from `ip`; reject once the window is full.
    pub fn check(&self, ip: &str) -> Result<(), GatewayError> {
        let now = Instant::now();
        let mut buckets = self.lock();
        let bucket = buckets.entry(ip.to_owned()).or_insert(Bucket {
            count: 0,
            window_start: now,
            last_seen: now,
        });
        if now.duration_since(bucket.window_start) >= self.window {
            bucket.count = 0;
            bucket.window_start = now;
        }
        bucket.count += 1;
        bucket.last_seen = now;
        if bucket.count > self.max_per_window {
            return Err(GatewayError::RateLimited);
        }
        Ok(())
    }

    /// Remove buckets idle for more than two windows.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let idle_cutoff = self.window * 2;
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, b| now.duration_since(b.last_seen) <= idle_cutoff);
        before - buckets.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(limiter.window * 5);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = timer.tick() => {}
                }
                let removed = limiter.sweep_idle();
                if removed > 0 {
                    debug!(removed, "rate-limit buckets swept");
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
