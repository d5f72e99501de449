// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded read-through cache in front of the shared store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Runtime-adjustable cache settings, echoed by the admin endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

pub struct LocalCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    enabled: AtomicBool,
    ttl_ms: AtomicU64,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LocalCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
            ttl_ms: AtomicU64::new(ttl.as_millis() as u64),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled() {
            return None;
        }
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: &str, value: Value) {
        if !self.enabled() {
            return;
        }
        let expires_at = Instant::now() + self.ttl();
        let mut entries = self.lock();
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            let now = Instant::now();
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.max_entries {
                // Still full: drop the entry closest to expiry.
                if let Some(victim) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&victim);
                }
            }
        }
        entries.insert(key.to_owned(), CacheEntry { value, expires_at });
    }

    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop expired entries; returns how many were evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Apply a runtime reconfiguration. Disabling clears the cache.
    pub fn configure(&self, enabled: Option<bool>, ttl_ms: Option<u64>) -> CacheConfig {
        if let Some(ttl) = ttl_ms {
            self.ttl_ms.store(ttl.max(1), Ordering::Relaxed);
        }
        if let Some(on) = enabled {
            self.enabled.store(on, Ordering::Relaxed);
            if !on {
                self.clear();
            }
        }
        self.config()
    }

    pub fn config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.enabled(),
            ttl_ms: self.ttl_ms.load(Ordering::Relaxed),
            max_entries: self.max_entries,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.lock().len(),
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
