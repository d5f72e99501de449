// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;

use super::LocalCache;

#[test]
fn get_counts_hits_and_misses() {
    let cache = LocalCache::new(Duration::from_secs(60), 100);
    assert!(cache.get("k").is_none());
    cache.put("k", json!({"v": 1}));
    assert_eq!(cache.get("k"), Some(json!({"v": 1})));
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.size, 1);
}

#[test]
fn expired_entries_are_misses() {
    let cache = LocalCache::new(Duration::from_millis(10), 100);
    cache.put("k", json!(1));
    std::thread::sleep(Duration::from_millis(20));
    assert!(cache.get("k").is_none());
    assert_eq!(cache.stats().size, 0, "expired entry is removed on read");
}

#[test]
fn sweep_evicts_only_expired() {
    let cache = LocalCache::new(Duration::from_millis(10), 100);
    cache.put("old", json!(1));
    std::thread::sleep(Duration::from_millis(20));
    cache.configure(None, Some(60_000));
    cache.put("fresh", json!(2));
    assert_eq!(cache.sweep_expired(), 1);
    assert_eq!(cache.get("fresh"), Some(json!(2)));
}

#[test]
fn bounded_at_max_entries() {
    let cache = LocalCache::new(Duration::from_secs(60), 3);
    for i in 0..5 {
        cache.put(&format!("k{i}"), json!(i));
    }
    assert_eq!(cache.stats().size, 3);
    // Most recent insert always survives.
    assert_eq!(cache.get("k4"), Some(json!(4)));
}

#[test]
fn disabling_clears_and_stops_serving() {
    let cache = LocalCache::new(Duration::from_secs(60), 100);
    cache.put("k", json!(1));
    let config = cache.configure(Some(false), None);
    assert!(!config.enabled);
    assert_eq!(cache.stats().size, 0);
    cache.put("k", json!(1));
    assert!(cache.get("k").is_none(), "disabled cache neither stores nor serves");

    let config = cache.configure(Some(true), Some(1234));
    assert!(config.enabled);
    assert_eq!(config.ttl_ms, 1234);
    cache.put("k", json!(2));
    assert_eq!(cache.get("k"), Some(json!(2)));
}
