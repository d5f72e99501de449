// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::error::GatewayError;
use super::RateLimiter;

#[test]
fn allows_up_to_limit_then_rejects() {
    let limiter = RateLimiter::new(3, Duration::from_secs(60));
    for _ in 0..3 {
        assert!(limiter.check("10.0.0.1").is_ok());
    }
    assert_eq!(limiter.check("10.0.0.1"), Err(GatewayError::RateLimited));
}

#[test]
fn window_expiry_resets_the_count() {
    let limiter = RateLimiter::new(2, Duration::from_millis(20));
    assert!(limiter.check("10.0.0.1").is_ok());
    assert!(limiter.check("10.0.0.1").is_ok());
    assert!(limiter.check("10.0.0.1").is_err());
    std::thread::sleep(Duration::from_millis(30));
    assert!(limiter.check("10.0.0.1").is_ok(), "fresh window admits again");
}

#[test]
fn ips_are_independent() {
    let limiter = RateLimiter::new(1, Duration::from_secs(60));
    assert!(limiter.check("10.0.0.1").is_ok());
    assert!(limiter.check("10.0.0.2").is_ok());
    assert!(limiter.check("10.0.0.1").is_err());
    assert!(limiter.check("10.0.0.2").is_err());
}

#[test]
fn sweep_removes_only_idle_buckets() {
    let limiter = RateLimiter::new(5, Duration::from_millis(10));
    let _ = limiter.check("stale");
    std::thread::sleep(Duration::from_millis(30));
    let _ = limiter.check("active");
    assert_eq!(limiter.sweep_idle(), 1);
    // The active bucket keeps its count.
    let _ = limiter.check("active");
    assert_eq!(limiter.sweep_idle(), 0);
}
