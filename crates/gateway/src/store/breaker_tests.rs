// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::{BreakerState, CircuitBreaker};

#[test]
fn stays_closed_below_threshold() {
    let breaker = CircuitBreaker::new(5, Duration::from_secs(30));
    for _ in 0..4 {
        assert!(!breaker.record_failure());
    }
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.allow());
    assert_eq!(breaker.failures(), 4);
}

#[test]
fn opens_at_threshold_and_short_circuits() {
    let breaker = CircuitBreaker::new(5, Duration::from_secs(30));
    for _ in 0..4 {
        breaker.record_failure();
    }
    assert!(breaker.record_failure(), "fifth failure should open the breaker");
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(!breaker.allow());
    assert!(!breaker.allow());
}

#[test]
fn success_resets_counter_and_closes() {
    let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
    breaker.record_failure();
    breaker.record_failure();
    breaker.record_success();
    assert_eq!(breaker.failures(), 0);
    // A fresh run of failures is needed to open again.
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.record_failure());
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.allow());
}

#[test]
fn closes_after_reset_instant() {
    let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
    breaker.record_failure();
    assert!(!breaker.allow());
    std::thread::sleep(Duration::from_millis(30));
    // First call after the reset instant closes with counter = 0.
    assert!(breaker.allow());
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(breaker.failures(), 0);
}

#[test]
fn force_open_overrides_reset_timeout() {
    let breaker = CircuitBreaker::new(5, Duration::from_millis(1));
    breaker.force_open(Duration::from_secs(60));
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(!breaker.allow());
}
