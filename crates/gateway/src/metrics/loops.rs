// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic metrics work: system-gauge refresh, minute snapshots, alert
//! checks, and the hourly cleanup with daily roll-up persistence.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::SharedStore;
use super::Metrics;

const SYSTEM_REFRESH: Duration = Duration::from_secs(5);
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);
const ALERT_INTERVAL: Duration = Duration::from_secs(60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
/// Retention of the daily roll-up in the shared store.
const ROLLUP_TTL: Duration = Duration::from_secs(90 * 24 * 3600);

pub fn spawn_system_loop(
    metrics: Arc<Metrics>,
    store: SharedStore,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SYSTEM_REFRESH);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = timer.tick() => {}
            }
            let health = store.health_check().await;
            metrics.refresh_system(health, store.stats());
        }
    });
}

pub fn spawn_snapshot_loop(metrics: Arc<Metrics>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SNAPSHOT_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = timer.tick() => {}
            }
            metrics.take_snapshot();
        }
    });
}

pub fn spawn_alert_loop(metrics: Arc<Metrics>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(ALERT_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = timer.tick() => {}
            }
            for alert in metrics.check_alerts() {
                warn!(
                    kind = %alert.kind,
                    value = alert.value,
                    threshold = alert.threshold,
                    "{}", alert.message
                );
            }
        }
    });
}

/// Hourly retention pass; also persists the daily roll-up. Store failures
/// are logged and dropped, the archive is best-effort.
pub fn spawn_cleanup_loop(
    metrics: Arc<Metrics>,
    store: SharedStore,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(CLEANUP_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = timer.tick() => {}
            }
            metrics.cleanup();
            let (key, value) = metrics.daily_rollup();
            match store.set(&key, &value, Some(ROLLUP_TTL)).await {
                Ok(()) => debug!(key, "daily metrics archived"),
                Err(e) => debug!(key, err = %e, "daily metrics archive skipped"),
            }
        }
    });
}
