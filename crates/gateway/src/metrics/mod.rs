// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics registry: counters, gauges, latency histogram, per-client
//! breakdowns, minute snapshots, and the bounded alert queue.

pub mod loops;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::state::epoch_ms;
use crate::store::{HealthStatus, StoreHealth, StoreStats};

/// Alert threshold: mean message latency.
pub const HIGH_LATENCY_MS: f64 = 500.0;
/// Alert threshold: errors as a percentage of messages, per minute.
pub const HIGH_ERROR_RATE_PCT: f64 = 5.0;
/// Alert threshold: process RSS as a percentage of system memory.
pub const HIGH_MEMORY_PCT: f64 = 85.0;

/// Minute snapshots kept (24 h).
const SNAPSHOT_RETENTION: usize = 1440;
/// Most recent alerts kept.
const ALERT_RETENTION: usize = 10;
/// Latency samples kept for mean/p95.
const LATENCY_SAMPLES: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub at_ms: u64,
    pub active_connections: u64,
    pub total_connections: u64,
    pub messages_total: u64,
    pub errors_total: u64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub rss_bytes: u64,
    pub messages_per_minute: u64,
}

#[derive(Debug, Default)]
struct SystemGauges {
    rss_bytes: u64,
    total_memory_bytes: u64,
    memory_pct: f64,
    cpu_pct: f32,
}

#[derive(Debug, Default)]
struct MinuteWindow {
    minute: u64,
    messages: u64,
    errors: u64,
}

struct Latency {
    samples: VecDeque<f64>,
}

impl Latency {
    fn record(&mut self, ms: f64) {
        if self.samples.len() == LATENCY_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    fn p95(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
    }
}

fn plock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn bump(map: &RwLock<HashMap<String, u64>>, key: &str) {
    let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
    *map.entry(key.to_owned()).or_insert(0) += 1;
}

fn snapshot_map(map: &RwLock<HashMap<String, u64>>) -> HashMap<String, u64> {
    map.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Process-wide metrics registry.
pub struct Metrics {
    started: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    peak_connections: AtomicU64,
    peak_at_ms: AtomicU64,
    messages_total: AtomicU64,
    errors_total: AtomicU64,
    workspace_joins: AtomicU64,
    active_workspaces: AtomicU64,
    messages_per_minute: AtomicU64,
    errors_per_minute: AtomicU64,
    messages_by_type: RwLock<HashMap<String, u64>>,
    errors_by_type: RwLock<HashMap<String, u64>>,
    by_user_agent: RwLock<HashMap<String, u64>>,
    by_country: RwLock<HashMap<String, u64>>,
    latency: Mutex<Latency>,
    minute: Mutex<MinuteWindow>,
    system: Mutex<SystemGauges>,
    sys_probe: Mutex<System>,
    store_health: Mutex<Option<StoreHealth>>,
    store_stats: Mutex<Option<StoreStats>>,
    snapshots: Mutex<VecDeque<Snapshot>>,
    alerts: Mutex<VecDeque<Alert>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            peak_connections: AtomicU64::new(0),
            peak_at_ms: AtomicU64::new(0),
            messages_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            workspace_joins: AtomicU64::new(0),
            active_workspaces: AtomicU64::new(0),
            messages_per_minute: AtomicU64::new(0),
            errors_per_minute: AtomicU64::new(0),
            messages_by_type: RwLock::new(HashMap::new()),
            errors_by_type: RwLock::new(HashMap::new()),
            by_user_agent: RwLock::new(HashMap::new()),
            by_country: RwLock::new(HashMap::new()),
            latency: Mutex::new(Latency { samples: VecDeque::new() }),
            minute: Mutex::new(MinuteWindow::default()),
            system: Mutex::new(SystemGauges::default()),
            sys_probe: Mutex::new(System::new()),
            store_health: Mutex::new(None),
            store_stats: Mutex::new(None),
            snapshots: Mutex::new(VecDeque::new()),
            alerts: Mutex::new(VecDeque::new()),
        }
    }

    // -- Recording ------------------------------------------------------------

    pub fn connection_opened(&self, user_agent: Option<&str>, country: Option<&str>) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        let active = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        if active > self.peak_connections.load(Ordering::Relaxed) {
            self.peak_connections.store(active, Ordering::Relaxed);
            self.peak_at_ms.store(epoch_ms(), Ordering::Relaxed);
        }
        bump(&self.by_user_agent, user_agent.unwrap_or("unknown"));
        bump(&self.by_country, country.unwrap_or("unknown"));
    }

    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn message_processed(&self, event: &str, latency: Duration) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
        bump(&self.messages_by_type, event);
        plock(&self.latency).record(latency.as_secs_f64() * 1000.0);
        self.roll_minute(|w| w.messages += 1);
    }

    pub fn error_occurred(&self, kind: &str, details: &str) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        bump(&self.errors_by_type, kind);
        self.roll_minute(|w| w.errors += 1);
        tracing::debug!(kind, details, "error recorded");
    }

    pub fn user_joined_workspace(&self) {
        self.workspace_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_workspaces(&self, count: u64) {
        self.active_workspaces.store(count, Ordering::Relaxed);
    }

    fn roll_minute(&self, apply: impl FnOnce(&mut MinuteWindow)) {
        let now_minute = epoch_ms() / 60_000;
        let mut window = plock(&self.minute);
        if window.minute != now_minute {
            if window.minute != 0 {
                self.messages_per_minute.store(window.messages, Ordering::Relaxed);
                self.errors_per_minute.store(window.errors, Ordering::Relaxed);
            }
            *window = MinuteWindow { minute: now_minute, messages: 0, errors: 0 };
        }
        apply(&mut window);
    }

    /// Refresh process/system gauges and the recorded store health. Driven by
    /// the 5-second system loop.
    pub fn refresh_system(&self, store_health: StoreHealth, store_stats: StoreStats) {
        let pid = Pid::from_u32(std::process::id());
        let mut probe = plock(&self.sys_probe);
        probe.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        probe.refresh_memory();
        let (rss, cpu) = probe
            .process(pid)
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or_default();
        let total = probe.total_memory();
        drop(probe);

        let mut gauges = plock(&self.system);
        gauges.rss_bytes = rss;
        gauges.total_memory_bytes = total;
        gauges.memory_pct = if total > 0 { rss as f64 / total as f64 * 100.0 } else { 0.0 };
        gauges.cpu_pct = cpu;
        drop(gauges);

        *plock(&self.store_health) = Some(store_health);
        *plock(&self.store_stats) = Some(store_stats);
    }

    // -- Snapshots, alerts, retention ------------------------------------------

    /// Append a minute-granularity snapshot, bounded to 24 h.
    pub fn take_snapshot(&self) {
        let latency = plock(&self.latency);
        let snapshot = Snapshot {
            at_ms: epoch_ms(),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            messages_total: self.messages_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            mean_latency_ms: latency.mean(),
            p95_latency_ms: latency.p95(),
            rss_bytes: plock(&self.system).rss_bytes,
            messages_per_minute: self.messages_per_minute.load(Ordering::Relaxed),
        };
        drop(latency);
        let mut snapshots = plock(&self.snapshots);
        if snapshots.len() == SNAPSHOT_RETENTION {
            snapshots.pop_front();
        }
        snapshots.push_back(snapshot);
    }

    /// Evaluate alert thresholds; fired alerts land in the bounded queue.
    pub fn check_alerts(&self) -> Vec<Alert> {
        let mut fired = Vec::new();

        let mean = plock(&self.latency).mean();
        if mean > HIGH_LATENCY_MS {
            fired.push(self.alert("high_latency", "mean message latency high", mean, HIGH_LATENCY_MS));
        }

        let messages = self.messages_per_minute.load(Ordering::Relaxed);
        let errors = self.errors_per_minute.load(Ordering::Relaxed);
        if messages > 0 {
            let rate = errors as f64 / messages as f64 * 100.0;
            if rate > HIGH_ERROR_RATE_PCT {
                fired.push(self.alert("high_error_rate", "error rate high", rate, HIGH_ERROR_RATE_PCT));
            }
        }

        let memory_pct = plock(&self.system).memory_pct;
        if memory_pct > HIGH_MEMORY_PCT {
            fired.push(self.alert("high_memory", "memory usage high", memory_pct, HIGH_MEMORY_PCT));
        }

        if let Some(health) = plock(&self.store_health).clone() {
            if health.status != HealthStatus::Healthy {
                fired.push(self.alert(
                    "store_unhealthy",
                    health.error.as_deref().unwrap_or("shared store not healthy"),
                    health.response_time_ms.unwrap_or(0) as f64,
                    0.0,
                ));
            }
        }

        if !fired.is_empty() {
            let mut alerts = plock(&self.alerts);
            for alert in &fired {
                if alerts.len() == ALERT_RETENTION {
                    alerts.pop_front();
                }
                alerts.push_back(alert.clone());
            }
        }
        fired
    }

    fn alert(&self, kind: &str, message: &str, value: f64, threshold: f64) -> Alert {
        Alert {
            kind: kind.to_owned(),
            message: message.to_owned(),
            value,
            threshold,
            at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Drop snapshots older than 24 h.
    pub fn cleanup(&self) {
        let cutoff = epoch_ms().saturating_sub(24 * 3600 * 1000);
        plock(&self.snapshots).retain(|s| s.at_ms >= cutoff);
    }

    /// Daily roll-up destined for the shared store.
    pub fn daily_rollup(&self) -> (String, Value) {
        let date = chrono::Utc::now().format("%Y-%m-%d");
        let key = format!("metrics:daily:{date}");
        let latency = plock(&self.latency);
        let value = json!({
            "date": date.to_string(),
            "totalConnections": self.total_connections.load(Ordering::Relaxed),
            "peakConnections": self.peak_connections.load(Ordering::Relaxed),
            "messagesTotal": self.messages_total.load(Ordering::Relaxed),
            "errorsTotal": self.errors_total.load(Ordering::Relaxed),
            "meanLatencyMs": latency.mean(),
            "p95LatencyMs": latency.p95(),
            "messagesByType": snapshot_map(&self.messages_by_type),
        });
        (key, value)
    }

    // -- Reporting -------------------------------------------------------------

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Summary for `/metrics`; `detailed` adds breakdowns, snapshots, and
    /// alert history for `/metrics/detailed`.
    pub fn summary(&self, detailed: bool) -> Value {
        let latency = plock(&self.latency);
        let gauges = plock(&self.system);
        let mut out = json!({
            "uptimeSeconds": self.uptime().as_secs(),
            "connections": {
                "total": self.total_connections.load(Ordering::Relaxed),
                "active": self.active_connections.load(Ordering::Relaxed),
                "peak": self.peak_connections.load(Ordering::Relaxed),
                "peakAtMs": self.peak_at_ms.load(Ordering::Relaxed),
            },
            "messages": {
                "total": self.messages_total.load(Ordering::Relaxed),
                "perMinute": self.messages_per_minute.load(Ordering::Relaxed),
                "meanLatencyMs": latency.mean(),
                "p95LatencyMs": latency.p95(),
            },
            "errors": {
                "total": self.errors_total.load(Ordering::Relaxed),
                "perMinute": self.errors_per_minute.load(Ordering::Relaxed),
            },
            "workspaces": {
                "active": self.active_workspaces.load(Ordering::Relaxed),
                "joins": self.workspace_joins.load(Ordering::Relaxed),
            },
            "system": {
                "rssBytes": gauges.rss_bytes,
                "memoryPct": gauges.memory_pct,
                "cpuPct": gauges.cpu_pct,
            },
            "store": {
                "health": plock(&self.store_health).clone(),
                "stats": plock(&self.store_stats).clone(),
            },
        });
        drop(latency);
        drop(gauges);

        if detailed {
            if let Some(map) = out.as_object_mut() {
                map.insert("messagesByType".into(), json!(snapshot_map(&self.messages_by_type)));
                map.insert("errorsByType".into(), json!(snapshot_map(&self.errors_by_type)));
                map.insert("byUserAgent".into(), json!(snapshot_map(&self.by_user_agent)));
                map.insert("byCountry".into(), json!(snapshot_map(&self.by_country)));
                map.insert(
                    "snapshots".into(),
                    json!(plock(&self.snapshots).iter().cloned().collect::<Vec<_>>()),
                );
                map.insert(
                    "alerts".into(),
                    json!(plock(&self.alerts).iter().cloned().collect::<Vec<_>>()),
                );
            }
        }
        out
    }

    /// Condensed report: latency percentiles, throughput, and alert history.
    pub fn performance_report(&self) -> Value {
        let latency = plock(&self.latency);
        json!({
            "meanLatencyMs": latency.mean(),
            "p95LatencyMs": latency.p95(),
            "messagesPerMinute": self.messages_per_minute.load(Ordering::Relaxed),
            "errorsPerMinute": self.errors_per_minute.load(Ordering::Relaxed),
            "peakConnections": self.peak_connections.load(Ordering::Relaxed),
            "alerts": plock(&self.alerts).iter().cloned().collect::<Vec<_>>(),
        })
    }

    pub fn recent_alerts(&self) -> Vec<Alert> {
        plock(&self.alerts).iter().cloned().collect()
    }

    #[cfg(test)]
    pub fn snapshot_count(&self) -> usize {
        plock(&self.snapshots).len()
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
