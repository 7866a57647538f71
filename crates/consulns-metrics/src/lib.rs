//! # consulns Metrics
//!
//! Request and connection counters recorded through the `metrics` facade,
//! plus tracing subscriber setup.
//!
//! No exporter is installed here; without a recorder the macros are no-ops.
//! The local atomics back [`BackendMetrics::requests`] and friends so the
//! daemon can log a summary on shutdown.

use metrics::{counter, gauge, histogram};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub mod tracing_setup;

/// Global metrics instance.
static METRICS: OnceCell<BackendMetrics> = OnceCell::new();

/// Gets or initializes the global metrics instance.
pub fn metrics() -> &'static BackendMetrics {
    METRICS.get_or_init(BackendMetrics::new)
}

/// Remote backend metrics.
pub struct BackendMetrics {
    /// Process start time.
    start_time: Instant,

    /// Requests dispatched.
    requests_total: AtomicU64,

    /// Requests answered with `false`.
    failures_total: AtomicU64,

    /// Connections accepted.
    connections_total: AtomicU64,
}

impl BackendMetrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests_total: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
        }
    }

    /// Returns the process uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the number of dispatched requests.
    pub fn requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Returns the number of failed requests.
    pub fn failures(&self) -> u64 {
        self.failures_total.load(Ordering::Relaxed)
    }

    /// Returns the number of accepted connections.
    pub fn connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Request metrics
    // =========================================================================

    /// Records a dispatched request.
    pub fn record_request(&self, method: &str) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        counter!("consulns_requests_total", "method" => method.to_string()).increment(1);
    }

    /// Records a request answered with `false`.
    pub fn record_failure(&self, method: &str, reason: &'static str) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
        counter!("consulns_failures_total", "method" => method.to_string(), "reason" => reason)
            .increment(1);
    }

    /// Records request latency.
    pub fn record_latency(&self, method: &str, duration: Duration) {
        histogram!("consulns_request_duration_seconds", "method" => method.to_string())
            .record(duration.as_secs_f64());
    }

    // =========================================================================
    // Connection metrics
    // =========================================================================

    /// Records an accepted connection.
    pub fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        counter!("consulns_connections_total").increment(1);
    }

    /// Updates the active connections gauge.
    pub fn set_active_connections(&self, count: u64) {
        gauge!("consulns_connections_active").set(count as f64);
    }

    // =========================================================================
    // Zone metrics
    // =========================================================================

    /// Updates the zone record count.
    pub fn set_zone_records(&self, zone: &str, count: usize) {
        gauge!("consulns_zone_records", "zone" => zone.to_string()).set(count as f64);
    }
}

impl Default for BackendMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Request timing helper.
pub struct RequestTimer {
    start: Instant,
    method: String,
}

impl RequestTimer {
    /// Starts a new request timer.
    pub fn start(method: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            method: method.into(),
        }
    }

    /// Returns the elapsed duration.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Finishes timing and records the latency.
    pub fn finish(self) {
        metrics().record_latency(&self.method, self.elapsed());
    }
}
