//! Server statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Server start time.
    start_time: Option<Instant>,

    /// Requests routed to a handler.
    pub requests: AtomicU64,

    /// Requests answered with `false`.
    pub failures: AtomicU64,

    /// Frames that were not a valid request.
    pub parse_errors: AtomicU64,

    /// Requests whose handler missed the deadline.
    pub timeouts: AtomicU64,

    /// Connections accepted since start.
    pub connections_total: AtomicU64,

    /// Currently open connections.
    pub connections_active: AtomicU64,
}

impl ServerStats {
    /// Creates new server statistics.
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Returns the server uptime.
    pub fn uptime(&self) -> Option<std::time::Duration> {
        self.start_time.map(|t| t.elapsed())
    }

    /// Increments the request counter.
    pub fn inc_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the failure counter.
    pub fn inc_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the parse error counter.
    pub fn inc_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the timeout counter.
    pub fn inc_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an accepted connection and returns the open count.
    pub fn inc_connection(&self) -> u64 {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a closed connection and returns the open count.
    pub fn dec_connection(&self) -> u64 {
        self.connections_active
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1)
    }

    /// Returns the number of open connections.
    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Returns the number of requests routed to a handler.
    pub fn total_requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}
