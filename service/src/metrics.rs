//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Lock-free metrics for the request multiplexer
//!
//! Every event is counted twice: once in the in-process [`ServerMetrics`]
//! atomics (for [`snapshot`](ServerMetrics::snapshot)) and once through the
//! `metrics` facade under the `httpmux.` prefix for whatever recorder the
//! application installed.

use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
///
/// All metrics are stored as atomics and can be accessed concurrently
/// without locks. Use the `snapshot()` method to get a view of all metrics
/// at a point in time.
#[derive(Debug)]
pub struct ServerMetrics {
    // Connection counts
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,

    // Requests
    requests_received: AtomicU64,
    requests_responded: AtomicU64,

    // Errors
    accept_errors: AtomicU64,
    pull_errors: AtomicU64,

    // Timing (stored as nanoseconds)
    total_connection_duration_ns: AtomicU64,

    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            requests_received: AtomicU64::new(0),
            requests_responded: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            pull_errors: AtomicU64::new(0),
            total_connection_duration_ns: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    // Connection tracking

    /// Record a connection being registered
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        counter!("httpmux.connections.total").increment(1);
        gauge!("httpmux.connections.active").increment(1.0);
    }

    /// Record a connection being deregistered
    pub fn connection_closed(&self, duration: Duration) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.total_connection_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        gauge!("httpmux.connections.active").decrement(1.0);
        histogram!("httpmux.connection.duration").record(duration.as_secs_f64());
    }

    /// Record an accepted connection dropped because of the connection limit
    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
        counter!("httpmux.connections.rejected").increment(1);
    }

    /// Get the current number of registered connections
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get the total number of connections since server start
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    // Request tracking

    /// Record a request handed to the consumer
    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
        counter!("httpmux.requests.received").increment(1);
    }

    /// Record a request whose response has been handed to the transport
    pub fn request_responded(&self, latency: Duration) {
        self.requests_responded.fetch_add(1, Ordering::Relaxed);
        counter!("httpmux.requests.responded").increment(1);
        histogram!("httpmux.request.duration").record(latency.as_secs_f64());
    }

    // Error tracking

    /// Record an absorbed accept failure
    pub fn accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
        counter!("httpmux.errors.accept").increment(1);
    }

    /// Record an absorbed pull failure on an established connection
    pub fn pull_error(&self) {
        self.pull_errors.fetch_add(1, Ordering::Relaxed);
        counter!("httpmux.errors.pull").increment(1);
    }

    /// Get a snapshot of all metrics
    ///
    /// The counters are read independently, so the snapshot may be slightly
    /// skewed while the server is busy.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_responded: self.requests_responded.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            pull_errors: self.pull_errors.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            avg_connection_duration: self.average_connection_duration(),
        }
    }

    fn average_connection_duration(&self) -> Duration {
        let closed = self
            .total_connections
            .load(Ordering::Relaxed)
            .saturating_sub(self.active_connections.load(Ordering::Relaxed));
        if closed == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.total_connection_duration_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / closed)
    }
}

/// A snapshot of server metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Total connections since server start
    pub total_connections: u64,
    /// Currently registered connections
    pub active_connections: u64,
    /// Connections dropped at the connection limit
    pub rejected_connections: u64,
    /// Requests handed to the consumer
    pub requests_received: u64,
    /// Requests whose response reached the transport
    pub requests_responded: u64,
    /// Absorbed accept failures
    pub accept_errors: u64,
    /// Absorbed pull failures
    pub pull_errors: u64,
    /// Server uptime
    pub uptime: Duration,
    /// Average duration of closed connections
    pub avg_connection_duration: Duration,
}

impl MetricsSnapshot {
    /// Requests handed to the consumer but not yet answered
    pub fn requests_in_flight(&self) -> u64 {
        self.requests_received.saturating_sub(self.requests_responded)
    }

    /// Calculate requests per second (received)
    pub fn requests_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.requests_received as f64 / self.uptime.as_secs_f64()
    }

    /// Calculate total error count
    pub fn total_errors(&self) -> u64 {
        self.accept_errors + self.pull_errors
    }
}
