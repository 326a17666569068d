//! Observability and Metrics
//!
//! Process-wide counters for connection lifecycle and traffic, aggregated
//! across every [`Connection`](crate::protocol::connection::Connection).
//! Per-connection counters live on the connection itself.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::protocol::handler::DisconnectReason;

/// Global metrics collector for protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections started
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Total application messages sent
    pub messages_sent: AtomicU64,
    /// Total application messages received
    pub messages_received: AtomicU64,
    /// Total bytes written to transports
    pub bytes_sent: AtomicU64,
    /// Total bytes read from transports
    pub bytes_received: AtomicU64,
    /// Keep-alive units sent
    pub keepalives_sent: AtomicU64,
    /// Keep-alive units received and filtered
    pub keepalives_received: AtomicU64,
    /// Disconnects requested locally
    pub disconnects_local: AtomicU64,
    /// Disconnects caused by the peer closing the stream
    pub disconnects_remote: AtomicU64,
    /// Disconnects caused by I/O failures
    pub disconnects_interrupted: AtomicU64,
    /// Failed starts (bad config, TLS handshake failures)
    pub start_failures: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            keepalives_sent: AtomicU64::new(0),
            keepalives_received: AtomicU64::new(0),
            disconnects_local: AtomicU64::new(0),
            disconnects_remote: AtomicU64::new(0),
            disconnects_interrupted: AtomicU64::new(0),
            start_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a started connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a disposed connection and why it went away
    pub fn connection_closed(&self, reason: DisconnectReason) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        let counter = match reason {
            DisconnectReason::LocalRequest => &self.disconnects_local,
            DisconnectReason::RemoteClosed => &self.disconnects_remote,
            DisconnectReason::Interrupted => &self.disconnects_interrupted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed start
    pub fn start_failed(&self) {
        self.start_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed write carrying `messages` payloads
    pub fn write_completed(&self, messages: u64, byte_count: u64) {
        self.messages_sent.fetch_add(messages, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record bytes read off a transport
    pub fn bytes_read(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a delivered message
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a keep-alive sent
    pub fn keepalive_sent(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a keep-alive filtered from delivery
    pub fn keepalive_received(&self) {
        self.keepalives_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            keepalives_received: self.keepalives_received.load(Ordering::Relaxed),
            disconnects_local: self.disconnects_local.load(Ordering::Relaxed),
            disconnects_remote: self.disconnects_remote.load(Ordering::Relaxed),
            disconnects_interrupted: self.disconnects_interrupted.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            messages_sent = snapshot.messages_sent,
            messages_received = snapshot.messages_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            keepalives_sent = snapshot.keepalives_sent,
            keepalives_received = snapshot.keepalives_received,
            disconnects_local = snapshot.disconnects_local,
            disconnects_remote = snapshot.disconnects_remote,
            disconnects_interrupted = snapshot.disconnects_interrupted,
            start_failures = snapshot.start_failures,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub keepalives_sent: u64,
    pub keepalives_received: u64,
    pub disconnects_local: u64,
    pub disconnects_remote: u64,
    pub disconnects_interrupted: u64,
    pub start_failures: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance (lazy static for simplicity)
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnects_are_counted_per_reason() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_closed(DisconnectReason::RemoteClosed);
        metrics.connection_closed(DisconnectReason::Interrupted);

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 0);
        assert_eq!(snap.disconnects_remote, 1);
        assert_eq!(snap.disconnects_interrupted, 1);
        assert_eq!(snap.disconnects_local, 0);
    }

    #[test]
    fn writes_accumulate_messages_and_bytes() {
        let metrics = Metrics::new();
        metrics.write_completed(3, 30);
        metrics.write_completed(1, 5);

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_sent, 4);
        assert_eq!(snap.bytes_sent, 35);
    }
}
