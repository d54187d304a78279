//! Statistics tracking for the DNS proxy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counters shared by all query tasks.
#[derive(Debug, Default)]
pub struct Stats {
    resolved: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A query answered by an upstream.
    pub fn record_resolved(&self, elapsed: Duration) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);
    }

    /// A query answered with an error response.
    pub fn record_failed(&self, elapsed: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);
    }

    /// A packet that got no reply at all.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn add_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_response_time_us
            .fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let resolved = self.resolved.swap(0, Ordering::Relaxed);
        let failed = self.failed.swap(0, Ordering::Relaxed);
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let answered = resolved + failed;
        let avg_response_ms = if answered > 0 {
            (total_us as f64 / answered as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            requests: answered + dropped,
            resolved,
            failed,
            dropped,
            avg_response_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub resolved: u64,
    pub failed: u64,
    pub dropped: u64,
    pub avg_response_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_averages_answered_queries() {
        let stats = Stats::new();
        stats.record_resolved(Duration::from_millis(10));
        stats.record_failed(Duration::from_millis(30));
        stats.record_dropped();

        let snapshot = stats.snapshot_and_reset();

        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.resolved, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.dropped, 1);
        assert!((snapshot.avg_response_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_resets_counters() {
        let stats = Stats::new();
        stats.record_resolved(Duration::from_millis(5));
        stats.snapshot_and_reset();

        let snapshot = stats.snapshot_and_reset();

        assert_eq!(snapshot.requests, 0);
        assert_eq!(snapshot.avg_response_ms, 0.0);
    }
}
