//! Lock-free engine metrics.
//!
//! All counters use `Relaxed` atomics: they are independent measurements
//! and never feed back into control flow — the collector observes, it
//! never steers.

mod snapshot;

pub use snapshot::EngineSnapshot;

use crate::error::ErrorKind;
use crate::priority::Priority;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Passive metrics collector for the whole engine.
pub struct EngineMetrics {
    start_time: Instant,

    // === Admission ===
    keys_submitted: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    // === Resolution outcomes ===
    resolutions_succeeded: AtomicU64,
    resolutions_failed: AtomicU64,
    resolutions_aborted: AtomicU64,
    retries: AtomicU64,

    // === Delivery ===
    deliveries: AtomicU64,
    deliveries_suppressed: AtomicU64,

    // === Scheduling gauges, indexed by Priority::index() ===
    queued: [AtomicUsize; 5],
    active: [AtomicUsize; 5],
    deferrals: AtomicU64,
    resumes: AtomicU64,
    rebalances: AtomicU64,

    // === Error taxonomy histogram ===
    errors_by_kind: [AtomicU64; 5],

    // === Latency (microseconds) ===
    latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

fn kind_index(kind: ErrorKind) -> usize {
    match kind {
        ErrorKind::Network => 0,
        ErrorKind::Timeout => 1,
        ErrorKind::Api => 2,
        ErrorKind::Data => 3,
        ErrorKind::Unknown => 4,
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            keys_submitted: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            resolutions_succeeded: AtomicU64::new(0),
            resolutions_failed: AtomicU64::new(0),
            resolutions_aborted: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            deliveries_suppressed: AtomicU64::new(0),
            queued: Default::default(),
            active: Default::default(),
            deferrals: AtomicU64::new(0),
            resumes: AtomicU64::new(0),
            rebalances: AtomicU64::new(0),
            errors_by_kind: Default::default(),
            latency_us: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        }
    }

    // === Admission tracking ===

    /// Record keys arriving in a submit batch.
    pub fn keys_submitted(&self, count: usize) {
        self.keys_submitted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a submission served straight from cache.
    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission that became a work item.
    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    // === Resolution tracking ===

    /// Record a resolution finishing successfully after `attempts` tries,
    /// taking `latency` end to end.
    pub fn resolution_succeeded(&self, attempts: u32, latency: Duration) {
        self.resolutions_succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_attempts(attempts);
        self.record_latency(latency);
    }

    /// Record a resolution failing terminally with `kind`.
    pub fn resolution_failed(&self, kind: ErrorKind, attempts: u32, latency: Duration) {
        self.resolutions_failed.fetch_add(1, Ordering::Relaxed);
        self.errors_by_kind[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
        self.record_attempts(attempts);
        self.record_latency(latency);
    }

    /// Record a resolution cut short by cancellation.
    pub fn resolution_aborted(&self) {
        self.resolutions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_attempts(&self, attempts: u32) {
        if attempts > 1 {
            self.retries
                .fetch_add((attempts - 1) as u64, Ordering::Relaxed);
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    // === Delivery tracking ===

    /// Record a terminal outcome reaching consumers.
    pub fn delivered(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duplicate delivery suppressed by idempotence.
    pub fn delivery_suppressed(&self) {
        self.deliveries_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    // === Scheduling gauges ===

    pub fn queued_inc(&self, level: Priority) {
        self.queued[level.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn queued_dec(&self, level: Priority) {
        self.queued[level.index()].fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_inc(&self, level: Priority) {
        self.active[level.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_dec(&self, level: Priority) {
        self.active[level.index()].fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an item routed to the deferred set under pressure.
    pub fn deferred(&self) {
        self.deferrals.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a deferred item returning to its queue.
    pub fn resumed(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a queued item relocated after a priority change.
    pub fn rebalanced(&self) {
        self.rebalances.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset every gauge to zero (queues were cleared).
    pub fn reset_gauges(&self) {
        for gauge in self.queued.iter().chain(self.active.iter()) {
            gauge.store(0, Ordering::Relaxed);
        }
    }

    // === Snapshot ===

    /// Take a point-in-time snapshot of all metrics.
    pub fn snapshot(&self) -> EngineSnapshot {
        let latency_samples = self.latency_samples.load(Ordering::Relaxed);
        let mean_latency = if latency_samples > 0 {
            Some(Duration::from_micros(
                self.latency_us.load(Ordering::Relaxed) / latency_samples,
            ))
        } else {
            None
        };

        let load_gauges = |gauges: &[AtomicUsize; 5]| {
            let mut out = [0usize; 5];
            for (slot, gauge) in out.iter_mut().zip(gauges.iter()) {
                *slot = gauge.load(Ordering::Relaxed);
            }
            out
        };

        let mut errors_by_kind = [0u64; 5];
        for (slot, counter) in errors_by_kind.iter_mut().zip(self.errors_by_kind.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }

        EngineSnapshot {
            uptime: self.start_time.elapsed(),
            keys_submitted: self.keys_submitted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            resolutions_succeeded: self.resolutions_succeeded.load(Ordering::Relaxed),
            resolutions_failed: self.resolutions_failed.load(Ordering::Relaxed),
            resolutions_aborted: self.resolutions_aborted.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            deliveries_suppressed: self.deliveries_suppressed.load(Ordering::Relaxed),
            queued: load_gauges(&self.queued),
            active: load_gauges(&self.active),
            deferrals: self.deferrals.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            rebalances: self.rebalances.load(Ordering::Relaxed),
            errors_by_kind,
            mean_latency,
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_counters() {
        let metrics = EngineMetrics::new();
        metrics.keys_submitted(3);
        metrics.cache_hit();
        metrics.cache_miss();
        metrics.cache_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.keys_submitted, 3);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert!((snapshot.cache_hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolution_outcome_tracking() {
        let metrics = EngineMetrics::new();
        metrics.resolution_succeeded(3, Duration::from_millis(100));
        metrics.resolution_failed(ErrorKind::Api, 1, Duration::from_millis(50));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.resolutions_succeeded, 1);
        assert_eq!(snapshot.resolutions_failed, 1);
        // 3 attempts = 2 retries.
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.errors_by_kind[kind_index(ErrorKind::Api)], 1);
        assert_eq!(snapshot.mean_latency, Some(Duration::from_millis(75)));
    }

    #[test]
    fn test_gauges_follow_transitions() {
        let metrics = EngineMetrics::new();
        metrics.queued_inc(Priority::Critical);
        metrics.queued_inc(Priority::Critical);
        metrics.queued_dec(Priority::Critical);
        metrics.active_inc(Priority::Critical);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queued[Priority::Critical.index()], 1);
        assert_eq!(snapshot.active[Priority::Critical.index()], 1);
        assert_eq!(snapshot.total_queued(), 1);
        assert_eq!(snapshot.total_active(), 1);
    }

    #[test]
    fn test_reset_gauges() {
        let metrics = EngineMetrics::new();
        metrics.queued_inc(Priority::Low);
        metrics.active_inc(Priority::High);
        metrics.reset_gauges();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_queued(), 0);
        assert_eq!(snapshot.total_active(), 0);
    }

    #[test]
    fn test_mean_latency_absent_without_samples() {
        let metrics = EngineMetrics::new();
        assert!(metrics.snapshot().mean_latency.is_none());
    }

    #[test]
    fn test_delivery_counters() {
        let metrics = EngineMetrics::new();
        metrics.delivered();
        metrics.delivered();
        metrics.delivery_suppressed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deliveries, 2);
        assert_eq!(snapshot.deliveries_suppressed, 1);
    }
}
