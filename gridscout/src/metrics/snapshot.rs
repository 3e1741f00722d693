//! Point-in-time view of engine metrics.

use serde::Serialize;
use std::time::Duration;

/// Snapshot of every engine counter and gauge.
///
/// Produced by [`EngineMetrics::snapshot`](super::EngineMetrics::snapshot);
/// all values are observed within one call but individual counters are
/// read independently, so cross-counter arithmetic is approximate under
/// concurrent load. Serializable for stats dumps.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    /// Time since metrics collection started.
    pub uptime: Duration,

    // Admission
    pub keys_submitted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,

    // Resolution outcomes
    pub resolutions_succeeded: u64,
    pub resolutions_failed: u64,
    pub resolutions_aborted: u64,
    pub retries: u64,

    // Delivery
    pub deliveries: u64,
    pub deliveries_suppressed: u64,

    // Scheduling
    /// Queued items per level, indexed by [`Priority::index`](crate::priority::Priority::index).
    pub queued: [usize; 5],
    /// Active items per level, same indexing.
    pub active: [usize; 5],
    pub deferrals: u64,
    pub resumes: u64,
    pub rebalances: u64,

    // Failure taxonomy histogram: network, timeout, api, data, unknown.
    pub errors_by_kind: [u64; 5],

    // Latency over successful and failed resolutions.
    pub mean_latency: Option<Duration>,
}

impl EngineSnapshot {
    /// Cache hit rate over admissions, 0.0 when nothing was submitted.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Total items queued across all levels.
    pub fn total_queued(&self) -> usize {
        self.queued.iter().sum()
    }

    /// Total items active across all levels.
    pub fn total_active(&self) -> usize {
        self.active.iter().sum()
    }
}
