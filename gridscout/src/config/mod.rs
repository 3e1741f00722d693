//! Engine configuration.
//!
//! Each subsystem takes its own small config struct; [`EngineConfig`]
//! bundles them for the facade. All defaults live in [`defaults`].

pub mod defaults;

use crate::priority::Priority;
use std::time::Duration;

/// Per-priority-level concurrency caps.
///
/// The scheduler admits work at a level only while the level's active set
/// is smaller than its cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyCaps {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Cap for the DEFERRED level while pressure is clear. Under pressure
    /// the scheduler treats this level's cap as zero.
    pub deferred: usize,
}

impl ConcurrencyCaps {
    /// Cap for one level (ignoring pressure gating).
    pub fn cap(&self, level: Priority) -> usize {
        match level {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
            Priority::Deferred => self.deferred,
        }
    }

    /// Replaces the cap for one level.
    pub fn set_cap(&mut self, level: Priority, cap: usize) {
        match level {
            Priority::Critical => self.critical = cap,
            Priority::High => self.high = cap,
            Priority::Medium => self.medium = cap,
            Priority::Low => self.low = cap,
            Priority::Deferred => self.deferred = cap,
        }
    }
}

impl Default for ConcurrencyCaps {
    fn default() -> Self {
        Self {
            critical: defaults::DEFAULT_CAP_CRITICAL,
            high: defaults::DEFAULT_CAP_HIGH,
            medium: defaults::DEFAULT_CAP_MEDIUM,
            low: defaults::DEFAULT_CAP_LOW,
            deferred: defaults::DEFAULT_CAP_DEFERRED,
        }
    }
}

/// Retry behavior for one key's resolution.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum attempts (first try included).
    pub max_retries: u32,
    /// Base backoff; attempt n waits `base * 2^(n-1)` before retrying.
    pub backoff_base: Duration,
    /// Deadline for each individual attempt. A key may take up to
    /// `max_retries * request_timeout` plus backoff in the worst case.
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::DEFAULT_MAX_RETRIES,
            backoff_base: defaults::DEFAULT_BACKOFF_BASE,
            request_timeout: defaults::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Memory-pressure detection.
#[derive(Debug, Clone, Copy)]
pub struct PressureConfig {
    /// Usage at or above this enters the pressure state.
    pub threshold_bytes: u64,
    /// A sample must fall below `relief_fraction * threshold_bytes` to
    /// count toward relief.
    pub relief_fraction: f64,
    /// Consecutive qualifying samples required before pressure clears.
    pub confirm_samples: u32,
    /// Probe sampling interval.
    pub sample_interval: Duration,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: defaults::DEFAULT_PRESSURE_THRESHOLD_BYTES,
            relief_fraction: defaults::DEFAULT_PRESSURE_RELIEF_FRACTION,
            confirm_samples: defaults::DEFAULT_PRESSURE_CONFIRM_SAMPLES,
            sample_interval: defaults::DEFAULT_PRESSURE_SAMPLE_INTERVAL,
        }
    }
}

/// Deferred-work resumption pacing.
///
/// Once pressure clears, deferred items return to their original queues a
/// few at a time on a timer rather than all at once.
#[derive(Debug, Clone, Copy)]
pub struct ResumeConfig {
    /// Items re-queued per tick.
    pub batch: usize,
    /// Tick interval.
    pub interval: Duration,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            batch: defaults::DEFAULT_RESUME_BATCH,
            interval: defaults::DEFAULT_RESUME_INTERVAL,
        }
    }
}

/// Optional latency-adaptive cap control.
///
/// When enabled, the scheduler shrinks the CRITICAL/HIGH caps while the
/// rolling average completion latency sits above `high_latency`, and grows
/// them back while it sits below `low_latency`. Disabled by default.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveCapsConfig {
    pub enabled: bool,
    pub high_latency: Duration,
    pub low_latency: Duration,
    /// Completions considered by the rolling window.
    pub window: usize,
    pub min_critical: usize,
    pub min_high: usize,
    pub max_critical: usize,
    pub max_high: usize,
}

impl Default for AdaptiveCapsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            high_latency: defaults::DEFAULT_ADAPTIVE_HIGH_LATENCY,
            low_latency: defaults::DEFAULT_ADAPTIVE_LOW_LATENCY,
            window: defaults::DEFAULT_ADAPTIVE_WINDOW,
            min_critical: defaults::DEFAULT_ADAPTIVE_MIN_CRITICAL,
            min_high: defaults::DEFAULT_ADAPTIVE_MIN_HIGH,
            max_critical: defaults::DEFAULT_ADAPTIVE_MAX_CRITICAL,
            max_high: defaults::DEFAULT_ADAPTIVE_MAX_HIGH,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub caps: ConcurrencyCaps,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub pressure: PressureConfig,
    pub resume: ResumeConfig,
    pub adaptive: AdaptiveCapsConfig,
}

/// Cache behavior.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Age after which a cached profile is treated as absent.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: defaults::DEFAULT_CACHE_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_caps_match_documented_values() {
        let caps = ConcurrencyCaps::default();
        assert_eq!(caps.cap(Priority::Critical), 4);
        assert_eq!(caps.cap(Priority::High), 2);
        assert_eq!(caps.cap(Priority::Medium), 1);
        assert_eq!(caps.cap(Priority::Low), 1);
        assert_eq!(caps.cap(Priority::Deferred), 1);
    }

    #[test]
    fn test_set_cap_round_trips() {
        let mut caps = ConcurrencyCaps::default();
        caps.set_cap(Priority::Critical, 6);
        caps.set_cap(Priority::High, 3);
        assert_eq!(caps.cap(Priority::Critical), 6);
        assert_eq!(caps.cap(Priority::High), 3);
        // Other levels untouched.
        assert_eq!(caps.cap(Priority::Medium), 1);
    }

    #[test]
    fn test_default_retry_schedule() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.backoff_base, Duration::from_secs(1));
    }

    #[test]
    fn test_default_cache_ttl_is_five_minutes() {
        assert_eq!(CacheConfig::default().ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_adaptive_disabled_by_default() {
        assert!(!AdaptiveCapsConfig::default().enabled);
    }
}
