//! Default configuration values.
//!
//! These are configuration defaults, not hard-coded behavior; every value
//! here can be overridden through the structs in [`super`].

use std::time::Duration;

/// How long a cached profile is served before it counts as absent.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Maximum attempts per key (first try plus retries).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff; attempt n waits `base * 2^(n-1)`.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Per-attempt deadline for one remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Concurrency cap for mostly-visible work.
pub const DEFAULT_CAP_CRITICAL: usize = 4;

/// Concurrency cap for partially-visible work.
pub const DEFAULT_CAP_HIGH: usize = 2;

/// Concurrency cap for on-page but not visible work.
pub const DEFAULT_CAP_MEDIUM: usize = 1;

/// Concurrency cap for background/prefetch work.
pub const DEFAULT_CAP_LOW: usize = 1;

/// Concurrency cap for administratively held-back work while pressure is
/// clear. Under pressure the effective cap is zero.
pub const DEFAULT_CAP_DEFERRED: usize = 1;

/// Approximate memory usage above which the engine defers deferrable work.
pub const DEFAULT_PRESSURE_THRESHOLD_BYTES: u64 = 512 * 1024 * 1024;

/// Fraction of the threshold a sample must fall below to count toward
/// pressure relief.
pub const DEFAULT_PRESSURE_RELIEF_FRACTION: f64 = 0.9;

/// Consecutive sub-threshold samples required before pressure clears.
pub const DEFAULT_PRESSURE_CONFIRM_SAMPLES: u32 = 2;

/// How often the memory probe is sampled.
pub const DEFAULT_PRESSURE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Deferred items re-queued per resume tick once pressure clears.
pub const DEFAULT_RESUME_BATCH: usize = 3;

/// Interval between deferred-resume ticks.
pub const DEFAULT_RESUME_INTERVAL: Duration = Duration::from_millis(750);

/// Rolling average latency above which CRITICAL/HIGH caps shrink.
pub const DEFAULT_ADAPTIVE_HIGH_LATENCY: Duration = Duration::from_secs(2);

/// Rolling average latency below which CRITICAL/HIGH caps grow.
pub const DEFAULT_ADAPTIVE_LOW_LATENCY: Duration = Duration::from_millis(500);

/// Completions considered by the rolling latency window.
pub const DEFAULT_ADAPTIVE_WINDOW: usize = 32;

/// Floor for the adaptive CRITICAL cap.
pub const DEFAULT_ADAPTIVE_MIN_CRITICAL: usize = 2;

/// Floor for the adaptive HIGH cap.
pub const DEFAULT_ADAPTIVE_MIN_HIGH: usize = 1;

/// Ceiling for the adaptive CRITICAL cap.
pub const DEFAULT_ADAPTIVE_MAX_CRITICAL: usize = 6;

/// Ceiling for the adaptive HIGH cap.
pub const DEFAULT_ADAPTIVE_MAX_HIGH: usize = 4;
