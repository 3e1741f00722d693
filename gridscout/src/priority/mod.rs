//! Priority levels and the visibility-driven priority controller.
//!
//! A key's importance is derived from what an external visibility source
//! reports about it: a profile card the user can actually see outranks one
//! further down the page, which outranks background prefetch. The five
//! levels also carry per-level concurrency caps in the scheduler.
//!
//! The controller owns the latest [`VisibilitySignal`] per key and turns
//! signal updates into level changes; relocating queued work is the
//! scheduler's job, the controller only reports that a change happened.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Dispatch priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// At least half visible in the viewport.
    Critical,
    /// Partially visible, or just outside the extended viewport margin.
    High,
    /// Registered and reachable on the page but not visible.
    Medium,
    /// Background / prefetch work.
    Low,
    /// Administratively held back (memory pressure).
    Deferred,
}

impl Priority {
    /// All levels in dispatch-scan order (highest first).
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Deferred,
    ];

    /// Stable lowercase label for metrics and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::Deferred => "deferred",
        }
    }

    /// Dense index for per-level arrays (0 = Critical .. 4 = Deferred).
    pub fn index(&self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
            Priority::Deferred => 4,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest visibility report for one key.
#[derive(Debug, Clone, Copy)]
pub struct VisibilitySignal {
    /// Whether the key's display target intersects the (extended) viewport.
    pub is_visible: bool,
    /// Fraction of the target inside the viewport, 0.0..=1.0.
    pub intersection_ratio: f64,
    /// When this signal was observed.
    pub observed_at: Instant,
}

/// Computes the dispatch level for a visibility state.
///
/// Deterministic mapping:
/// - visible with ratio ≥ 0.5 → `Critical`
/// - visible with any smaller ratio (including a target reported visible
///   only through an extended viewport margin) → `High`
/// - not visible but present on the page → `Medium`
/// - otherwise → `Low`
///
/// `Deferred` is never computed from visibility; only the scheduler moves
/// items there, under memory pressure.
pub fn calculate_priority(is_visible: bool, intersection_ratio: f64, on_page: bool) -> Priority {
    if is_visible {
        if intersection_ratio >= 0.5 {
            Priority::Critical
        } else {
            Priority::High
        }
    } else if on_page {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Tracks visibility per key and detects level transitions.
///
/// Thread-safe; updated from the visibility source's thread, read from the
/// engine when new work is admitted.
pub struct PriorityController {
    signals: Mutex<HashMap<String, VisibilitySignal>>,
}

impl PriorityController {
    /// Creates an empty controller.
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(HashMap::new()),
        }
    }

    /// Records a visibility update for `key`.
    ///
    /// Returns `Some(new_level)` when the computed level differs from the
    /// one computed from the previous signal (or when the key is new),
    /// `None` when the level is unchanged. The caller is expected to ask
    /// the scheduler to rebalance on `Some`.
    pub fn update_visibility(
        &self,
        key: &str,
        is_visible: bool,
        intersection_ratio: f64,
    ) -> Option<Priority> {
        let mut signals = self.signals.lock().unwrap();

        let old_level = signals
            .get(key)
            .map(|s| calculate_priority(s.is_visible, s.intersection_ratio, true));

        signals.insert(
            key.to_string(),
            VisibilitySignal {
                is_visible,
                intersection_ratio,
                observed_at: Instant::now(),
            },
        );

        let new_level = calculate_priority(is_visible, intersection_ratio, true);
        if old_level == Some(new_level) {
            None
        } else {
            Some(new_level)
        }
    }

    /// Dispatch level computed from the key's recorded signal, if any.
    ///
    /// `None` means the visibility source has never reported this key;
    /// the caller decides whether that makes it on-page (`Medium`) or
    /// background (`Low`) work.
    pub fn signal_level(&self, key: &str) -> Option<Priority> {
        let signals = self.signals.lock().unwrap();
        signals
            .get(key)
            .map(|s| calculate_priority(s.is_visible, s.intersection_ratio, true))
    }

    /// Number of keys with a recorded signal.
    pub fn tracked_keys(&self) -> usize {
        self.signals.lock().unwrap().len()
    }

    /// Drops all recorded signals.
    pub fn clear(&self) {
        self.signals.lock().unwrap().clear();
    }
}

impl Default for PriorityController {
    fn default() -> Self {
        Self::new()
    }
}
