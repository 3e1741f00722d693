//! Latency-adaptive concurrency caps.
//!
//! An optional secondary control loop: when the rolling average completion
//! latency climbs past a high-water mark the CRITICAL/HIGH caps shrink by
//! one, and when it falls below a low-water mark they grow back, inside
//! configured floors and ceilings. A shrink never takes a cap below the
//! level's current active count, so the active-set bound
//! `|Active(p)| <= cap[p]` keeps holding at every instant.

use crate::config::{AdaptiveCapsConfig, ConcurrencyCaps};
use crate::priority::Priority;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Minimum samples before the controller acts at all.
const MIN_SAMPLES: usize = 4;

/// Rolling-window cap controller.
pub struct AdaptiveCapController {
    config: AdaptiveCapsConfig,
    window: VecDeque<Duration>,
}

impl AdaptiveCapController {
    pub fn new(config: AdaptiveCapsConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window),
            config,
        }
    }

    /// Records one completion latency.
    pub fn record(&mut self, latency: Duration) {
        if !self.config.enabled {
            return;
        }
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(latency);
    }

    /// Rolling average over the window, `None` until enough samples exist.
    fn rolling_average(&self) -> Option<Duration> {
        if self.window.len() < MIN_SAMPLES {
            return None;
        }
        let total: Duration = self.window.iter().sum();
        Some(total / self.window.len() as u32)
    }

    /// Reconsiders the CRITICAL/HIGH caps against the rolling average.
    ///
    /// `active_critical` / `active_high` are the levels' current active
    /// counts; a shrink is clamped so it never undercuts them. Returns
    /// `true` when a cap changed.
    pub fn adjust(
        &mut self,
        caps: &mut ConcurrencyCaps,
        active_critical: usize,
        active_high: usize,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }
        let Some(average) = self.rolling_average() else {
            return false;
        };

        let (new_critical, new_high) = if average > self.config.high_latency {
            (
                caps.critical
                    .saturating_sub(1)
                    .max(self.config.min_critical)
                    .max(active_critical),
                caps.high
                    .saturating_sub(1)
                    .max(self.config.min_high)
                    .max(active_high),
            )
        } else if average < self.config.low_latency {
            (
                (caps.critical + 1).min(self.config.max_critical),
                (caps.high + 1).min(self.config.max_high),
            )
        } else {
            return false;
        };

        if new_critical == caps.critical && new_high == caps.high {
            return false;
        }

        debug!(
            average_ms = average.as_millis() as u64,
            critical = new_critical,
            high = new_high,
            "Adaptive cap adjustment"
        );
        caps.set_cap(Priority::Critical, new_critical);
        caps.set_cap(Priority::High, new_high);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveCapsConfig {
        AdaptiveCapsConfig {
            enabled: true,
            high_latency: Duration::from_secs(2),
            low_latency: Duration::from_millis(500),
            window: 8,
            min_critical: 2,
            min_high: 1,
            max_critical: 6,
            max_high: 4,
        }
    }

    fn fill(controller: &mut AdaptiveCapController, latency: Duration, count: usize) {
        for _ in 0..count {
            controller.record(latency);
        }
    }

    #[test]
    fn test_disabled_controller_never_adjusts() {
        let mut controller = AdaptiveCapController::new(AdaptiveCapsConfig::default());
        fill(&mut controller, Duration::from_secs(10), 16);
        let mut caps = ConcurrencyCaps::default();
        assert!(!controller.adjust(&mut caps, 0, 0));
        assert_eq!(caps, ConcurrencyCaps::default());
    }

    #[test]
    fn test_too_few_samples_no_adjustment() {
        let mut controller = AdaptiveCapController::new(config());
        fill(&mut controller, Duration::from_secs(10), MIN_SAMPLES - 1);
        let mut caps = ConcurrencyCaps::default();
        assert!(!controller.adjust(&mut caps, 0, 0));
    }

    #[test]
    fn test_high_latency_shrinks_caps() {
        let mut controller = AdaptiveCapController::new(config());
        fill(&mut controller, Duration::from_secs(5), 8);
        let mut caps = ConcurrencyCaps::default();

        assert!(controller.adjust(&mut caps, 0, 0));
        assert_eq!(caps.critical, 3);
        assert_eq!(caps.high, 1);
    }

    #[test]
    fn test_shrink_respects_floors() {
        let mut controller = AdaptiveCapController::new(config());
        fill(&mut controller, Duration::from_secs(5), 8);
        let mut caps = ConcurrencyCaps {
            critical: 2,
            high: 1,
            ..ConcurrencyCaps::default()
        };

        assert!(!controller.adjust(&mut caps, 0, 0));
        assert_eq!(caps.critical, 2);
        assert_eq!(caps.high, 1);
    }

    #[test]
    fn test_shrink_never_undercuts_active_count() {
        let mut controller = AdaptiveCapController::new(config());
        fill(&mut controller, Duration::from_secs(5), 8);
        let mut caps = ConcurrencyCaps::default();

        // 4 critical items are running; the cap must not drop below 4.
        assert!(controller.adjust(&mut caps, 4, 0));
        assert_eq!(caps.critical, 4);
        assert_eq!(caps.high, 1);
    }

    #[test]
    fn test_low_latency_grows_caps() {
        let mut controller = AdaptiveCapController::new(config());
        fill(&mut controller, Duration::from_millis(100), 8);
        let mut caps = ConcurrencyCaps::default();

        assert!(controller.adjust(&mut caps, 0, 0));
        assert_eq!(caps.critical, 5);
        assert_eq!(caps.high, 3);
    }

    #[test]
    fn test_grow_respects_ceilings() {
        let mut controller = AdaptiveCapController::new(config());
        fill(&mut controller, Duration::from_millis(100), 8);
        let mut caps = ConcurrencyCaps {
            critical: 6,
            high: 4,
            ..ConcurrencyCaps::default()
        };

        assert!(!controller.adjust(&mut caps, 0, 0));
        assert_eq!(caps.critical, 6);
        assert_eq!(caps.high, 4);
    }

    #[test]
    fn test_mid_band_latency_no_adjustment() {
        let mut controller = AdaptiveCapController::new(config());
        fill(&mut controller, Duration::from_secs(1), 8);
        let mut caps = ConcurrencyCaps::default();
        assert!(!controller.adjust(&mut caps, 0, 0));
    }

    #[test]
    fn test_window_is_bounded() {
        let mut controller = AdaptiveCapController::new(config());
        // Old slow samples should be pushed out by fast ones.
        fill(&mut controller, Duration::from_secs(10), 8);
        fill(&mut controller, Duration::from_millis(100), 8);
        let mut caps = ConcurrencyCaps::default();

        assert!(controller.adjust(&mut caps, 0, 0));
        assert_eq!(caps.critical, 5);
    }
}
