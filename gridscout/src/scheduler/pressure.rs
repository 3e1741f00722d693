//! Memory-pressure detection with relief hysteresis.
//!
//! The scheduler samples an external [`MemoryProbe`] on a timer. Crossing
//! the threshold enters the pressure state immediately; leaving it
//! requires several consecutive samples below a relief margin, so a
//! usage figure bouncing around the threshold doesn't flap the gate.
//! Without a probe the engine is never under pressure.

use crate::config::PressureConfig;
use std::sync::Arc;
use tracing::info;

/// Reports approximate current memory usage on demand.
pub trait MemoryProbe: Send + Sync {
    /// Current usage in bytes; `None` when no figure is available for
    /// this sample (the previous pressure state is kept).
    fn usage_bytes(&self) -> Option<u64>;
}

/// Tracks the pressure state from periodic probe samples.
pub struct PressureMonitor {
    probe: Option<Arc<dyn MemoryProbe>>,
    config: PressureConfig,
    under_pressure: bool,
    /// Consecutive qualifying samples toward relief.
    relief_streak: u32,
}

impl PressureMonitor {
    pub fn new(probe: Option<Arc<dyn MemoryProbe>>, config: PressureConfig) -> Self {
        Self {
            probe,
            config,
            under_pressure: false,
            relief_streak: 0,
        }
    }

    /// Takes one probe sample and returns the updated pressure state.
    pub fn sample(&mut self) -> bool {
        let Some(probe) = &self.probe else {
            return false;
        };
        let Some(usage) = probe.usage_bytes() else {
            return self.under_pressure;
        };

        if usage >= self.config.threshold_bytes {
            if !self.under_pressure {
                info!(
                    usage_bytes = usage,
                    threshold_bytes = self.config.threshold_bytes,
                    "Memory pressure detected, deferring low-importance work"
                );
            }
            self.under_pressure = true;
            self.relief_streak = 0;
        } else if self.under_pressure {
            let relief_limit =
                (self.config.threshold_bytes as f64 * self.config.relief_fraction) as u64;
            if usage < relief_limit {
                self.relief_streak += 1;
                if self.relief_streak >= self.config.confirm_samples {
                    info!(
                        usage_bytes = usage,
                        samples = self.relief_streak,
                        "Memory pressure relieved"
                    );
                    self.under_pressure = false;
                    self.relief_streak = 0;
                }
            } else {
                // Between relief margin and threshold: not confirmed.
                self.relief_streak = 0;
            }
        }

        self.under_pressure
    }

    /// Last computed pressure state without taking a new sample.
    pub fn under_pressure(&self) -> bool {
        self.under_pressure
    }
}
