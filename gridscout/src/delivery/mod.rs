//! Progressive result delivery.
//!
//! Each key's outcome is pushed to that key's registered consumers the
//! moment it is known, independent of every other key: results arrive out
//! of submission order and one key's failure never blocks a sibling.
//!
//! Delivery is idempotent per resolution: the first terminal outcome for a
//! key wins, later ones are suppressed. This guards the race where a stale
//! retry and a fresh resolution both complete. A new resolution for the
//! same key re-arms delivery via [`DeliveryLedger::begin`].
//!
//! The ledger holds only `Weak` consumer handles — consumer lifetime
//! belongs to the caller, and handles whose owner went away are pruned
//! during fan-out.

use crate::error::FetchError;
use crate::metrics::EngineMetrics;
use crate::profile::DriverProfile;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Receives terminal outcomes for keys it registered for.
pub trait ProfileConsumer: Send + Sync {
    /// Called once when the key's profile resolves.
    fn on_profile(&self, key: &str, profile: &Arc<DriverProfile>);

    /// Called once when the key's resolution fails terminally.
    fn on_error(&self, key: &str, error: &FetchError);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DeliveryState {
    Pending,
    Delivered,
}

/// Tracks consumer registrations and per-key delivery state.
pub struct DeliveryLedger {
    consumers: Mutex<HashMap<String, Vec<Weak<dyn ProfileConsumer>>>>,
    state: Mutex<HashMap<String, DeliveryState>>,
    metrics: Arc<EngineMetrics>,
}

impl DeliveryLedger {
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        Self {
            consumers: Mutex::new(HashMap::new()),
            state: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Associates a consumer with a key.
    ///
    /// Only a weak handle is kept; dropping the consumer unregisters it.
    pub fn register(&self, key: &str, consumer: &Arc<dyn ProfileConsumer>) {
        self.consumers
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(Arc::downgrade(consumer));
    }

    /// Number of keys with at least one registration.
    pub fn registered_key_count(&self) -> usize {
        self.consumers.lock().unwrap().len()
    }

    /// Whether any live consumer is registered for `key`.
    pub fn has_consumers(&self, key: &str) -> bool {
        let consumers = self.consumers.lock().unwrap();
        consumers
            .get(key)
            .is_some_and(|list| list.iter().any(|weak| weak.strong_count() > 0))
    }

    /// Arms delivery for a fresh resolution of `key`.
    ///
    /// Clears any terminal mark from a previous resolution so the new
    /// outcome can be delivered.
    pub fn begin(&self, key: &str) {
        self.state
            .lock()
            .unwrap()
            .insert(key.to_string(), DeliveryState::Pending);
    }

    /// Delivers a success to all consumers of `key`.
    ///
    /// Returns `true` if consumers were notified, `false` if the delivery
    /// was suppressed as a duplicate.
    pub fn deliver_success(&self, key: &str, profile: &Arc<DriverProfile>) -> bool {
        if !self.mark_delivered(key) {
            return false;
        }
        let notified = self.for_each_consumer(key, |c| c.on_profile(key, profile));
        debug!(key, notified, "Delivered profile");
        true
    }

    /// Delivers a terminal failure to all consumers of `key`.
    ///
    /// Same idempotence contract as [`deliver_success`](Self::deliver_success).
    pub fn deliver_failure(&self, key: &str, error: &FetchError) -> bool {
        if !self.mark_delivered(key) {
            return false;
        }
        let notified = self.for_each_consumer(key, |c| c.on_error(key, error));
        debug!(key, notified, kind = %error.kind, "Delivered failure");
        true
    }

    /// Transitions the key to delivered; `false` means it already was.
    fn mark_delivered(&self, key: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.get(key) {
            Some(DeliveryState::Delivered) => {
                self.metrics.delivery_suppressed();
                false
            }
            _ => {
                state.insert(key.to_string(), DeliveryState::Delivered);
                self.metrics.delivered();
                true
            }
        }
    }

    /// Fans out to the live consumers of `key`, pruning dead handles.
    ///
    /// Returns the number of consumers notified.
    fn for_each_consumer<F>(&self, key: &str, notify: F) -> usize
    where
        F: Fn(&Arc<dyn ProfileConsumer>),
    {
        let handles: Vec<Weak<dyn ProfileConsumer>> = {
            let mut consumers = self.consumers.lock().unwrap();
            match consumers.get_mut(key) {
                Some(list) => {
                    list.retain(|weak| weak.strong_count() > 0);
                    list.clone()
                }
                None => Vec::new(),
            }
        };

        // Notify outside the lock; a consumer callback may re-enter the
        // engine (e.g. submit follow-up keys).
        let mut notified = 0;
        for weak in handles {
            if let Some(consumer) = weak.upgrade() {
                notify(&consumer);
                notified += 1;
            }
        }
        notified
    }

    /// Drops all registrations and delivery state.
    pub fn clear(&self) {
        self.consumers.lock().unwrap().clear();
        self.state.lock().unwrap().clear();
    }
}
