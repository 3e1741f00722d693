//! Single-flight resolution: at most one outstanding fetch per key.
//!
//! When several callers want the same key at once, only the first actually
//! runs the fetch; the rest subscribe to the same outcome over a broadcast
//! channel. A cache hit short-circuits before the in-flight table is even
//! consulted.
//!
//! ```text
//! resolve("alice") ─┐
//!                   │                         executor
//! resolve("alice") ─┼──► SingleFlight ──────► (one fetch)
//!                   │        │                    │
//! resolve("alice") ─┘        ▼                    ▼
//!                      [all callers          [one network
//!                       share outcome]◄────── resolution]
//! ```
//!
//! On completion the in-flight marker is removed *before* the outcome is
//! broadcast, so a caller arriving in the gap starts a fresh resolution
//! instead of subscribing to a channel that will never fire again.

use crate::cache::ProfileCache;
use crate::error::FetchError;
use crate::fetch::{FetchFailure, FetchSuccess};
use crate::profile::DriverProfile;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Outcome shared between all callers of one resolution.
pub type SharedOutcome = Result<Arc<DriverProfile>, FetchError>;

/// Why a `resolve` call produced no profile.
#[derive(Debug, Clone)]
pub enum ResolveError {
    /// The resolution ended with a classified terminal failure.
    Failed(FetchError),
    /// The engine was cancelled before the resolution finished.
    Aborted,
}

/// Counters for monitoring deduplication effectiveness.
#[derive(Debug, Clone, Default)]
pub struct SingleFlightStats {
    /// Calls served straight from cache.
    pub cache_hits: u64,
    /// Calls that started a fresh fetch.
    pub led: u64,
    /// Calls that joined an outstanding fetch.
    pub joined: u64,
}

enum Registration {
    Cached(Arc<DriverProfile>),
    Lead,
    Joined(broadcast::Receiver<SharedOutcome>),
}

/// Deduplicating resolver over a shared cache.
pub struct SingleFlight {
    cache: Arc<ProfileCache>,
    in_flight: Mutex<HashMap<String, broadcast::Sender<SharedOutcome>>>,
    stats: Mutex<SingleFlightStats>,
}

impl SingleFlight {
    pub fn new(cache: Arc<ProfileCache>) -> Self {
        Self {
            cache,
            in_flight: Mutex::new(HashMap::new()),
            stats: Mutex::new(SingleFlightStats::default()),
        }
    }

    /// Resolves `key`, invoking `factory` only if no resolution for the
    /// key is cached or outstanding.
    ///
    /// Every concurrent caller for the same key receives the identical
    /// outcome. A successful outcome is written to the cache before
    /// fan-out, so late callers hit the cache instead of re-fetching.
    pub async fn resolve<F, Fut>(&self, key: &str, factory: F) -> Result<Arc<DriverProfile>, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchSuccess, FetchFailure>>,
    {
        match self.register(key) {
            Registration::Cached(profile) => Ok(profile),
            Registration::Joined(mut rx) => match rx.recv().await {
                Ok(Ok(profile)) => Ok(profile),
                Ok(Err(error)) => Err(ResolveError::Failed(error)),
                // Sender dropped without an outcome: systemic abort.
                Err(_) => Err(ResolveError::Aborted),
            },
            Registration::Lead => {
                let outcome = match factory().await {
                    Ok(success) => Ok(success.profile),
                    Err(FetchFailure::Terminal { error, .. }) => Err(error),
                    Err(FetchFailure::Aborted) => {
                        self.drop_marker(key);
                        return Err(ResolveError::Aborted);
                    }
                };
                self.complete(key, outcome.clone());
                outcome.map_err(ResolveError::Failed)
            }
        }
    }

    /// Registers interest in `key`: cache hit, fresh lead, or join.
    fn register(&self, key: &str) -> Registration {
        if let Some(profile) = self.cache.get(key) {
            self.stats.lock().unwrap().cache_hits += 1;
            return Registration::Cached(profile);
        }

        let mut in_flight = self.in_flight.lock().unwrap();
        let mut stats = self.stats.lock().unwrap();

        if let Some(tx) = in_flight.get(key) {
            stats.joined += 1;
            debug!(key, "Joining outstanding resolution");
            Registration::Joined(tx.subscribe())
        } else {
            // Capacity 8: concurrent waiters per key are few in practice,
            // and each receives exactly one message.
            let (tx, _rx) = broadcast::channel(8);
            in_flight.insert(key.to_string(), tx);
            stats.led += 1;
            Registration::Lead
        }
    }

    /// Publishes the outcome, removing the marker before fan-out.
    fn complete(&self, key: &str, outcome: SharedOutcome) {
        if let Ok(profile) = &outcome {
            if !self.cache.set(key, Arc::clone(profile)) {
                // Caching is best-effort; the resolution still succeeds.
                warn!(key, "Profile could not be cached");
            }
        }

        let sender = self.in_flight.lock().unwrap().remove(key);
        if let Some(tx) = sender {
            // Waiters may all have dropped; that is not an error.
            let _ = tx.send(outcome);
        }
    }

    /// Drops the in-flight marker without an outcome, waking waiters with
    /// a closed channel. Used on systemic abort.
    fn drop_marker(&self, key: &str) {
        self.in_flight.lock().unwrap().remove(key);
    }

    /// Drops every in-flight marker; all waiters observe an abort.
    pub fn abort_all(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.len();
        in_flight.clear();
        if count > 0 {
            debug!(count, "Aborted outstanding resolutions");
        }
    }

    /// Number of currently outstanding resolutions.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Snapshot of the dedup counters.
    pub fn stats(&self) -> SingleFlightStats {
        self.stats.lock().unwrap().clone()
    }
}
