//! Engine facade.
//!
//! [`ProfileEngine`] composes the cache, single-flight resolver, request
//! executor, priority controller, scheduler, delivery ledger, and metrics
//! into the surface collaborators actually use: `submit`, `register`,
//! `update_visibility`, `stats`, `cleanup`. Construction wires the
//! components and spawns the scheduler actor; the engine itself holds no
//! scheduling state.

use crate::cache::ProfileCache;
use crate::config::EngineConfig;
use crate::delivery::{DeliveryLedger, ProfileConsumer};
use crate::fetch::RequestExecutor;
use crate::metrics::{EngineMetrics, EngineSnapshot};
use crate::priority::PriorityController;
use crate::profile::DriverProfile;
use crate::provider::ProfileProvider;
use crate::scheduler::{DispatchScheduler, MemoryProbe, SchedulerCommand};
use crate::singleflight::SingleFlight;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Operational snapshot exposed to collaborators.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    /// Queued items per level, indexed by [`Priority::index`](crate::priority::Priority::index).
    pub queued: [usize; 5],
    /// Active items per level, same indexing.
    pub active: [usize; 5],
    pub cache_hit_rate: f64,
    pub under_pressure: bool,
    /// Keys with at least one registered consumer.
    pub registered_keys: usize,
}

/// The profile resolution engine.
///
/// Must be created inside a Tokio runtime; the scheduler actor is spawned
/// on construction and stopped by [`cleanup`](Self::cleanup) or drop.
pub struct ProfileEngine {
    cmd_tx: mpsc::UnboundedSender<SchedulerCommand>,
    cache: Arc<ProfileCache>,
    controller: Arc<PriorityController>,
    ledger: Arc<DeliveryLedger>,
    metrics: Arc<EngineMetrics>,
    pressure_flag: Arc<AtomicBool>,
    cache_ttl: std::time::Duration,
    cancel: CancellationToken,
}

impl ProfileEngine {
    /// Creates an engine over `provider` with no memory probe (never under
    /// pressure).
    pub fn new<P>(provider: Arc<P>, config: EngineConfig) -> Self
    where
        P: ProfileProvider + 'static,
    {
        Self::with_probe(provider, config, None)
    }

    /// Creates an engine with an optional memory probe for pressure
    /// gating.
    pub fn with_probe<P>(
        provider: Arc<P>,
        config: EngineConfig,
        probe: Option<Arc<dyn MemoryProbe>>,
    ) -> Self
    where
        P: ProfileProvider + 'static,
    {
        let cache = Arc::new(ProfileCache::new(config.cache.ttl));
        let metrics = Arc::new(EngineMetrics::new());
        let ledger = Arc::new(DeliveryLedger::new(Arc::clone(&metrics)));
        let controller = Arc::new(PriorityController::new());
        let singleflight = Arc::new(SingleFlight::new(Arc::clone(&cache)));
        let executor = Arc::new(RequestExecutor::new(provider, config.retry));
        let pressure_flag = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let cache_ttl = config.cache.ttl;

        let (scheduler, cmd_tx) = DispatchScheduler::new(
            config,
            Arc::clone(&cache),
            singleflight,
            executor,
            Arc::clone(&controller),
            Arc::clone(&ledger),
            Arc::clone(&metrics),
            probe,
            Arc::clone(&pressure_flag),
            cancel.clone(),
        );
        tokio::spawn(scheduler.run());
        info!("Profile engine started");

        Self {
            cmd_tx,
            cache,
            controller,
            ledger,
            metrics,
            pressure_flag,
            cache_ttl,
            cancel,
        }
    }

    /// Submits a batch of keys for resolution, fire-and-forget.
    ///
    /// Results arrive through registered consumers as each key resolves;
    /// cached keys are delivered immediately, duplicates of pending keys
    /// are absorbed.
    pub fn submit(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        debug!(count = keys.len(), "Submitting keys");
        // Send fails only after cleanup; submissions are dropped then.
        let _ = self.cmd_tx.send(SchedulerCommand::Submit { keys });
    }

    /// Associates a delivery target with a key.
    ///
    /// The engine keeps only a weak handle; dropping the consumer
    /// unregisters it.
    pub fn register(&self, key: &str, consumer: &Arc<dyn ProfileConsumer>) {
        self.ledger.register(key, consumer);
    }

    /// Feeds a visibility observation for a key.
    ///
    /// Recomputes the key's priority; if the level changed, the scheduler
    /// relocates the key's work item (when still queued).
    pub fn update_visibility(&self, key: &str, is_visible: bool, intersection_ratio: f64) {
        if let Some(level) = self
            .controller
            .update_visibility(key, is_visible, intersection_ratio)
        {
            let _ = self.cmd_tx.send(SchedulerCommand::Reprioritize {
                key: key.to_string(),
                level,
            });
        }
    }

    /// Cached profile for a key, if present and fresh.
    pub fn peek(&self, key: &str) -> Option<Arc<DriverProfile>> {
        self.cache.get(key)
    }

    /// Drops a key from the cache; the next submit re-fetches it.
    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    /// Physically removes expired cache entries.
    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep(self.cache_ttl)
    }

    /// Operational stats for dashboards and tests.
    pub fn stats(&self) -> EngineStats {
        let snapshot = self.metrics.snapshot();
        EngineStats {
            queued: snapshot.queued,
            active: snapshot.active,
            cache_hit_rate: self.cache.stats().hit_rate(),
            under_pressure: self.pressure_flag.load(Ordering::Relaxed),
            registered_keys: self.ledger.registered_key_count(),
        }
    }

    /// Full metrics snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.metrics.snapshot()
    }

    /// Aborts all in-flight work and clears all engine state.
    ///
    /// Safe to call at any time, including during active dispatch, and
    /// idempotent. Consumers that have not received a terminal delivery
    /// receive nothing further; the engine accepts no new work afterwards.
    pub fn cleanup(&self) {
        info!("Engine cleanup requested");
        self.cancel.cancel();
        self.cache.clear();
    }
}

impl Drop for ProfileEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
