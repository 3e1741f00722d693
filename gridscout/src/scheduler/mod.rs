//! Admission and dispatch.
//!
//! A single actor task owns every queue and active set: commands arrive on
//! an mpsc channel, resolutions report back on a completion channel, and
//! timers drive pressure sampling and deferred resumption. Nothing else
//! ever mutates scheduling state, so the queue/active-set transitions are
//! serialized by construction.
//!
//! ```text
//!           submit / reprioritize
//! Engine ────────────────────────► DispatchScheduler ──► spawn resolution
//!                                    ▲   │    ▲                 │
//!                 pressure/resume ───┘   │    └── completions ──┘
//!                 timers                 ▼
//!                                  queues / active sets / deferred
//! ```
//!
//! Per work item the state machine is `Queued(p) → Active(p) →
//! {Succeeded | Failed}`, with `Deferred` reachable from the queued state
//! of a deferrable level while memory pressure holds.

pub mod adaptive;
pub mod pressure;
pub mod queues;

pub use pressure::MemoryProbe;
pub use queues::WorkItem;

use crate::cache::ProfileCache;
use crate::config::{ConcurrencyCaps, EngineConfig, RetryConfig};
use crate::delivery::DeliveryLedger;
use crate::error::FetchError;
use crate::fetch::{FetchFailure, RequestExecutor};
use crate::metrics::EngineMetrics;
use crate::priority::{Priority, PriorityController};
use crate::profile::DriverProfile;
use crate::provider::ProfileProvider;
use crate::singleflight::{ResolveError, SingleFlight};
use adaptive::AdaptiveCapController;
use pressure::PressureMonitor;
use queues::PriorityQueues;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Commands accepted by the scheduler actor.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Admit a batch of keys (cache-first, deduplicated).
    Submit { keys: Vec<String> },
    /// A key's computed priority changed; relocate it if still queued.
    Reprioritize { key: String, level: Priority },
}

/// How one resolution ended.
enum CompletionOutcome {
    Success { profile: Arc<DriverProfile> },
    Failure { error: FetchError },
    Aborted,
}

/// Report sent back by a finished resolution task.
struct Completion {
    key: String,
    /// Level the item was dispatched at (its active-set slot).
    level: Priority,
    outcome: CompletionOutcome,
    /// Attempts the fetch spent; 0 when this task joined an existing
    /// flight and no fetch of its own ran.
    attempts: u32,
    latency: Duration,
}

/// The admission and dispatch actor.
///
/// Constructed with [`DispatchScheduler::new`], driven by
/// [`DispatchScheduler::run`] on its own task.
pub struct DispatchScheduler<P> {
    config: EngineConfig,
    /// Live caps; the adaptive controller may adjust CRITICAL/HIGH.
    caps: ConcurrencyCaps,
    queues: PriorityQueues,
    /// Keys currently executing, per dispatch level.
    active: [HashSet<String>; 5],
    deferred: VecDeque<WorkItem>,
    next_id: u64,

    cmd_rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,

    cache: Arc<ProfileCache>,
    singleflight: Arc<SingleFlight>,
    executor: Arc<RequestExecutor<P>>,
    controller: Arc<PriorityController>,
    ledger: Arc<DeliveryLedger>,
    metrics: Arc<EngineMetrics>,

    pressure: PressureMonitor,
    /// Mirror of the pressure state for lock-free reads from the facade.
    pressure_flag: Arc<AtomicBool>,
    adaptive: AdaptiveCapController,
    cancel: CancellationToken,
}

impl<P> DispatchScheduler<P>
where
    P: ProfileProvider + 'static,
{
    /// Builds the scheduler and returns its command sender.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        cache: Arc<ProfileCache>,
        singleflight: Arc<SingleFlight>,
        executor: Arc<RequestExecutor<P>>,
        controller: Arc<PriorityController>,
        ledger: Arc<DeliveryLedger>,
        metrics: Arc<EngineMetrics>,
        probe: Option<Arc<dyn MemoryProbe>>,
        pressure_flag: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedSender<SchedulerCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            caps: config.caps,
            pressure: PressureMonitor::new(probe, config.pressure),
            adaptive: AdaptiveCapController::new(config.adaptive),
            config,
            queues: PriorityQueues::new(),
            active: Default::default(),
            deferred: VecDeque::new(),
            next_id: 0,
            cmd_rx,
            completion_tx,
            completion_rx,
            cache,
            singleflight,
            executor,
            controller,
            ledger,
            metrics,
            pressure_flag,
            cancel,
        };
        (scheduler, cmd_tx)
    }

    /// Runs the actor until the cancellation token fires.
    pub async fn run(mut self) {
        let mut pressure_tick = tokio::time::interval(self.config.pressure.sample_interval);
        pressure_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut resume_tick = tokio::time::interval(self.config.resume.interval);
        resume_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.shutdown();
                    return;
                }
                Some(cmd) = self.cmd_rx.recv() => self.handle_command(cmd),
                Some(done) = self.completion_rx.recv() => self.handle_completion(done),
                _ = pressure_tick.tick() => self.sample_pressure(),
                _ = resume_tick.tick() => self.resume_deferred(),
            }
            self.dispatch();
        }
    }

    fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Submit { keys } => self.handle_submit(keys),
            SchedulerCommand::Reprioritize { key, level } => self.handle_reprioritize(&key, level),
        }
    }

    /// Cache-first admission of a key batch.
    fn handle_submit(&mut self, keys: Vec<String>) {
        self.metrics.keys_submitted(keys.len());

        for key in keys {
            if let Some(profile) = self.cache.get(&key) {
                self.metrics.cache_hit();
                // Progressive delivery straight from cache.
                self.ledger.begin(&key);
                self.ledger.deliver_success(&key, &profile);
                continue;
            }
            self.metrics.cache_miss();

            if self.is_pending(&key) {
                debug!(key, "Key already pending, submit deduplicated");
                continue;
            }

            let level = self.admission_level(&key);
            self.next_id += 1;
            let item = WorkItem {
                id: self.next_id,
                key: key.clone(),
                priority: level,
                attempt: 0,
                created_at: Instant::now(),
                can_defer: !matches!(level, Priority::Critical | Priority::High),
                max_retries: self.config.retry.max_retries,
                timeout: self.config.retry.request_timeout,
            };

            self.ledger.begin(&key);
            if self.queues.push(item) {
                self.metrics.queued_inc(level);
                debug!(key, level = %level, "Work item queued");
            }
        }
    }

    /// Level for a key being admitted: recorded visibility wins; keys the
    /// visibility source never reported are on-page work if someone
    /// registered for them, background prefetch otherwise.
    fn admission_level(&self, key: &str) -> Priority {
        self.controller.signal_level(key).unwrap_or_else(|| {
            if self.ledger.has_consumers(key) {
                Priority::Medium
            } else {
                Priority::Low
            }
        })
    }

    /// Whether the key already has a work item somewhere (queued, deferred
    /// or active).
    fn is_pending(&self, key: &str) -> bool {
        self.queues.contains(key)
            || self.active.iter().any(|set| set.contains(key))
            || self.deferred.iter().any(|item| item.key == key)
    }

    /// Relocates a queued item after a priority change.
    ///
    /// Items already dispatched are never preempted; a completion at the
    /// old level simply frees that level's slot.
    fn handle_reprioritize(&mut self, key: &str, level: Priority) {
        if let Some((old, new)) = self.queues.relocate(key, level) {
            self.metrics.queued_dec(old);
            self.metrics.queued_inc(new);
            self.metrics.rebalanced();
            debug!(key, from = %old, to = %new, "Queued item relocated");
        }
    }

    /// Scans levels from highest to lowest, admitting queue heads while
    /// cap headroom exists. Under pressure, deferrable items are routed to
    /// the deferred set instead of an active slot.
    fn dispatch(&mut self) {
        for level in Priority::ALL {
            loop {
                if self.active[level.index()].len() >= self.effective_cap(level) {
                    break;
                }
                let Some(item) = self.queues.pop(level) else {
                    break;
                };
                self.metrics.queued_dec(level);

                if self.pressure.under_pressure()
                    && item.can_defer
                    && matches!(
                        item.priority,
                        Priority::Medium | Priority::Low | Priority::Deferred
                    )
                {
                    debug!(key = %item.key, level = %level, "Deferring under memory pressure");
                    self.metrics.deferred();
                    self.deferred.push_back(item);
                    continue;
                }

                self.spawn_resolution(item);
            }
        }
    }

    /// Cap for one level, honoring the pressure gate on DEFERRED.
    fn effective_cap(&self, level: Priority) -> usize {
        match level {
            Priority::Deferred if self.pressure.under_pressure() => 0,
            _ => self.caps.cap(level),
        }
    }

    /// Transitions an item to Active and spawns its resolution task.
    fn spawn_resolution(&mut self, item: WorkItem) {
        let level = item.priority;
        self.active[level.index()].insert(item.key.clone());
        self.metrics.active_inc(level);
        debug!(key = %item.key, level = %level, id = item.id, "Work item dispatched");

        let key = item.key;
        let retry = RetryConfig {
            max_retries: item.max_retries,
            backoff_base: self.config.retry.backoff_base,
            request_timeout: item.timeout,
        };
        let singleflight = Arc::clone(&self.singleflight);
        let executor = Arc::clone(&self.executor);
        let completion_tx = self.completion_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            // Filled by the factory; stays 0 when this task joins an
            // existing flight instead of fetching itself.
            let attempts = Arc::new(AtomicU32::new(0));

            let factory_key = key.clone();
            let factory_attempts = Arc::clone(&attempts);
            let factory_cancel = cancel.clone();
            let result = singleflight
                .resolve(&key, move || async move {
                    let result = executor
                        .execute_with(&factory_key, &factory_cancel, retry)
                        .await;
                    match &result {
                        Ok(success) => {
                            factory_attempts.store(success.attempts, Ordering::SeqCst)
                        }
                        Err(FetchFailure::Terminal { attempts, .. }) => {
                            factory_attempts.store(*attempts, Ordering::SeqCst)
                        }
                        Err(FetchFailure::Aborted) => {}
                    }
                    result
                })
                .await;

            let outcome = match result {
                Ok(profile) => CompletionOutcome::Success { profile },
                Err(ResolveError::Failed(error)) => CompletionOutcome::Failure { error },
                Err(ResolveError::Aborted) => CompletionOutcome::Aborted,
            };

            // The scheduler may already be gone during shutdown.
            let _ = completion_tx.send(Completion {
                key,
                level,
                outcome,
                attempts: attempts.load(Ordering::SeqCst),
                latency: started.elapsed(),
            });
        });
    }

    /// Retires an active item and delivers its outcome.
    fn handle_completion(&mut self, done: Completion) {
        if self.active[done.level.index()].remove(&done.key) {
            self.metrics.active_dec(done.level);
        }

        match done.outcome {
            CompletionOutcome::Success { profile } => {
                self.metrics
                    .resolution_succeeded(done.attempts.max(1), done.latency);
                self.adaptive.record(done.latency);
                self.ledger.deliver_success(&done.key, &profile);
            }
            CompletionOutcome::Failure { error } => {
                self.metrics
                    .resolution_failed(error.kind, done.attempts.max(1), done.latency);
                self.adaptive.record(done.latency);
                self.ledger.deliver_failure(&done.key, &error);
            }
            CompletionOutcome::Aborted => {
                self.metrics.resolution_aborted();
            }
        }

        let (active_critical, active_high) = (
            self.active[Priority::Critical.index()].len(),
            self.active[Priority::High.index()].len(),
        );
        self.adaptive
            .adjust(&mut self.caps, active_critical, active_high);
    }

    /// Takes one probe sample and mirrors the state for the facade.
    fn sample_pressure(&mut self) {
        let under = self.pressure.sample();
        self.pressure_flag.store(under, Ordering::Relaxed);
    }

    /// Re-queues a batch of deferred items once pressure has cleared.
    fn resume_deferred(&mut self) {
        if self.pressure.under_pressure() || self.deferred.is_empty() {
            return;
        }

        for _ in 0..self.config.resume.batch.max(1) {
            let Some(item) = self.deferred.pop_front() else {
                break;
            };
            let level = item.priority;
            debug!(key = %item.key, level = %level, "Resuming deferred item");
            self.metrics.resumed();
            if self.queues.push(item) {
                self.metrics.queued_inc(level);
            }
        }
    }

    /// Abandons all pending and in-flight work.
    fn shutdown(&mut self) {
        let dropped =
            self.queues.drain().len() + self.deferred.len() + self.active_total();
        self.deferred.clear();
        for set in &mut self.active {
            set.clear();
        }
        self.metrics.reset_gauges();
        self.singleflight.abort_all();
        self.ledger.clear();
        self.controller.clear();
        info!(dropped, "Scheduler stopped, pending work abandoned");
    }

    fn active_total(&self) -> usize {
        self.active.iter().map(HashSet::len).sum()
    }
}
