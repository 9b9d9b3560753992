//! Lazy execution engine
//!
//! Owns every piece of batching state for one instance: the pending queue,
//! the batch registry, the completion ledger, the worker pool, and the
//! propagation workers. Nothing is process-global; two engines never share
//! state.
//!
//! # Lifecycle of a query
//!
//! 1. [`LazyEngine::lazy_execute`] begins the query and defers it
//! 2. [`LazyEngine::form_batch`] groups pending operations behind one scan
//! 3. A driver advances batches: [`LazyEngine::advance_next`],
//!    [`LazyEngine::start_propagation`], or
//!    [`LazyEngine::propagate_batched_parallel`]
//! 4. At end-of-stream the outcome is stored and the ledger stamped;
//!    [`LazyEngine::take_outcome`] hands it to the caller
//!
//! Stored outcomes are capped at `outcome_capacity`; past it the lowest
//! sequence numbers are dropped. Operations still queued or batched when
//! the engine shuts down complete as failed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use uuid::Uuid;

use super::batch::{Batch, FormFailure};
use super::config::EngineConfig;
use super::errors::{BatchError, BatchResult, LedgerError};
use super::ledger::{Clock, CompletionLedger, SystemClock};
use super::operation::{CompletionSink, OutcomeStatus, PendingOperation, QueryEngine, QueryOutcome};
use super::pending::PendingQueue;
use super::pool::WorkerPool;
use super::registry::{BatchRegistry, Rejected};
use super::scheduler::{AdvanceReport, StrideScheduler};
use crate::observability::{
    log_event_with_fields, trace_event, Event, MetricsRegistry, MetricsSnapshot,
};
use crate::pipeline::{ExecutorError, Progress};

const ABANDON_REASON: &str = "engine shut down before the operation completed";

/// Shared state reachable from propagation threads and pool tasks
struct EngineCore {
    instance: Uuid,
    config: EngineConfig,
    queries: Arc<dyn QueryEngine>,
    pending: PendingQueue,
    registry: BatchRegistry,
    ledger: CompletionLedger,
    outcomes: Mutex<BTreeMap<u64, QueryOutcome>>,
    metrics: MetricsRegistry,
}

impl EngineCore {
    fn scheduler(&self) -> StrideScheduler<'_> {
        StrideScheduler::new(
            &self.registry,
            self,
            &self.metrics,
            self.config.stride,
            self.config.max_round_retries,
        )
        .with_retry_backoff(self.config.retry_backoff())
    }

    fn outcomes(&self) -> MutexGuard<'_, BTreeMap<u64, QueryOutcome>> {
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn form_batch(&self) -> BatchResult<Option<u64>> {
        let capacity = self.registry.capacity();
        if self.registry.is_full() {
            self.reject_batch(0, "registry full");
            return Err(BatchError::RegistryFull { capacity });
        }

        let operations = self.pending.drain_batch(self.config.batch_size);
        if operations.is_empty() {
            return Ok(None);
        }
        let size = operations.len();

        let batch = match Batch::form(operations) {
            Ok(batch) => batch,
            Err(FormFailure { error, operations }) => {
                self.reject_batch(size, error.message());
                for operation in operations {
                    self.complete(
                        operation,
                        OutcomeStatus::Failed {
                            reason: error.to_string(),
                        },
                    );
                }
                return Err(error.into());
            }
        };

        let batch_id = batch.id().to_string();
        let first_sequence = batch.first_sequence().to_string();
        match self.registry.insert(batch) {
            Ok(index) => {
                self.metrics.increment_batches_formed();
                log_event_with_fields(
                    Event::BatchFormed,
                    &[
                        ("batch", &batch_id),
                        ("index", &index.to_string()),
                        ("size", &size.to_string()),
                        ("first_sequence", &first_sequence),
                    ],
                );
                Ok(Some(index))
            }
            Err(Rejected { batch, capacity }) => {
                self.pending.restore_front(batch.into_operations());
                self.reject_batch(size, "registry full");
                Err(BatchError::RegistryFull { capacity })
            }
        }
    }

    fn reject_batch(&self, size: usize, reason: &str) {
        self.metrics.increment_batches_rejected();
        log_event_with_fields(
            Event::BatchRejected,
            &[("size", &size.to_string()), ("reason", reason)],
        );
    }

    /// Step one unbatched operation in fresh mode
    fn propagate_unbatched(&self, pick: impl FnOnce(usize) -> usize) -> BatchResult<bool> {
        let Some((index, mut operation)) = self.pending.take_at(pick) else {
            return Ok(false);
        };

        let pipeline = operation.pipeline_mut();
        pipeline.set_cache_mode(false);
        match pipeline.step() {
            Ok(Progress::Finished) => {
                self.complete(operation, OutcomeStatus::Completed);
                Ok(true)
            }
            Ok(_) => {
                self.pending.reinsert(index, operation);
                Ok(false)
            }
            Err(e) if e.is_transient() => {
                self.pending.reinsert(index, operation);
                Err(e.into())
            }
            Err(e) => {
                self.complete(
                    operation,
                    OutcomeStatus::Failed {
                        reason: e.to_string(),
                    },
                );
                Err(e.into())
            }
        }
    }

    fn operations_remaining(&self) -> usize {
        self.pending.len() + self.registry.live_operations()
    }
}

impl CompletionSink for EngineCore {
    fn complete(&self, operation: PendingOperation, status: OutcomeStatus) {
        let sequence = operation.sequence_number().to_string();
        match &status {
            OutcomeStatus::Completed => {
                self.ledger.record_completion(operation.sequence_number());
                self.metrics.increment_queries_completed();
                trace_event(
                    Event::OperationComplete,
                    &[
                        ("sequence", &sequence),
                        ("rows", &operation.pipeline().rows().len().to_string()),
                    ],
                );
            }
            OutcomeStatus::Failed { reason } => {
                self.ledger.record_failure(operation.sequence_number());
                self.metrics.increment_queries_failed();
                log_event_with_fields(
                    Event::OperationFailed,
                    &[("sequence", &sequence), ("reason", reason)],
                );
            }
        }
        let outcome = operation.into_outcome(status);
        let mut outcomes = self.outcomes();
        outcomes.insert(outcome.sequence_number, outcome);
        while outcomes.len() > self.config.outcome_capacity {
            if outcomes.pop_first().is_none() {
                break;
            }
            self.metrics.increment_outcomes_evicted();
        }
    }
}

/// Scan-loop workers started by [`LazyEngine::start_propagation`]
struct Propagation {
    stop: Arc<AtomicBool>,
    workers: WorkerPool,
}

impl Propagation {
    fn halt(mut self) {
        self.stop.store(true, Ordering::Release);
        self.workers.shutdown();
    }
}

/// Batched lazy query execution over a [`QueryEngine`]
pub struct LazyEngine {
    core: Arc<EngineCore>,
    pool: Mutex<Option<WorkerPool>>,
    propagation: Mutex<Option<Propagation>>,
    num_workers: AtomicUsize,
}

impl LazyEngine {
    pub fn new(config: EngineConfig, queries: Arc<dyn QueryEngine>) -> BatchResult<Self> {
        Self::with_clock(config, queries, Arc::new(SystemClock))
    }

    /// Build an engine whose ledger reads time from `clock`
    pub fn with_clock(
        config: EngineConfig,
        queries: Arc<dyn QueryEngine>,
        clock: Arc<dyn Clock>,
    ) -> BatchResult<Self> {
        config
            .validate()
            .map_err(|e| BatchError::InvalidConfig(e.to_string()))?;
        let pool = WorkerPool::new("worker", config.num_workers)?;

        let core = EngineCore {
            instance: Uuid::new_v4(),
            registry: BatchRegistry::new(config.registry_capacity),
            ledger: CompletionLedger::new(clock, config.ledger_retention()),
            pending: PendingQueue::new(),
            outcomes: Mutex::new(BTreeMap::new()),
            metrics: MetricsRegistry::new(),
            queries,
            config,
        };
        log_event_with_fields(
            Event::EngineStart,
            &[
                ("instance", &core.instance.to_string()),
                ("batch_size", &core.config.batch_size.to_string()),
                ("stride", &core.config.stride.to_string()),
                ("num_workers", &core.config.num_workers.to_string()),
            ],
        );

        Ok(Self {
            num_workers: AtomicUsize::new(core.config.num_workers),
            core: Arc::new(core),
            pool: Mutex::new(Some(pool)),
            propagation: Mutex::new(None),
        })
    }

    fn pool(&self) -> MutexGuard<'_, Option<WorkerPool>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn propagation(&self) -> MutexGuard<'_, Option<Propagation>> {
        self.propagation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn instance_id(&self) -> Uuid {
        self.core.instance
    }

    // ------------------------------------------------------------------
    // Deferral and batching
    // ------------------------------------------------------------------

    /// Begin a query and defer it. Returns its sequence number.
    ///
    /// No data is read; errors from beginning the query (parse errors,
    /// invalid limits) are returned and nothing is enqueued.
    pub fn lazy_execute(&self, query: &str) -> BatchResult<u64> {
        let pipeline = self.core.queries.begin(query)?;
        let core = &self.core;
        let sequence = core.pending.enqueue(query, pipeline, |sequence| {
            core.ledger.record_start(sequence);
        });
        core.metrics.increment_queries_deferred();
        trace_event(Event::QueryDeferred, &[("sequence", &sequence.to_string())]);
        Ok(sequence)
    }

    /// Group up to `batch_size` pending operations into a new batch.
    ///
    /// Returns the batch's registry index, or `None` when nothing is
    /// pending. When the scans cannot be shared every drained operation
    /// completes as failed and the error is returned. When the registry is
    /// full nothing is drained.
    pub fn form_batch(&self) -> BatchResult<Option<u64>> {
        self.core.form_batch()
    }

    /// Form batches until the queue is empty. Returns how many formed.
    pub fn form_all_batches(&self) -> BatchResult<usize> {
        let mut formed = 0;
        while self.core.form_batch()?.is_some() {
            formed += 1;
        }
        Ok(formed)
    }

    /// Step the oldest pending operation once, outside any batch.
    /// Returns whether it completed.
    pub fn propagate_first(&self) -> BatchResult<bool> {
        self.core.propagate_unbatched(|_| 0)
    }

    /// Step a uniformly chosen pending operation once, outside any batch.
    /// Returns whether it completed.
    pub fn propagate_random(&self) -> BatchResult<bool> {
        self.core
            .propagate_unbatched(|len| rand::thread_rng().gen_range(0..len))
    }

    // ------------------------------------------------------------------
    // Counts and results
    // ------------------------------------------------------------------

    /// Operations accepted but not yet complete
    pub fn operations_remaining(&self) -> usize {
        self.core.operations_remaining()
    }

    pub fn pending_count(&self) -> usize {
        self.core.pending.len()
    }

    /// Operations inside live batches
    pub fn batched_count(&self) -> usize {
        self.core.registry.live_operations()
    }

    /// Live batches
    pub fn batch_count(&self) -> usize {
        self.core.registry.len()
    }

    pub fn operation_time(&self, sequence_number: u64) -> Result<Duration, LedgerError> {
        self.core.ledger.operation_time(sequence_number)
    }

    /// Completions in the trailing `window` ending at `now`
    pub fn completed_within(&self, window: Duration, now: DateTime<Utc>) -> usize {
        self.core.ledger.completed_within(window, now)
    }

    /// Completions in the last `seconds` seconds by the engine's clock
    pub fn completed_in_last(&self, seconds: i64) -> usize {
        let now = self.core.ledger.now();
        self.core
            .ledger
            .completed_within(Duration::seconds(seconds), now)
    }

    /// Remove and return the outcome of a finished operation
    pub fn take_outcome(&self, sequence_number: u64) -> Option<QueryOutcome> {
        self.core.outcomes().remove(&sequence_number)
    }

    /// Remove and return every stored outcome, ordered by sequence number
    pub fn take_outcomes(&self) -> Vec<QueryOutcome> {
        std::mem::take(&mut *self.core.outcomes())
            .into_values()
            .collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    // ------------------------------------------------------------------
    // Driving batches
    // ------------------------------------------------------------------

    /// Advance the first eligible batch once, on the calling thread
    pub fn advance_next(&self) -> Option<AdvanceReport> {
        self.core.scheduler().advance_next()
    }

    /// Form and advance batches on the calling thread until every accepted
    /// operation has completed.
    pub fn run_until_drained(&self) -> BatchResult<()> {
        if self.is_propagating() {
            return Err(BatchError::PropagationRunning);
        }
        let scheduler = self.core.scheduler();
        while self.operations_remaining() > 0 {
            match self.core.form_batch() {
                // Members of a rejected batch already completed as failed
                Ok(_) | Err(BatchError::RegistryFull { .. }) | Err(BatchError::Executor(_)) => {}
                Err(e) => return Err(e),
            }
            if scheduler.advance_next().map_or(true, |report| report.aborted) {
                thread::yield_now();
            }
        }
        Ok(())
    }

    pub fn is_propagating(&self) -> bool {
        self.propagation().is_some()
    }

    /// Start `num_workers` scan-loop threads advancing registered batches
    pub fn start_propagation(&self) -> BatchResult<()> {
        let mut propagation = self.propagation();
        if propagation.is_some() {
            return Err(BatchError::PropagationRunning);
        }

        let workers = self.num_workers();
        let started = Propagation {
            stop: Arc::new(AtomicBool::new(false)),
            workers: WorkerPool::new("propagate", workers)?,
        };
        for _ in 0..workers {
            let core = Arc::clone(&self.core);
            let stop = Arc::clone(&started.stop);
            let submitted = started
                .workers
                .execute(move || core.scheduler().run_until(&stop));
            if let Err(e) = submitted {
                started.halt();
                return Err(e);
            }
        }

        log_event_with_fields(Event::PropagationStart, &[("workers", &workers.to_string())]);
        *propagation = Some(started);
        Ok(())
    }

    /// Stop scan-loop threads and wait for them. Returns whether any ran.
    pub fn stop_propagation(&self) -> bool {
        let Some(running) = self.propagation().take() else {
            return false;
        };
        running.halt();
        log_event_with_fields(
            Event::PropagationStop,
            &[("remaining", &self.operations_remaining().to_string())],
        );
        true
    }

    /// Submit one advance of the first eligible, idle batch to the pool.
    ///
    /// Holds back while `num_workers * queue_tolerance` tasks are already
    /// queued. Returns whether a task was submitted.
    pub fn propagate_batched_parallel(&self) -> BatchResult<bool> {
        let pool = self.pool();
        let pool = pool
            .as_ref()
            .ok_or_else(|| BatchError::PoolUnavailable("engine is shut down".into()))?;

        let limit = pool
            .num_workers()
            .saturating_mul(self.core.config.queue_tolerance);
        if pool.queued() >= limit {
            return Ok(false);
        }
        let Some(index) = self.core.scheduler().next_dispatchable() else {
            return Ok(false);
        };

        let core = Arc::clone(&self.core);
        pool.execute(move || {
            core.scheduler().advance_index(index);
        })?;
        self.core.metrics.increment_tasks_dispatched();
        Ok(true)
    }

    /// Form batches and dispatch advance tasks until every accepted
    /// operation has completed and the pool is idle.
    pub fn dispatch_until_drained(&self) -> BatchResult<()> {
        if self.is_propagating() {
            return Err(BatchError::PropagationRunning);
        }
        while self.operations_remaining() > 0 || self.in_flight_tasks() > 0 {
            match self.core.form_batch() {
                Ok(_) | Err(BatchError::RegistryFull { .. }) | Err(BatchError::Executor(_)) => {}
                Err(e) => return Err(e),
            }
            if !self.propagate_batched_parallel()? {
                thread::yield_now();
            }
        }
        Ok(())
    }

    /// Pool tasks queued or running
    pub fn in_flight_tasks(&self) -> usize {
        self.pool().as_ref().map_or(0, |pool| pool.in_flight())
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers.load(Ordering::Acquire)
    }

    /// Replace the worker pool with one of `num_workers` threads.
    ///
    /// Refused while propagation runs or pool tasks are in flight.
    pub fn set_num_workers(&self, num_workers: usize) -> BatchResult<()> {
        if num_workers == 0 {
            return Err(BatchError::InvalidConfig("num_workers must be >= 1".into()));
        }
        if self.is_propagating() {
            return Err(BatchError::PropagationRunning);
        }

        let mut pool = self.pool();
        match pool.as_ref() {
            None => return Err(BatchError::PoolUnavailable("engine is shut down".into())),
            Some(current) if current.in_flight() > 0 => {
                return Err(BatchError::PoolUnavailable(format!(
                    "{} tasks in flight",
                    current.in_flight()
                )))
            }
            Some(_) => {}
        }

        let replacement = WorkerPool::new("worker", num_workers)?;
        if let Some(mut previous) = pool.replace(replacement) {
            previous.shutdown();
        }
        self.num_workers.store(num_workers, Ordering::Release);
        log_event_with_fields(
            Event::PoolRecreated,
            &[("workers", &num_workers.to_string())],
        );
        Ok(())
    }

    /// Stop propagation, let queued pool tasks finish, and release the
    /// pool. Operations still pending or batched complete as failed.
    pub fn shutdown(&self) {
        self.stop_propagation();
        let Some(mut pool) = self.pool().take() else {
            return;
        };
        pool.shutdown();
        let abandoned = self.abandon_remaining();
        log_event_with_fields(
            Event::EngineShutdown,
            &[
                ("instance", &self.core.instance.to_string()),
                ("abandoned", &abandoned.to_string()),
            ],
        );
    }

    /// Fail every operation still queued or batched. Returns how many.
    fn abandon_remaining(&self) -> usize {
        let core = &self.core;
        let reason = ExecutorError::execution_failed(ABANDON_REASON);
        let mut abandoned = 0;

        for operation in core.pending.drain_all() {
            core.complete(
                operation,
                OutcomeStatus::Failed {
                    reason: reason.to_string(),
                },
            );
            abandoned += 1;
        }
        for batch in core.registry.drain() {
            // Pools are idle, so nothing else holds a batch lock
            if let Some(mut guard) = batch.try_lock() {
                if let BatchError::BatchFailed { members, .. } = guard.abandon(&reason, &**core) {
                    abandoned += members;
                }
            }
        }

        if abandoned > 0 {
            log_event_with_fields(
                Event::OperationsAbandoned,
                &[("count", &abandoned.to_string())],
            );
        }
        abandoned
    }
}

impl Drop for LazyEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LazyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyEngine")
            .field("instance", &self.core.instance)
            .field("pending", &self.pending_count())
            .field("batches", &self.batch_count())
            .finish()
    }
}
