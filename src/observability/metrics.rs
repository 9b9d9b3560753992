//! Metrics registry for the lazy execution engine
//!
//! - Counters only, monotonic
//! - Reset only when the engine is constructed
//! - Thread-safe, lock-free (Relaxed atomics)

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one engine instance
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queries_deferred: AtomicU64,
    queries_completed: AtomicU64,
    queries_failed: AtomicU64,
    batches_formed: AtomicU64,
    batches_drained: AtomicU64,
    batches_rejected: AtomicU64,
    rounds_propagated: AtomicU64,
    rounds_aborted: AtomicU64,
    tasks_dispatched: AtomicU64,
    outcomes_evicted: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// A query was begun and deferred
    pub fn increment_queries_deferred(&self) {
        self.queries_deferred.fetch_add(1, Ordering::Relaxed);
    }

    /// An operation reached end-of-stream
    pub fn increment_queries_completed(&self) {
        self.queries_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// An operation finished with a failure
    pub fn increment_queries_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_formed(&self) {
        self.batches_formed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_drained(&self) {
        self.batches_drained.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Add completed advance rounds
    pub fn add_rounds_propagated(&self, rounds: u64) {
        self.rounds_propagated.fetch_add(rounds, Ordering::Relaxed);
    }

    pub fn increment_rounds_aborted(&self) {
        self.rounds_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// An advance task was handed to the worker pool
    pub fn increment_tasks_dispatched(&self) {
        self.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A stored outcome was dropped before anyone took it
    pub fn increment_outcomes_evicted(&self) {
        self.outcomes_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_deferred: self.queries_deferred.load(Ordering::Relaxed),
            queries_completed: self.queries_completed.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            batches_formed: self.batches_formed.load(Ordering::Relaxed),
            batches_drained: self.batches_drained.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            rounds_propagated: self.rounds_propagated.load(Ordering::Relaxed),
            rounds_aborted: self.rounds_aborted.load(Ordering::Relaxed),
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            outcomes_evicted: self.outcomes_evicted.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_deferred: u64,
    pub queries_completed: u64,
    pub queries_failed: u64,
    pub batches_formed: u64,
    pub batches_drained: u64,
    pub batches_rejected: u64,
    pub rounds_propagated: u64,
    pub rounds_aborted: u64,
    pub tasks_dispatched: u64,
    pub outcomes_evicted: u64,
}
