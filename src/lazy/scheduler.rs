//! Stride-fair advancement of registered batches
//!
//! # Fairness gate
//!
//! Batch `i` may advance only when the batch at `i - 1` is absent or has
//! completed at least `stride` more rounds than it. Older batches therefore
//! stay ahead of younger ones, and skew between neighbours is bounded by
//! the stride plus one advance in flight.
//!
//! # Strategies
//!
//! - Scan loop: long-lived workers repeatedly walk the registry from the
//!   oldest batch and advance the first eligible batch they can lock.
//! - Dispatch: a driver picks the first eligible batch nobody is advancing
//!   and submits one advance as a pool task (see the engine).
//!
//! # Retries
//!
//! A batch whose round was aborted by a transient error is not eligible
//! again until its retry time. The delay starts at the configured backoff
//! and doubles with every consecutive abort. An aborted advance is not
//! progress: scan-loop workers move on or back off instead of spinning on
//! the same batch.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::batch::Batch;
use super::errors::{panic_message, BatchError};
use super::operation::CompletionSink;
use super::registry::BatchRegistry;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::pipeline::ExecutorError;

/// Idle wait of scan-loop workers when the registry is empty
const IDLE_BACKOFF: Duration = Duration::from_micros(200);

/// Cap on how often the retry delay doubles
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Whether a batch with `count` rounds may advance behind a predecessor
/// with `predecessor_count` rounds.
pub fn stride_gate_open(predecessor_count: Option<u64>, count: u64, stride: u64) -> bool {
    match predecessor_count {
        None => true,
        Some(p) => p >= count.saturating_add(stride),
    }
}

/// Result of one advance call on one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceReport {
    pub index: u64,
    pub rounds: u64,
    pub completed_any: bool,
    pub drained: bool,
    /// The advance stopped on a transient error; the batch waits for a retry
    pub aborted: bool,
}

pub struct StrideScheduler<'a> {
    registry: &'a BatchRegistry,
    sink: &'a dyn CompletionSink,
    metrics: &'a MetricsRegistry,
    stride: u64,
    max_round_retries: u32,
    retry_backoff: Duration,
}

impl<'a> StrideScheduler<'a> {
    pub fn new(
        registry: &'a BatchRegistry,
        sink: &'a dyn CompletionSink,
        metrics: &'a MetricsRegistry,
        stride: u64,
        max_round_retries: u32,
    ) -> Self {
        Self {
            registry,
            sink,
            metrics,
            stride,
            max_round_retries,
            retry_backoff: Duration::ZERO,
        }
    }

    /// Delay before the first retry of an aborted round
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Delay after `aborted_rounds` consecutive aborts
    pub fn retry_delay(&self, aborted_rounds: u32) -> Duration {
        let doublings = aborted_rounds.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        self.retry_backoff.saturating_mul(1 << doublings)
    }

    fn predecessor_count(&self, index: u64) -> Option<u64> {
        if index <= self.registry.oldest() {
            return None;
        }
        self.registry
            .get(index - 1)
            .map(|predecessor| predecessor.propagate_count())
    }

    pub fn is_eligible(&self, index: u64, batch: &Batch) -> bool {
        stride_gate_open(
            self.predecessor_count(index),
            batch.propagate_count(),
            self.stride,
        )
    }

    /// Advance the first eligible batch that can be locked, oldest first
    pub fn advance_next(&self) -> Option<AdvanceReport> {
        let newest = self.registry.newest();
        (self.registry.oldest()..newest).find_map(|index| self.advance_index(index))
    }

    /// First eligible batch that no thread is currently advancing
    pub fn next_dispatchable(&self) -> Option<u64> {
        let newest = self.registry.newest();
        let now = Instant::now();
        (self.registry.oldest()..newest).find(|&index| {
            self.registry.get(index).map_or(false, |batch| {
                !batch.is_advancing() && batch.retry_due(now) && self.is_eligible(index, &batch)
            })
        })
    }

    /// Lock the batch at `index` and run one advance if the gate is open.
    ///
    /// Returns `None` when the batch is gone, locked elsewhere, gated, or
    /// waiting for a retry. A panic while advancing fails the batch.
    pub fn advance_index(&self, index: u64) -> Option<AdvanceReport> {
        let batch = self.registry.get(index)?;
        if !batch.retry_due(Instant::now()) {
            return None;
        }
        let mut guard = batch.try_lock()?;
        if !self.is_eligible(index, &batch) {
            return None;
        }

        let before = batch.propagate_count();
        let advanced = panic::catch_unwind(AssertUnwindSafe(|| {
            guard.advance(self.stride, self.max_round_retries, self.sink)
        }));
        let outcome = match advanced {
            Ok(outcome) => outcome,
            Err(payload) => {
                let reason = ExecutorError::execution_failed(format!(
                    "advance panicked: {}",
                    panic_message(payload.as_ref())
                ));
                Err(guard.abandon(&reason, self.sink))
            }
        };
        let aborted = matches!(outcome, Err(BatchError::RoundAborted { .. }));
        if aborted {
            guard.defer_retry(Instant::now() + self.retry_delay(guard.aborted_rounds()));
        }
        let drained = guard.is_empty();
        drop(guard);

        let rounds = batch.propagate_count() - before;
        self.metrics.add_rounds_propagated(rounds);
        let batch_id = batch.id().to_string();
        let index_str = index.to_string();

        let completed_any = match outcome {
            Ok(completed_any) => completed_any,
            Err(BatchError::RoundAborted { reason }) => {
                self.metrics.increment_rounds_aborted();
                log_event_with_fields(
                    Event::RoundAborted,
                    &[
                        ("batch", &batch_id),
                        ("index", &index_str),
                        ("code", reason.code().code()),
                        ("reason", reason.message()),
                    ],
                );
                false
            }
            Err(e) => {
                log_event_with_fields(
                    Event::BatchFailed,
                    &[
                        ("batch", &batch_id),
                        ("index", &index_str),
                        ("code", e.code()),
                        ("reason", &e.to_string()),
                    ],
                );
                true
            }
        };

        if drained && self.registry.remove(index).is_some() {
            self.metrics.increment_batches_drained();
            log_event_with_fields(
                Event::BatchDrained,
                &[
                    ("batch", &batch_id),
                    ("index", &index_str),
                    ("rounds", &batch.propagate_count().to_string()),
                ],
            );
        }

        Some(AdvanceReport {
            index,
            rounds,
            completed_any,
            drained,
            aborted,
        })
    }

    /// Scan-loop worker body: advance until `stop` is raised
    pub fn run_until(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            if self.advance_next().map_or(false, |report| !report.aborted) {
                continue;
            }
            if self.registry.is_empty() {
                thread::sleep(IDLE_BACKOFF);
            } else {
                thread::yield_now();
            }
        }
    }
}
