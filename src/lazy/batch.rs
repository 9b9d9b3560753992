//! Batches: operations advanced in lockstep over one shared scan
//!
//! At formation the first operation becomes the leader and pulls the scan
//! in fresh mode. Every other operation is rewired onto the leader's cursor
//! and reads the cached value in cached mode.
//!
//! # Rounds
//!
//! One round moves the shared scan by at most one value:
//!
//! 1. Operations are stepped fresh, in order, until one of them moves the
//!    scan or every operation has finished. An operation that ends without
//!    moving the scan (a reached LIMIT, an exhausted cursor) hands the fresh
//!    role to the next one in the same round.
//! 2. The remaining operations step in cached mode and see the value the
//!    fresh step produced.
//! 3. Operations that reached end-of-stream leave the batch and are handed
//!    to the [`CompletionSink`] in FIFO order.
//!
//! # Failures
//!
//! A transient error raised before the scan moved aborts the round with no
//! state change; the round is retried on a later advance, up to the retry
//! limit. The scheduler holds an aborted batch back until its retry time
//! (see [`Batch::retry_due`]). Any other error, or any error after the scan
//! moved, fails every remaining member.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Instant;

use uuid::Uuid;

use super::errors::{BatchError, BatchResult};
use super::operation::{CompletionSink, OutcomeStatus, PendingOperation};
use crate::pipeline::{ExecutorError, ExecutorResult, Progress, SharedCursor};

/// Operations handed back when a batch could not be formed
#[derive(Debug)]
pub struct FormFailure {
    pub error: ExecutorError,
    pub operations: Vec<PendingOperation>,
}

#[derive(Debug, Default)]
struct BatchState {
    /// FIFO by sequence number; index 0 drives the scan
    operations: Vec<PendingOperation>,
    /// Consecutive rounds aborted by transient errors
    aborted_rounds: u32,
}

pub struct Batch {
    id: Uuid,
    first_sequence: u64,
    state: Mutex<BatchState>,
    propagate_count: AtomicU64,
    live: AtomicUsize,
    advancing: AtomicBool,
    /// Earliest time an aborted round may be retried
    retry_at: Mutex<Option<Instant>>,
}

enum RoundError {
    /// Nothing moved; safe to retry
    Aborted(ExecutorError),
    /// The batch cannot continue
    Broken(ExecutorError),
}

impl Batch {
    /// Group operations behind the first one's scan
    pub fn form(mut operations: Vec<PendingOperation>) -> Result<Batch, FormFailure> {
        if let Err(error) = Self::wire(&mut operations) {
            return Err(FormFailure { error, operations });
        }
        debug_assert!(operations
            .windows(2)
            .all(|w| w[0].sequence_number() < w[1].sequence_number()));

        Ok(Batch {
            id: Uuid::new_v4(),
            first_sequence: operations[0].sequence_number(),
            live: AtomicUsize::new(operations.len()),
            state: Mutex::new(BatchState {
                operations,
                aborted_rounds: 0,
            }),
            propagate_count: AtomicU64::new(0),
            advancing: AtomicBool::new(false),
            retry_at: Mutex::new(None),
        })
    }

    fn wire(operations: &mut [PendingOperation]) -> ExecutorResult<()> {
        let (leader, followers) = operations
            .split_first_mut()
            .ok_or_else(|| ExecutorError::execution_failed("cannot form an empty batch"))?;

        leader.pipeline_mut().set_cache_mode(false);
        for follower in followers {
            follower.pipeline_mut().share_scan_with(leader.pipeline())?;
            follower.pipeline_mut().set_cache_mode(true);
        }
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Sequence number of the operation that led the batch at formation
    pub fn first_sequence(&self) -> u64 {
        self.first_sequence
    }

    /// Rounds completed since formation
    pub fn propagate_count(&self) -> u64 {
        self.propagate_count.load(Ordering::Acquire)
    }

    /// Operations still in the batch
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether some thread currently holds the batch lock
    pub fn is_advancing(&self) -> bool {
        self.advancing.load(Ordering::Acquire)
    }

    /// Whether an aborted round may be retried at `now`
    pub fn retry_due(&self, now: Instant) -> bool {
        self.retry_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map_or(true, |at| at <= now)
    }

    /// Take the batch lock without blocking
    pub fn try_lock(&self) -> Option<BatchGuard<'_>> {
        let state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        self.advancing.store(true, Ordering::Release);
        Some(BatchGuard { batch: self, state })
    }

    /// Dissolve the batch, returning the operations still in it
    pub fn into_operations(self) -> Vec<PendingOperation> {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .operations
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("first_sequence", &self.first_sequence)
            .field("live", &self.len())
            .field("propagate_count", &self.propagate_count())
            .finish()
    }
}

/// Exclusive access to a batch for advancing it
pub struct BatchGuard<'a> {
    batch: &'a Batch,
    state: MutexGuard<'a, BatchState>,
}

impl<'a> BatchGuard<'a> {
    pub fn batch(&self) -> &Batch {
        self.batch
    }

    pub fn is_empty(&self) -> bool {
        self.state.operations.is_empty()
    }

    /// Consecutive rounds aborted by transient errors
    pub fn aborted_rounds(&self) -> u32 {
        self.state.aborted_rounds
    }

    /// Hold the batch back from advancing until `until`
    pub fn defer_retry(&self, until: Instant) {
        *self
            .batch
            .retry_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(until);
    }

    /// Fail every remaining member with `reason` and empty the batch
    pub fn abandon(&mut self, reason: &ExecutorError, sink: &dyn CompletionSink) -> BatchError {
        self.fail_all(reason, sink)
    }

    /// Run up to `stride` rounds.
    ///
    /// Returns whether any operation completed. Stops early once the batch
    /// is empty.
    pub fn advance(
        &mut self,
        stride: u64,
        max_round_retries: u32,
        sink: &dyn CompletionSink,
    ) -> BatchResult<bool> {
        let mut completed_any = false;
        for _ in 0..stride {
            if self.state.operations.is_empty() {
                break;
            }
            match self.round(sink) {
                Ok(completed) => {
                    completed_any |= completed > 0;
                    self.state.aborted_rounds = 0;
                    self.batch.propagate_count.fetch_add(1, Ordering::AcqRel);
                }
                Err(RoundError::Aborted(reason)) => {
                    self.state.aborted_rounds += 1;
                    if self.state.aborted_rounds > max_round_retries {
                        return Err(self.fail_all(&reason, sink));
                    }
                    return Err(BatchError::RoundAborted { reason });
                }
                Err(RoundError::Broken(reason)) => {
                    return Err(self.fail_all(&reason, sink));
                }
            }
        }
        Ok(completed_any)
    }

    fn round(&mut self, sink: &dyn CompletionSink) -> Result<usize, RoundError> {
        let operations = &mut self.state.operations;
        let cursor: SharedCursor = operations[0].pipeline().cursor().clone();
        let pulls_before = cursor.pulls();
        let scan_moved = || cursor.pulls() != pulls_before || cursor.is_exhausted();

        let mut finished = Vec::new();
        let mut next = 0;

        // Fresh phase
        while next < operations.len() {
            let pipeline = operations[next].pipeline_mut();
            pipeline.set_cache_mode(false);
            let progress = match pipeline.step() {
                Ok(progress) => progress,
                Err(e) if e.is_transient() && !scan_moved() => {
                    return Err(RoundError::Aborted(e))
                }
                Err(e) => return Err(RoundError::Broken(e)),
            };
            next += 1;
            if progress == Progress::Finished {
                finished.push(next - 1);
                if !scan_moved() {
                    continue;
                }
            }
            break;
        }

        // Cached phase
        for (index, operation) in operations.iter_mut().enumerate().skip(next) {
            let pipeline = operation.pipeline_mut();
            pipeline.set_cache_mode(true);
            match pipeline.step() {
                Ok(Progress::Finished) => finished.push(index),
                Ok(_) => {}
                Err(e) => return Err(RoundError::Broken(e)),
            }
        }

        let mut done: Vec<PendingOperation> = finished
            .iter()
            .rev()
            .map(|&index| operations.remove(index))
            .collect();
        done.reverse();
        let completed = done.len();
        self.batch.live.store(operations.len(), Ordering::Release);

        for operation in done {
            sink.complete(operation, OutcomeStatus::Completed);
        }
        Ok(completed)
    }

    /// Hand every member to the sink. Members already at end-of-stream
    /// complete normally; the rest fail with `reason`.
    fn fail_all(&mut self, reason: &ExecutorError, sink: &dyn CompletionSink) -> BatchError {
        let operations = std::mem::take(&mut self.state.operations);
        self.batch.live.store(0, Ordering::Release);

        let members = operations.len();
        for operation in operations {
            let status = if operation.pipeline().is_finished() {
                OutcomeStatus::Completed
            } else {
                OutcomeStatus::Failed {
                    reason: reason.to_string(),
                }
            };
            sink.complete(operation, status);
        }
        BatchError::BatchFailed {
            members,
            reason: reason.to_string(),
        }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.batch.advancing.store(false, Ordering::Release);
    }
}
