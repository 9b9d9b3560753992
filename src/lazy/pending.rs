//! FIFO of deferred operations not yet grouped into a batch
//!
//! Sequence numbers are assigned under the queue lock, so queue order and
//! sequence order always agree.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::operation::PendingOperation;
use crate::pipeline::QueryPipeline;

#[derive(Debug, Default)]
struct QueueState {
    operations: VecDeque<PendingOperation>,
    next_sequence: u64,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    state: Mutex<QueueState>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a new operation and return its sequence number.
    ///
    /// `on_assigned` runs under the queue lock before the operation becomes
    /// visible to batch formation.
    pub fn enqueue(
        &self,
        query: &str,
        pipeline: QueryPipeline,
        on_assigned: impl FnOnce(u64),
    ) -> u64 {
        let mut state = self.lock();
        let sequence_number = state.next_sequence;
        state.next_sequence += 1;
        on_assigned(sequence_number);
        state
            .operations
            .push_back(PendingOperation::new(sequence_number, query, pipeline));
        sequence_number
    }

    /// Remove the operations for the next batch, in FIFO order.
    ///
    /// Takes up to `max` operations from the front. An operation that was
    /// already stepped on its own cannot follow another scan, so a started
    /// front operation is taken alone and a started operation further back
    /// ends the run.
    pub fn drain_batch(&self, max: usize) -> Vec<PendingOperation> {
        let mut state = self.lock();
        let take = match state.operations.front() {
            None => 0,
            Some(front) if front.is_started() => 1,
            Some(_) => state
                .operations
                .iter()
                .take(max)
                .take_while(|op| !op.is_started())
                .count(),
        };
        state.operations.drain(..take).collect()
    }

    /// Put operations back at the front, keeping their relative order
    pub fn restore_front(&self, operations: Vec<PendingOperation>) {
        let mut state = self.lock();
        for op in operations.into_iter().rev() {
            state.operations.push_front(op);
        }
    }

    /// Remove the operation at the index chosen by `pick` from the queue
    /// length. Returns the index it was taken from.
    pub fn take_at(
        &self,
        pick: impl FnOnce(usize) -> usize,
    ) -> Option<(usize, PendingOperation)> {
        let mut state = self.lock();
        if state.operations.is_empty() {
            return None;
        }
        let index = pick(state.operations.len());
        state.operations.remove(index).map(|op| (index, op))
    }

    /// Reinsert an operation taken with [`take_at`](Self::take_at). The
    /// index is clamped to the current length.
    pub fn reinsert(&self, index: usize, operation: PendingOperation) {
        let mut state = self.lock();
        let index = index.min(state.operations.len());
        state.operations.insert(index, operation);
    }

    pub fn len(&self) -> usize {
        self.lock().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every queued operation
    pub fn drain_all(&self) -> Vec<PendingOperation> {
        self.lock().operations.drain(..).collect()
    }
}
