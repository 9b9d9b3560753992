//! Bounded registry of live batches
//!
//! A ring of `capacity` slots addressed by a logical index that only ever
//! grows. Batch `i` lives in slot `i % capacity`.
//!
//! # Invariants
//!
//! - `oldest <= newest` and `newest - oldest <= capacity`
//! - Every occupied slot has its logical index in `[oldest, newest)`
//! - `oldest` is either `newest` or the index of an occupied slot: removal
//!   compacts `oldest` past every empty slot
//!
//! Insertion and removal take the write lock; lookups take the read lock.
//! The `oldest`/`newest` cursors are also published as atomics for cheap
//! unlocked reads by scheduler scans.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::batch::Batch;

/// A batch the registry had no room for
#[derive(Debug)]
pub struct Rejected {
    pub batch: Batch,
    pub capacity: usize,
}

pub struct BatchRegistry {
    capacity: usize,
    slots: RwLock<Vec<Option<Arc<Batch>>>>,
    oldest: AtomicU64,
    newest: AtomicU64,
    live: AtomicUsize,
}

impl BatchRegistry {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: RwLock::new(vec![None; capacity]),
            oldest: AtomicU64::new(0),
            newest: AtomicU64::new(0),
            live: AtomicUsize::new(0),
        }
    }

    fn slot(&self, index: u64) -> usize {
        (index % self.capacity as u64) as usize
    }

    /// Register a batch under the next logical index
    pub fn insert(&self, batch: Batch) -> Result<u64, Rejected> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let oldest = self.oldest.load(Ordering::Acquire);
        let newest = self.newest.load(Ordering::Acquire);
        if newest - oldest >= self.capacity as u64 {
            return Err(Rejected {
                batch,
                capacity: self.capacity,
            });
        }

        slots[self.slot(newest)] = Some(Arc::new(batch));
        self.newest.store(newest + 1, Ordering::Release);
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(newest)
    }

    /// Remove the batch at `index`, then move `oldest` past empty slots
    pub fn remove(&self, index: u64) -> Option<Arc<Batch>> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let mut oldest = self.oldest.load(Ordering::Acquire);
        let newest = self.newest.load(Ordering::Acquire);
        if index < oldest || index >= newest {
            return None;
        }

        let removed = slots[self.slot(index)].take()?;
        self.live.fetch_sub(1, Ordering::AcqRel);

        while oldest < newest && slots[self.slot(oldest)].is_none() {
            oldest += 1;
        }
        self.oldest.store(oldest, Ordering::Release);
        Some(removed)
    }

    pub fn get(&self, index: u64) -> Option<Arc<Batch>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        if index < self.oldest.load(Ordering::Acquire) || index >= self.newest.load(Ordering::Acquire)
        {
            return None;
        }
        slots[self.slot(index)].clone()
    }

    /// Logical index of the oldest live batch (or `newest` when empty)
    pub fn oldest(&self) -> u64 {
        self.oldest.load(Ordering::Acquire)
    }

    /// Logical index the next inserted batch will get
    pub fn newest(&self) -> u64 {
        self.newest.load(Ordering::Acquire)
    }

    /// Live batches
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.newest() - self.oldest() >= self.capacity as u64
    }

    /// Operations still held by live batches
    pub fn live_operations(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.iter().flatten().map(|batch| batch.len()).sum()
    }

    /// Remove every batch, oldest first
    pub fn drain(&self) -> Vec<Arc<Batch>> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let oldest = self.oldest.load(Ordering::Acquire);
        let newest = self.newest.load(Ordering::Acquire);
        let drained: Vec<Arc<Batch>> = (oldest..newest)
            .filter_map(|index| slots[self.slot(index)].take())
            .collect();
        self.oldest.store(newest, Ordering::Release);
        self.live.store(0, Ordering::Release);
        drained
    }
}

impl std::fmt::Debug for BatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRegistry")
            .field("capacity", &self.capacity)
            .field("oldest", &self.oldest())
            .field("newest", &self.newest())
            .field("live", &self.len())
            .finish()
    }
}
