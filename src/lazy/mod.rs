//! Batched lazy execution
//!
//! Queries are deferred at submission, grouped into batches that share one
//! scan, and advanced by a stride-fair scheduler until each reaches
//! end-of-stream.
//!
//! # Components
//!
//! - [`PendingQueue`]: FIFO of deferred operations
//! - [`Batch`]: members advanced in lockstep over a shared scan
//! - [`BatchRegistry`]: bounded ring of live batches
//! - [`StrideScheduler`]: fairness gate and the scan-loop strategy
//! - [`WorkerPool`]: threads for dispatched advance tasks
//! - [`CompletionLedger`]: start/finish timestamps and throughput windows
//! - [`LazyEngine`]: owns all of the above for one instance

mod batch;
mod config;
mod engine;
mod errors;
mod ledger;
mod operation;
mod pending;
mod pool;
mod registry;
mod scheduler;

pub use batch::{Batch, BatchGuard, FormFailure};
pub use config::{ConfigError, EngineConfig};
pub use engine::LazyEngine;
pub use errors::{BatchError, BatchResult, LedgerError};
pub use ledger::{Clock, CompletionLedger, CompletionRecord, ManualClock, SystemClock};
pub use operation::{CompletionSink, OutcomeStatus, PendingOperation, QueryEngine, QueryOutcome};
pub use pending::PendingQueue;
pub use pool::WorkerPool;
pub use registry::{BatchRegistry, Rejected};
pub use scheduler::{stride_gate_open, AdvanceReport, StrideScheduler};
