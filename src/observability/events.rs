//! Observable events for aerograph
//!
//! Events are explicit and typed. Every log line emitted by the engine
//! names one of these.

use std::fmt;

/// Observable events in the lazy execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Engine context constructed
    EngineStart,
    /// Engine shut down, pool drained
    EngineShutdown,
    /// Configuration loaded and validated
    ConfigLoaded,
    /// Worker pool drained and recreated with a new size
    PoolRecreated,
    /// A pool task panicked; the worker survived
    TaskPanicked,
    /// Operations still queued or batched at shutdown were failed
    OperationsAbandoned,

    // Queue
    /// Query begun and placed on the pending queue
    QueryDeferred,

    // Batches
    /// Pending operations grouped into a batch and registered
    BatchFormed,
    /// Batch formation refused (registry full or incompatible scans)
    BatchRejected,
    /// Batch emptied and evicted from the registry
    BatchDrained,
    /// Batch failed, all remaining members report the failure
    BatchFailed,
    /// A round was abandoned before the shared scan moved
    RoundAborted,

    // Operations
    /// Operation reached end-of-stream
    OperationComplete,
    /// Operation finished with a failure
    OperationFailed,

    // Propagation
    /// Long-lived scan workers started
    PropagationStart,
    /// Long-lived scan workers stopped
    PropagationStop,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::EngineStart => "ENGINE_START",
            Event::EngineShutdown => "ENGINE_SHUTDOWN",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::PoolRecreated => "POOL_RECREATED",
            Event::TaskPanicked => "TASK_PANICKED",
            Event::OperationsAbandoned => "OPERATIONS_ABANDONED",

            Event::QueryDeferred => "QUERY_DEFERRED",

            Event::BatchFormed => "BATCH_FORMED",
            Event::BatchRejected => "BATCH_REJECTED",
            Event::BatchDrained => "BATCH_DRAINED",
            Event::BatchFailed => "BATCH_FAILED",
            Event::RoundAborted => "ROUND_ABORTED",

            Event::OperationComplete => "OPERATION_COMPLETE",
            Event::OperationFailed => "OPERATION_FAILED",

            Event::PropagationStart => "PROPAGATION_START",
            Event::PropagationStop => "PROPAGATION_STOP",
        }
    }

    /// Returns true if this event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Event::BatchFailed
                | Event::OperationFailed
                | Event::BatchRejected
                | Event::TaskPanicked
                | Event::OperationsAbandoned
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::EngineStart,
            Event::EngineShutdown,
            Event::ConfigLoaded,
            Event::PoolRecreated,
            Event::TaskPanicked,
            Event::OperationsAbandoned,
            Event::QueryDeferred,
            Event::BatchFormed,
            Event::BatchRejected,
            Event::BatchDrained,
            Event::BatchFailed,
            Event::RoundAborted,
            Event::OperationComplete,
            Event::OperationFailed,
            Event::PropagationStart,
            Event::PropagationStop,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_failure_events() {
        assert!(Event::BatchFailed.is_failure());
        assert!(Event::OperationFailed.is_failure());
        assert!(Event::TaskPanicked.is_failure());
        assert!(!Event::BatchDrained.is_failure());
        assert!(!Event::RoundAborted.is_failure());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::BatchFormed), "BATCH_FORMED");
    }
}
