//! # Batching Errors

use std::any::Any;

use thiserror::Error;

use crate::pipeline::ExecutorError;

/// Result type for batching operations
pub type BatchResult<T> = Result<T, BatchError>;

/// Batching and scheduling errors
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    #[error("{0}")]
    Executor(#[from] ExecutorError),

    #[error("Batch registry full: {capacity} slots in use")]
    RegistryFull { capacity: usize },

    #[error("Round aborted before the shared scan moved: {reason}")]
    RoundAborted { reason: ExecutorError },

    #[error("Batch failed, {members} operations reported the failure: {reason}")]
    BatchFailed { members: usize, reason: String },

    #[error("Propagation is running")]
    PropagationRunning,

    #[error("Worker pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BatchError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BatchError::Executor(e) => e.is_transient(),
            BatchError::RoundAborted { .. } | BatchError::RegistryFull { .. } => true,
            _ => false,
        }
    }

    /// Stable code for logs and CLI output
    pub fn code(&self) -> &'static str {
        match self {
            BatchError::Executor(e) => e.code().code(),
            BatchError::RegistryFull { .. } => "AERO_REGISTRY_FULL",
            BatchError::RoundAborted { .. } => "AERO_ROUND_ABORTED",
            BatchError::BatchFailed { .. } => "AERO_BATCH_FAILED",
            BatchError::PropagationRunning => "AERO_PROPAGATION_RUNNING",
            BatchError::PoolUnavailable(_) => "AERO_POOL_UNAVAILABLE",
            BatchError::InvalidConfig(_) => "AERO_INVALID_CONFIG",
        }
    }
}

/// Completion ledger lookup misses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("No start time for operation {0}")]
    NoStartTime(u64),

    #[error("No finish time for operation {0}")]
    NoFinishTime(u64),
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let aborted = BatchError::RoundAborted {
            reason: ExecutorError::transaction_unavailable("closed"),
        };
        assert!(aborted.is_transient());
        assert!(BatchError::RegistryFull { capacity: 4 }.is_transient());
        assert!(!BatchError::from(ExecutorError::invalid_limit("-1")).is_transient());
        assert!(!BatchError::PropagationRunning.is_transient());
    }

    #[test]
    fn test_codes() {
        assert_eq!(BatchError::RegistryFull { capacity: 1 }.code(), "AERO_REGISTRY_FULL");
        assert_eq!(
            BatchError::from(ExecutorError::query_parse("x")).code(),
            "AERO_QUERY_PARSE"
        );
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("step {} exploded", 3)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "step 3 exploded");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_ledger_error_display() {
        assert_eq!(
            LedgerError::NoFinishTime(7).to_string(),
            "No finish time for operation 7"
        );
    }
}
