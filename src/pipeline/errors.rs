//! Pipeline error types
//!
//! Error codes:
//! - AERO_EXECUTION_FAILED (ERROR)
//! - AERO_INVALID_LIMIT (ERROR, configuration)
//! - AERO_INCOMPATIBLE_SCAN (ERROR, configuration)
//! - AERO_QUERY_PARSE (ERROR, configuration)
//! - AERO_TRANSACTION_UNAVAILABLE (ERROR, transient)

use std::fmt;

/// Severity levels for pipeline errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation failed but system is healthy
    Error,
    /// System must halt immediately
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// How the caller is expected to react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is wrong. Retrying cannot help.
    Configuration,
    /// The underlying transaction is temporarily unavailable. Retry later.
    Transient,
    /// Anything else
    Execution,
}

/// Pipeline error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorCode {
    /// General operator failure
    AeroExecutionFailed,
    /// Negative or non-integral limit
    AeroInvalidLimit,
    /// Follower leaf cannot share the leader's scan
    AeroIncompatibleScan,
    /// Query text not understood
    AeroQueryParse,
    /// Transaction unavailable mid-step
    AeroTransactionUnavailable,
}

impl ExecutorErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorErrorCode::AeroExecutionFailed => "AERO_EXECUTION_FAILED",
            ExecutorErrorCode::AeroInvalidLimit => "AERO_INVALID_LIMIT",
            ExecutorErrorCode::AeroIncompatibleScan => "AERO_INCOMPATIBLE_SCAN",
            ExecutorErrorCode::AeroQueryParse => "AERO_QUERY_PARSE",
            ExecutorErrorCode::AeroTransactionUnavailable => "AERO_TRANSACTION_UNAVAILABLE",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        Severity::Error
    }

    /// Returns the class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            ExecutorErrorCode::AeroInvalidLimit
            | ExecutorErrorCode::AeroIncompatibleScan
            | ExecutorErrorCode::AeroQueryParse => ErrorClass::Configuration,
            ExecutorErrorCode::AeroTransactionUnavailable => ErrorClass::Transient,
            ExecutorErrorCode::AeroExecutionFailed => ErrorClass::Execution,
        }
    }
}

impl fmt::Display for ExecutorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Pipeline error with full context
#[derive(Debug, Clone)]
pub struct ExecutorError {
    code: ExecutorErrorCode,
    message: String,
}

impl ExecutorError {
    fn new(code: ExecutorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an execution failed error
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::AeroExecutionFailed, reason)
    }

    /// Create an invalid limit error
    pub fn invalid_limit(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::AeroInvalidLimit, reason)
    }

    /// Create an incompatible scan error
    pub fn incompatible_scan(leader: impl fmt::Display, follower: impl fmt::Display) -> Self {
        Self::new(
            ExecutorErrorCode::AeroIncompatibleScan,
            format!(
                "follower scan {} cannot share leader scan {}",
                follower, leader
            ),
        )
    }

    /// Create a query parse error
    pub fn query_parse(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::AeroQueryParse, reason)
    }

    /// Create a transient transaction-unavailable error
    pub fn transaction_unavailable(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::AeroTransactionUnavailable, reason)
    }

    /// Returns the error code
    pub fn code(&self) -> ExecutorErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the step may be retried later
    pub fn is_transient(&self) -> bool {
        self.code.class() == ErrorClass::Transient
    }

    /// Whether the error is a configuration error
    pub fn is_configuration(&self) -> bool {
        self.code.class() == ErrorClass::Configuration
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for ExecutorError {}

/// Result type for pipeline operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;
