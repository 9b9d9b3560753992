//! Deferred operations and their outcomes

use serde::Serialize;

use crate::pipeline::{ExecutorResult, QueryPipeline, Row};

/// Turns query text into a ready-to-step pipeline.
///
/// Beginning a query must not read any data; all reads happen when the
/// returned pipeline is stepped.
pub trait QueryEngine: Send + Sync {
    fn begin(&self, text: &str) -> ExecutorResult<QueryPipeline>;
}

/// A query accepted by the engine but not yet complete
#[derive(Debug)]
pub struct PendingOperation {
    sequence_number: u64,
    query: String,
    pipeline: QueryPipeline,
}

impl PendingOperation {
    pub fn new(sequence_number: u64, query: impl Into<String>, pipeline: QueryPipeline) -> Self {
        Self {
            sequence_number,
            query: query.into(),
            pipeline,
        }
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn pipeline(&self) -> &QueryPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut QueryPipeline {
        &mut self.pipeline
    }

    /// Whether the pipeline has been stepped at least once
    pub fn is_started(&self) -> bool {
        self.pipeline.state().steps > 0
    }

    /// Consume the operation, keeping its rows
    pub fn into_outcome(mut self, status: OutcomeStatus) -> QueryOutcome {
        QueryOutcome {
            sequence_number: self.sequence_number,
            steps: self.pipeline.state().steps,
            rows: self.pipeline.take_rows(),
            query: self.query,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed { reason: String },
}

impl OutcomeStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, OutcomeStatus::Completed)
    }
}

/// Final result of one operation
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub sequence_number: u64,
    pub query: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    pub steps: u64,
    pub rows: Vec<Row>,
}

/// Receives operations as they leave the engine
pub trait CompletionSink: Sync {
    fn complete(&self, operation: PendingOperation, status: OutcomeStatus);
}
