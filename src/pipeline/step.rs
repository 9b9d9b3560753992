//! Single-step results and per-query step bookkeeping

use serde_json::Value;

/// A row flowing through a pipeline. Scans produce node objects,
/// projections produce column objects.
pub type Row = Value;

/// Outcome of advancing an operator by exactly one unit.
///
/// `NotProduced` means the pipeline is alive but had nothing to emit this
/// step (a filter rejected the candidate, or no value is cached yet).
/// `EndOfStream` is only reported once the source is truly exhausted and is
/// reported again on every later step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Row(Row),
    NotProduced,
    EndOfStream,
}

impl Step {
    pub fn is_row(&self) -> bool {
        matches!(self, Step::Row(_))
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Step::EndOfStream)
    }

    /// Apply `f` to a produced row, passing the sentinels through
    pub fn map_row(self, f: impl FnOnce(Row) -> Row) -> Step {
        match self {
            Step::Row(row) => Step::Row(f(row)),
            other => other,
        }
    }
}

/// Counters threaded through every `step` call of one query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryState {
    /// Steps requested at the pipeline root
    pub steps: u64,
    /// Candidates delivered by the leaf, fresh or cached
    pub rows_scanned: u64,
    /// Candidates rejected by filters
    pub rows_filtered: u64,
    /// Rows emitted at the root
    pub rows_produced: u64,
}
