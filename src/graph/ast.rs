//! Parsed representation of a single-pattern MATCH query
//!
//! ```text
//! MATCH (n[:Label]) [WHERE n.p OP literal [AND ...]] RETURN n | n.p [, ...] [LIMIT k]
//! ```

use serde_json::Value;

use crate::pipeline::{Predicate, ProjectionItem, ScanKind};

#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuery {
    /// Pattern variable, e.g. `n`
    pub variable: String,
    /// Label filter applied by the scan itself
    pub label: Option<String>,
    /// WHERE predicates (all combined with AND), on node properties
    pub predicates: Vec<Predicate>,
    /// RETURN items, in order
    pub returns: Vec<ProjectionItem>,
    /// LIMIT literal, validated when the pipeline is built
    pub limit: Option<Value>,
}

impl MatchQuery {
    pub fn new(variable: impl Into<String>) -> Self {
        let variable = variable.into();
        Self {
            returns: vec![ProjectionItem::Variable(variable.clone())],
            variable,
            label: None,
            predicates: Vec::new(),
            limit: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_limit(mut self, limit: Value) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The scan this query's leaf performs. Queries with equal scan kinds
    /// can share one scan in a batch.
    pub fn scan_kind(&self) -> ScanKind {
        match &self.label {
            Some(label) => ScanKind::Label(label.clone()),
            None => ScanKind::AllNodes,
        }
    }
}
