//! Query engine over a [`MemoryGraph`]
//!
//! Plans every query as `NodeScan -> [Filter] -> Projection -> [Limit]`.
//! Beginning a query builds the pipeline and nothing else: no node is read
//! until the pipeline is stepped.

use std::sync::Arc;

use super::ast::MatchQuery;
use super::parser::parse_query;
use super::store::MemoryGraph;
use crate::lazy::QueryEngine;
use crate::pipeline::{
    ExecutorResult, Filter, Limit, NodeScan, Operator, Projection, QueryPipeline,
};

#[derive(Debug, Clone)]
pub struct GraphQueryEngine {
    graph: Arc<MemoryGraph>,
}

impl GraphQueryEngine {
    pub fn new(graph: Arc<MemoryGraph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Arc<MemoryGraph> {
        &self.graph
    }

    /// Build the operator chain for an already parsed query
    pub fn plan(&self, query: &MatchQuery) -> ExecutorResult<QueryPipeline> {
        let kind = query.scan_kind();
        let source = Box::new(self.graph.scan(kind.clone()));
        let mut root: Box<dyn Operator> = Box::new(NodeScan::new(kind, source));

        if !query.predicates.is_empty() {
            root = Box::new(Filter::new(root, query.predicates.clone()));
        }
        root = Box::new(Projection::new(root, query.returns.clone()));
        if let Some(limit) = &query.limit {
            root = Box::new(Limit::from_value(root, limit)?);
        }

        Ok(QueryPipeline::new(root))
    }
}

impl QueryEngine for GraphQueryEngine {
    fn begin(&self, text: &str) -> ExecutorResult<QueryPipeline> {
        let query = parse_query(text)?;
        self.plan(&query)
    }
}
