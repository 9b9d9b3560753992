//! In-memory graph and query front end
//!
//! The batching engine treats query execution as an external collaborator
//! behind [`crate::lazy::QueryEngine`]. This module is the implementation
//! used by the CLI and the tests: an append-only property graph, a parser
//! for single-pattern MATCH queries, and a planner that turns them into
//! cooperative-step pipelines.

mod ast;
mod engine;
mod parser;
mod store;

pub use ast::MatchQuery;
pub use engine::GraphQueryEngine;
pub use parser::parse_query;
pub use store::{GraphFile, GraphScan, MemoryGraph, Node, NODE_ID_KEY, NODE_LABELS_KEY};
