//! Cooperative-step query pipelines
//!
//! Every operator advances by exactly one unit per `step` call and answers
//! with a row, "not produced this step", or end-of-stream. Operators never
//! loop internally looking for the next match; the driver decides when to
//! step again. That is what lets a batch move all of its queries over one
//! shared scan in lockstep.
//!
//! # Operators
//!
//! - [`NodeScan`]: leaf, implements [`SharedScanSource`]
//! - [`Filter`]: property predicates
//! - [`Projection`]: result columns
//! - [`Limit`]: row cap

mod errors;
mod filter;
mod limit;
mod operator;
mod projection;
mod query;
pub(crate) mod scan;
mod step;

pub use errors::{ErrorClass, ExecutorError, ExecutorErrorCode, ExecutorResult, Severity};
pub use filter::{Filter, FilterOp, Predicate, PredicateFilter};
pub use limit::Limit;
pub use operator::Operator;
pub use projection::{Projection, ProjectionItem};
pub use query::{Progress, QueryPipeline};
pub use scan::{NodeScan, NodeSource, ScanKind, SharedCursor, SharedScanSource};
pub use step::{QueryState, Row, Step};
