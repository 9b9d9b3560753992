//! The cooperative-step operator contract

use super::errors::ExecutorResult;
use super::scan::SharedScanSource;
use super::step::{QueryState, Step};

/// An operator that can be advanced one unit at a time.
///
/// `step` pulls at most one candidate from its input and never loops to
/// find the next match: a rejected candidate is reported as
/// [`Step::NotProduced`] and pulling again is left to the driver. This keeps
/// every query of a batch in lockstep with the shared scan.
pub trait Operator: Send {
    fn step(&mut self, state: &mut QueryState) -> ExecutorResult<Step>;

    /// The leaf scan at the bottom of this operator chain
    fn leaf(&mut self) -> &mut dyn SharedScanSource;

    fn leaf_ref(&self) -> &dyn SharedScanSource;

    /// One-line description for logs
    fn describe(&self) -> String;
}
