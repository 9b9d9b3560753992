//! Per-query pipeline driven one step at a time

use super::errors::ExecutorResult;
use super::operator::Operator;
use super::scan::SharedCursor;
use super::step::{QueryState, Row, Step};

/// What one root-level step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A row was appended to the query's result
    Produced,
    /// Nothing this step, the query is still alive
    Pending,
    /// End-of-stream: the result is complete
    Finished,
}

/// The row producer of one query: an operator chain plus the rows it has
/// produced so far.
pub struct QueryPipeline {
    root: Box<dyn Operator>,
    state: QueryState,
    rows: Vec<Row>,
    finished: bool,
}

impl QueryPipeline {
    pub fn new(root: Box<dyn Operator>) -> Self {
        Self {
            root,
            state: QueryState::default(),
            rows: Vec::new(),
            finished: false,
        }
    }

    /// Advance the query by one step.
    ///
    /// After end-of-stream every further call returns `Finished` without
    /// touching the operators.
    pub fn step(&mut self) -> ExecutorResult<Progress> {
        if self.finished {
            return Ok(Progress::Finished);
        }
        self.state.steps += 1;
        match self.root.step(&mut self.state)? {
            Step::Row(row) => {
                self.state.rows_produced += 1;
                self.rows.push(row);
                Ok(Progress::Produced)
            }
            Step::NotProduced => Ok(Progress::Pending),
            Step::EndOfStream => {
                self.finished = true;
                Ok(Progress::Finished)
            }
        }
    }

    /// Switch the leaf between cached reads and independent pulls
    pub fn set_cache_mode(&mut self, use_cached: bool) {
        self.root.leaf().set_cache_mode(use_cached);
    }

    /// Rewire this pipeline's leaf onto `leader`'s scan
    pub fn share_scan_with(&mut self, leader: &QueryPipeline) -> ExecutorResult<()> {
        self.root.leaf().set_shared_source(leader.root.leaf_ref())
    }

    /// The cursor currently feeding this pipeline's leaf
    pub fn cursor(&self) -> &SharedCursor {
        self.root.leaf_ref().cursor()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn take_rows(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn describe(&self) -> String {
        self.root.describe()
    }
}

impl std::fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPipeline")
            .field("plan", &self.describe())
            .field("rows", &self.rows.len())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filter::{Filter, Predicate};
    use crate::pipeline::scan::tests::person_scan;
    use serde_json::json;

    fn filtered(ids: &[i64], pred: Predicate) -> QueryPipeline {
        QueryPipeline::new(Box::new(Filter::new(Box::new(person_scan(ids)), vec![pred])))
    }

    #[test]
    fn test_k_rows_in_n_steps_then_one_end() {
        // 5 candidates, 2 matches: 5 steps of rows/sentinels, then end
        let mut pipeline = filtered(&[0, 1, 2, 3, 4], Predicate::lt("id", json!(2)));

        let mut progress = Vec::new();
        for _ in 0..8 {
            progress.push(pipeline.step().unwrap());
        }

        assert_eq!(
            &progress[..6],
            &[
                Progress::Produced,
                Progress::Produced,
                Progress::Pending,
                Progress::Pending,
                Progress::Pending,
                Progress::Finished,
            ]
        );
        assert!(progress[6..].iter().all(|p| *p == Progress::Finished));
        assert_eq!(pipeline.rows(), &[json!({"id": 0}), json!({"id": 1})]);
        assert_eq!(pipeline.state().steps, 6);
    }

    #[test]
    fn test_shared_pipelines_see_the_same_scan() {
        let mut leader = filtered(&[0, 1, 2], Predicate::gte("id", json!(0)));
        let mut follower = filtered(&[9, 9, 9], Predicate::eq("id", json!(1)));
        follower.share_scan_with(&leader).unwrap();
        assert!(follower.cursor().same_as(leader.cursor()));

        follower.set_cache_mode(true);
        for _ in 0..4 {
            leader.step().unwrap();
            follower.step().unwrap();
        }
        assert!(leader.is_finished());
        assert!(follower.is_finished());
        assert_eq!(follower.take_rows(), vec![json!({"id": 1})]);
        assert!(follower.rows().is_empty());
    }
}
