//! Limit operator

use serde_json::Value;

use super::errors::{ExecutorError, ExecutorResult};
use super::operator::Operator;
use super::scan::SharedScanSource;
use super::step::{QueryState, Step};

/// Passes through at most `limit` rows, then reports end-of-stream without
/// pulling its input again.
///
/// Only produced rows count against the limit; `NotProduced` steps do not.
pub struct Limit {
    input: Box<dyn Operator>,
    limit: u64,
    remaining: u64,
}

impl Limit {
    /// Build from a signed count, rejecting negatives
    pub fn new(input: Box<dyn Operator>, limit: i64) -> ExecutorResult<Self> {
        if limit < 0 {
            return Err(ExecutorError::invalid_limit(format!(
                "limit must be non-negative, got {}",
                limit
            )));
        }
        let limit = limit as u64;
        Ok(Self {
            input,
            limit,
            remaining: limit,
        })
    }

    /// Build from a literal, rejecting anything but a non-negative integer
    pub fn from_value(input: Box<dyn Operator>, value: &Value) -> ExecutorResult<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(limit) => Self::new(input, limit),
                None if n.is_u64() => Err(ExecutorError::invalid_limit(format!(
                    "limit {} is out of range",
                    n
                ))),
                None => Err(ExecutorError::invalid_limit(format!(
                    "limit must be an integer, got {}",
                    n
                ))),
            },
            other => Err(ExecutorError::invalid_limit(format!(
                "limit must be an integer, got {}",
                other
            ))),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Operator for Limit {
    fn step(&mut self, state: &mut QueryState) -> ExecutorResult<Step> {
        if self.remaining == 0 {
            return Ok(Step::EndOfStream);
        }
        let step = self.input.step(state)?;
        if step.is_row() {
            self.remaining -= 1;
        }
        Ok(step)
    }

    fn leaf(&mut self) -> &mut dyn SharedScanSource {
        self.input.leaf()
    }

    fn leaf_ref(&self) -> &dyn SharedScanSource {
        self.input.leaf_ref()
    }

    fn describe(&self) -> String {
        format!("Limit({}) <- {}", self.limit, self.input.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filter::{Filter, Predicate};
    use crate::pipeline::scan::tests::person_scan;
    use serde_json::json;

    #[test]
    fn test_negative_limit_rejected() {
        let err = Limit::new(Box::new(person_scan(&[1])), -1).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_non_integral_limit_rejected() {
        assert!(Limit::from_value(Box::new(person_scan(&[1])), &json!(1.5)).is_err());
        assert!(Limit::from_value(Box::new(person_scan(&[1])), &json!("2")).is_err());
        assert!(Limit::from_value(Box::new(person_scan(&[1])), &json!(-2)).is_err());
        assert!(Limit::from_value(Box::new(person_scan(&[1])), &json!(2)).is_ok());
    }

    #[test]
    fn test_only_rows_count_against_limit() {
        let filter = Filter::new(
            Box::new(person_scan(&[0, 1, 2, 3, 4])),
            vec![Predicate::gte("id", json!(2))],
        );
        let mut limit = Limit::new(Box::new(filter), 2).unwrap();
        let mut state = QueryState::default();

        assert_eq!(limit.step(&mut state).unwrap(), Step::NotProduced);
        assert_eq!(limit.step(&mut state).unwrap(), Step::NotProduced);
        assert_eq!(limit.remaining(), 2);
        assert_eq!(limit.step(&mut state).unwrap(), Step::Row(json!({"id": 2})));
        assert_eq!(limit.step(&mut state).unwrap(), Step::Row(json!({"id": 3})));
        assert!(limit.step(&mut state).unwrap().is_end());
        // End reached by count: the fifth node is never pulled
        assert_eq!(limit.leaf_ref().cursor().pulls(), 4);
    }

    #[test]
    fn test_zero_limit_ends_immediately() {
        let mut limit = Limit::new(Box::new(person_scan(&[1, 2])), 0).unwrap();
        assert!(limit.step(&mut QueryState::default()).unwrap().is_end());
        assert_eq!(limit.leaf_ref().cursor().pulls(), 0);
    }

    #[test]
    fn test_upstream_exhaustion_ends_early() {
        let mut limit = Limit::new(Box::new(person_scan(&[1])), 10).unwrap();
        let mut state = QueryState::default();
        assert!(limit.step(&mut state).unwrap().is_row());
        assert!(limit.step(&mut state).unwrap().is_end());
        assert_eq!(limit.remaining(), 9);
    }
}
