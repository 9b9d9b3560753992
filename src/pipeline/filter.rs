//! Predicate filtering
//!
//! Predicates compare one property of the candidate row with a literal.
//! No type coercion: `1` never equals `"1"`. Missing and null properties
//! never match, not even `<>`.

use serde_json::Value;

use super::errors::ExecutorResult;
use super::operator::Operator;
use super::scan::SharedScanSource;
use super::step::{QueryState, Row, Step};

/// Comparison applied by a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// field = value
    Eq(Value),
    /// field <> value
    Ne(Value),
    /// field >= value
    Gte(Value),
    /// field > value
    Gt(Value),
    /// field <= value
    Lte(Value),
    /// field < value
    Lt(Value),
}

impl FilterOp {
    /// Returns the operator symbol for describe output
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOp::Eq(_) => "=",
            FilterOp::Ne(_) => "<>",
            FilterOp::Gte(_) => ">=",
            FilterOp::Gt(_) => ">",
            FilterOp::Lte(_) => "<=",
            FilterOp::Lt(_) => "<",
        }
    }

    fn operand(&self) -> &Value {
        match self {
            FilterOp::Eq(v)
            | FilterOp::Ne(v)
            | FilterOp::Gte(v)
            | FilterOp::Gt(v)
            | FilterOp::Lte(v)
            | FilterOp::Lt(v) => v,
        }
    }
}

/// A single predicate (property + comparison)
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: FilterOp,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: FilterOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Eq(value))
    }

    pub fn ne(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Ne(value))
    }

    pub fn gte(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Gte(value))
    }

    pub fn gt(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Gt(value))
    }

    pub fn lte(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Lte(value))
    }

    pub fn lt(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Lt(value))
    }

    pub fn describe(&self) -> String {
        format!("{} {} {}", self.field, self.op.symbol(), self.op.operand())
    }
}

/// Evaluates predicates against rows
pub struct PredicateFilter;

impl PredicateFilter {
    /// Checks if a row matches all predicates (AND semantics)
    pub fn matches(row: &Row, predicates: &[Predicate]) -> bool {
        predicates
            .iter()
            .all(|pred| Self::matches_predicate(row, pred))
    }

    fn matches_predicate(row: &Row, predicate: &Predicate) -> bool {
        let field_value = match row.get(&predicate.field) {
            Some(v) if !v.is_null() => v,
            _ => return false,
        };

        match &predicate.op {
            FilterOp::Eq(expected) => field_value == expected,
            FilterOp::Ne(expected) => Self::comparable(field_value, expected)
                && field_value != expected,
            FilterOp::Gte(bound) => Self::compare(field_value, bound, |o| o.is_ge()),
            FilterOp::Gt(bound) => Self::compare(field_value, bound, |o| o.is_gt()),
            FilterOp::Lte(bound) => Self::compare(field_value, bound, |o| o.is_le()),
            FilterOp::Lt(bound) => Self::compare(field_value, bound, |o| o.is_lt()),
        }
    }

    /// Same JSON type on both sides
    fn comparable(a: &Value, b: &Value) -> bool {
        std::mem::discriminant(a) == std::mem::discriminant(b)
    }

    /// Ordered comparison, numbers with numbers and strings with strings only
    fn compare(
        actual: &Value,
        bound: &Value,
        accept: impl Fn(std::cmp::Ordering) -> bool,
    ) -> bool {
        match (actual, bound) {
            (Value::Number(a), Value::Number(b)) => {
                if let (Some(ai), Some(bi)) = (a.as_i64(), b.as_i64()) {
                    return accept(ai.cmp(&bi));
                }
                match (a.as_f64(), b.as_f64()) {
                    (Some(af), Some(bf)) => af.partial_cmp(&bf).map(&accept).unwrap_or(false),
                    _ => false,
                }
            }
            (Value::String(a), Value::String(b)) => accept(a.cmp(b)),
            _ => false,
        }
    }
}

/// Filter operator: one input step per step, rejected candidates become
/// [`Step::NotProduced`]
pub struct Filter {
    input: Box<dyn Operator>,
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new(input: Box<dyn Operator>, predicates: Vec<Predicate>) -> Self {
        Self { input, predicates }
    }
}

impl Operator for Filter {
    fn step(&mut self, state: &mut QueryState) -> ExecutorResult<Step> {
        match self.input.step(state)? {
            Step::Row(row) => {
                if PredicateFilter::matches(&row, &self.predicates) {
                    Ok(Step::Row(row))
                } else {
                    state.rows_filtered += 1;
                    Ok(Step::NotProduced)
                }
            }
            other => Ok(other),
        }
    }

    fn leaf(&mut self) -> &mut dyn SharedScanSource {
        self.input.leaf()
    }

    fn leaf_ref(&self) -> &dyn SharedScanSource {
        self.input.leaf_ref()
    }

    fn describe(&self) -> String {
        let preds: Vec<String> = self.predicates.iter().map(Predicate::describe).collect();
        format!("Filter[{}] <- {}", preds.join(" AND "), self.input.describe())
    }
}
