//! Projection operator: shapes node rows into result columns

use serde_json::{Map, Value};

use super::errors::ExecutorResult;
use super::operator::Operator;
use super::scan::SharedScanSource;
use super::step::{QueryState, Row, Step};

/// One returned column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionItem {
    /// `RETURN n`: the whole node under the variable name
    Variable(String),
    /// `RETURN n.prop`: one property, keyed `n.prop`
    Property { variable: String, property: String },
}

impl ProjectionItem {
    pub fn column_name(&self) -> String {
        match self {
            ProjectionItem::Variable(name) => name.clone(),
            ProjectionItem::Property { variable, property } => {
                format!("{}.{}", variable, property)
            }
        }
    }

    fn evaluate(&self, row: &Row) -> Value {
        match self {
            ProjectionItem::Variable(_) => row.clone(),
            ProjectionItem::Property { property, .. } => {
                row.get(property).cloned().unwrap_or(Value::Null)
            }
        }
    }
}

pub struct Projection {
    input: Box<dyn Operator>,
    items: Vec<ProjectionItem>,
}

impl Projection {
    pub fn new(input: Box<dyn Operator>, items: Vec<ProjectionItem>) -> Self {
        Self { input, items }
    }

    fn shape(&self, row: Row) -> Row {
        let mut columns = Map::with_capacity(self.items.len());
        for item in &self.items {
            columns.insert(item.column_name(), item.evaluate(&row));
        }
        Value::Object(columns)
    }
}

impl Operator for Projection {
    fn step(&mut self, state: &mut QueryState) -> ExecutorResult<Step> {
        let step = self.input.step(state)?;
        Ok(step.map_row(|row| self.shape(row)))
    }

    fn leaf(&mut self) -> &mut dyn SharedScanSource {
        self.input.leaf()
    }

    fn leaf_ref(&self) -> &dyn SharedScanSource {
        self.input.leaf_ref()
    }

    fn describe(&self) -> String {
        let cols: Vec<String> = self.items.iter().map(ProjectionItem::column_name).collect();
        format!("Projection[{}] <- {}", cols.join(", "), self.input.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scan::tests::person_scan;
    use serde_json::json;

    #[test]
    fn test_projection_shapes_rows() {
        let mut projection = Projection::new(
            Box::new(person_scan(&[4])),
            vec![
                ProjectionItem::Variable("n".into()),
                ProjectionItem::Property {
                    variable: "n".into(),
                    property: "id".into(),
                },
                ProjectionItem::Property {
                    variable: "n".into(),
                    property: "age".into(),
                },
            ],
        );
        let mut state = QueryState::default();

        let step = projection.step(&mut state).unwrap();
        assert_eq!(
            step,
            Step::Row(json!({"n": {"id": 4}, "n.id": 4, "n.age": null}))
        );
        assert!(projection.step(&mut state).unwrap().is_end());
    }
}
