//! Column selection and result ordering.
//!
//! Both are checked against the schema like filters are, and both are only
//! ever applied to rows that were already sampled.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use rowvault_core::error::{Error, Result};
use rowvault_core::{RowData, Schema, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl OrderKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Requested columns and ordering for one round's output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub order_by: Vec<OrderKey>,
}

impl Projection {
    pub fn compile(&self, schema: &Schema) -> Result<CompiledProjection> {
        if let Some(columns) = &self.columns {
            if columns.is_empty() {
                return Err(Error::validation("column selection must not be empty"));
            }
            let mut seen = HashSet::new();
            for column in columns {
                schema.require(column)?;
                if !seen.insert(column.as_str()) {
                    return Err(Error::validation(format!(
                        "column '{}' selected twice",
                        column
                    )));
                }
            }
        }
        for key in &self.order_by {
            schema.require(&key.column)?;
        }
        Ok(CompiledProjection {
            columns: self.columns.clone(),
            order_by: self.order_by.clone(),
        })
    }
}

/// Validated projection
#[derive(Debug, Clone, Default)]
pub struct CompiledProjection {
    columns: Option<Vec<String>>,
    order_by: Vec<OrderKey>,
}

impl CompiledProjection {
    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Stable sort by the order keys; ties keep their incoming order
    pub fn sort<T>(&self, items: &mut [T], row_of: impl Fn(&T) -> &RowData) {
        if self.order_by.is_empty() {
            return;
        }
        items.sort_by(|a, b| compare_rows(row_of(a), row_of(b), &self.order_by));
    }

    /// Keep only the selected columns
    pub fn project(&self, row: &RowData) -> RowData {
        match &self.columns {
            None => row.clone(),
            Some(columns) => columns
                .iter()
                .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                .collect(),
        }
    }

    pub fn output_schema(&self, schema: &Schema) -> Result<Schema> {
        match &self.columns {
            None => Ok(schema.clone()),
            Some(columns) => schema.project(columns),
        }
    }
}

/// Compare two rows by a list of order keys (nulls sort last)
pub fn compare_rows(a: &RowData, b: &RowData, keys: &[OrderKey]) -> Ordering {
    static NULL: Value = Value::Null;
    for key in keys {
        let left = a.get(&key.column).unwrap_or(&NULL);
        let right = b.get(&key.column).unwrap_or(&NULL);
        let mut ord = left.sort_cmp(right);
        if key.descending && !left.is_null() && !right.is_null() {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowvault_core::{ColumnDef, ColumnType};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("score", ColumnType::Float),
        ])
        .unwrap()
    }

    fn row(id: i64, score: Option<f64>) -> RowData {
        let mut r = RowData::new();
        r.insert("id".into(), Value::Integer(id));
        r.insert("score".into(), score.map(Value::Float).unwrap_or(Value::Null));
        r
    }

    #[test]
    fn test_validation() {
        let p = Projection {
            columns: Some(vec!["nope".into()]),
            order_by: vec![],
        };
        assert!(p.compile(&schema()).is_err());
        let p = Projection {
            columns: Some(vec!["id".into(), "id".into()]),
            order_by: vec![],
        };
        assert!(p.compile(&schema()).is_err());
        let p = Projection {
            columns: None,
            order_by: vec![OrderKey::asc("missing")],
        };
        assert!(p.compile(&schema()).is_err());
    }

    #[test]
    fn test_descending_with_nulls_last() {
        let p = Projection {
            columns: Some(vec!["id".into()]),
            order_by: vec![OrderKey::desc("score")],
        }
        .compile(&schema())
        .unwrap();

        let mut rows = vec![row(1, Some(1.0)), row(2, None), row(3, Some(5.0))];
        p.sort(&mut rows, |r| r);
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)]);

        let projected = p.project(&rows[0]);
        assert_eq!(projected.len(), 1);
        assert!(projected.contains_key("id"));
    }
}
