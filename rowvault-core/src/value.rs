//! # Typed Row Values
//!
//! Rows are ordered maps from column name to a tagged scalar. The ordering of
//! `BTreeMap` gives every row a single canonical form, which is what the row
//! store hashes.
//!
//! ## Coercion Table
//!
//! | From \ To  | Boolean | Integer | Float | Text | Timestamp |
//! |------------|---------|---------|-------|------|-----------|
//! | Boolean    | =       |         |       | yes  |           |
//! | Integer    |         | =       | yes   | yes  |           |
//! | Float      |         | whole   | =     | yes  |           |
//! | Text       | parse   | parse   | parse | =    | RFC 3339  |
//! | Timestamp  |         |         |       | yes  | =         |

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::validate_identifier;

/// Column name to value map; the canonical row payload
pub type RowData = BTreeMap<String, Value>;

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    Text,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of a non-null value
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to the declared column type, or fail with a validation error
    pub fn coerce_to(&self, target: ColumnType) -> Result<Value> {
        let mismatch = || {
            Error::validation(format!(
                "cannot coerce {} to {}",
                self.describe(),
                target
            ))
        };

        match (self, target) {
            (Value::Null, _) => Ok(Value::Null),
            (v, t) if v.column_type() == Some(t) => Ok(v.clone()),
            (Value::Integer(i), ColumnType::Float) => Ok(Value::Float(*i as f64)),
            (Value::Float(f), ColumnType::Integer) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Ok(Value::Integer(*f as i64))
                } else {
                    Err(mismatch())
                }
            }
            (Value::Text(s), ColumnType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Boolean(true)),
                "false" | "f" | "0" => Ok(Value::Boolean(false)),
                _ => Err(mismatch()),
            },
            (Value::Text(s), ColumnType::Integer) => {
                s.trim().parse::<i64>().map(Value::Integer).map_err(|_| mismatch())
            }
            (Value::Text(s), ColumnType::Float) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Value::Float(f)),
                _ => Err(mismatch()),
            },
            (Value::Text(s), ColumnType::Timestamp) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| Value::Timestamp(dt.with_timezone(&Utc)))
                .map_err(|_| mismatch()),
            (Value::Boolean(b), ColumnType::Text) => Ok(Value::Text(b.to_string())),
            (Value::Integer(i), ColumnType::Text) => Ok(Value::Text(i.to_string())),
            (Value::Float(f), ColumnType::Text) => Ok(Value::Text(f.to_string())),
            (Value::Timestamp(t), ColumnType::Text) => Ok(Value::Text(t.to_rfc3339())),
            _ => Err(mismatch()),
        }
    }

    /// Ordering between comparable values. Null and mixed kinds are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Sort order used for result ordering: nulls last, then by `compare`
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => self.compare(other).unwrap_or_else(|| self.rank().cmp(&other.rank())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Integer(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Null => 4,
        }
    }

    /// Stable, type-tagged text form used to group rows (strata, clusters)
    pub fn group_key(&self) -> String {
        match self {
            Value::Null => "n:".to_string(),
            Value::Boolean(b) => format!("b:{}", b),
            Value::Integer(i) => format!("i:{}", i),
            Value::Float(f) if *f == 0.0 => "f:0".to_string(),
            Value::Float(f) => format!("f:{}", f),
            Value::Text(s) => format!("s:{}", s),
            Value::Timestamp(t) => format!("t:{}", t.timestamp_nanos_opt().unwrap_or(i64::MAX)),
        }
    }

    /// Build a value from plain JSON, honouring the declared column type
    pub fn from_json(json: &serde_json::Value, declared: Option<ColumnType>) -> Result<Value> {
        let raw = match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().ok_or_else(|| {
                    Error::validation(format!("number {} is out of range", n))
                })?),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => {
                return Err(Error::validation(format!(
                    "nested JSON values are not supported: {}",
                    other
                )))
            }
        };
        match declared {
            Some(ty) => raw.coerce_to(ty),
            None => Ok(raw),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
        }
    }

    fn describe(&self) -> String {
        match self.column_type() {
            Some(ty) => format!("{} value {}", ty, self),
            None => "null".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Timestamp(t) => write!(f, "'{}'", t.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

fn default_nullable() -> bool {
    true
}

/// Column declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Column-to-type declaration captured once per table per commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            validate_identifier("column name", &column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whitelist lookup used by the filter and projection builders
    pub fn require(&self, name: &str) -> Result<&ColumnDef> {
        self.column(name)
            .ok_or_else(|| Error::validation(format!("unknown column '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Schema restricted to the given columns, in the given order
    pub fn project(&self, columns: &[String]) -> Result<Schema> {
        let defs = columns
            .iter()
            .map(|name| self.require(name).cloned())
            .collect::<Result<Vec<_>>>()?;
        Schema::new(defs)
    }

    /// Schema extended with an extra column (replaces a same-named column)
    pub fn with_column(&self, column: ColumnDef) -> Schema {
        let mut columns: Vec<ColumnDef> = self
            .columns
            .iter()
            .filter(|c| c.name != column.name)
            .cloned()
            .collect();
        columns.push(column);
        Schema { columns }
    }

    pub fn validate_row(&self, row: &RowData) -> Result<()> {
        for (name, value) in row {
            let column = self.require(name)?;
            match value.column_type() {
                None => {}
                Some(ty) if ty == column.column_type => {}
                Some(ColumnType::Integer) if column.column_type == ColumnType::Float => {}
                Some(ty) => {
                    return Err(Error::validation(format!(
                        "column '{}' is {} but got {}",
                        name, column.column_type, ty
                    )))
                }
            }
            if value.is_null() && !column.nullable {
                return Err(Error::validation(format!("column '{}' is not nullable", name)));
            }
        }
        for column in self.columns.iter().filter(|c| !c.nullable) {
            if !row.contains_key(&column.name) {
                return Err(Error::validation(format!(
                    "missing value for non-nullable column '{}'",
                    column.name
                )));
            }
        }
        Ok(())
    }

    /// Parse a JSON object into a typed row
    pub fn row_from_json(&self, json: &serde_json::Value) -> Result<RowData> {
        let object = json
            .as_object()
            .ok_or_else(|| Error::validation("row must be a JSON object"))?;
        let mut row = RowData::new();
        for (name, raw) in object {
            let column = self.require(name)?;
            row.insert(name.clone(), Value::from_json(raw, Some(column.column_type))?);
        }
        self.normalize_row(row)
    }

    /// Validate `row` and convert every value to its column's declared type,
    /// so equal content has one encoding and one row hash
    pub fn normalize_row(&self, row: RowData) -> Result<RowData> {
        self.validate_row(&row)?;
        row.into_iter()
            .map(|(name, value)| {
                let value = value.coerce_to(self.require(&name)?.column_type)?;
                Ok((name, value))
            })
            .collect()
    }
}

/// Render a row as a JSON object
pub fn row_to_json(row: &RowData) -> serde_json::Value {
    serde_json::Value::Object(
        row.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}
