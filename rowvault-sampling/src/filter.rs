//! # Filter Builder
//!
//! Turns user-supplied row filters into a typed predicate tree.
//!
//! ```text
//!   text ──parse──> FilterExpr ──compile(schema, limits)──> CompiledFilter
//!                       ^                                        │
//!   JSON ──serde────────┘                              matches(&RowData)
//! ```
//!
//! Compilation is the whitelist: every column must exist in the table
//! schema, every operator comes from a closed enum and every literal is
//! coerced to its column's declared type. Nothing is ever rendered back into
//! a query string.
//!
//! Evaluation uses three-valued logic. A comparison against a null cell is
//! unknown, unknown propagates through `NOT`, and a row matches only when
//! the whole tree is definitely true.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use rowvault_core::config::FilterLimits;
use rowvault_core::error::{Error, Result};
use rowvault_core::{ColumnType, RowData, Schema, Value};

use crate::parser::parse_filter;

/// Allowed filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "lte")]
    Lte,
    #[serde(rename = "=", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "ne", alias = "<>")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "ilike")]
    Ilike,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Like => "like",
            Operator::Ilike => "ilike",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured filter expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    Condition {
        column: String,
        op: Operator,
        #[serde(default)]
        value: serde_json::Value,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    pub fn condition(column: impl Into<String>, op: Operator, value: serde_json::Value) -> Self {
        FilterExpr::Condition {
            column: column.into(),
            op,
            value,
        }
    }

    /// Nesting depth; a bare condition has depth 1
    pub fn depth(&self) -> usize {
        match self {
            FilterExpr::Condition { .. } => 1,
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                1 + children.iter().map(FilterExpr::depth).max().unwrap_or(0)
            }
            FilterExpr::Not(inner) => 1 + inner.depth(),
        }
    }

    /// Compile against a table schema
    pub fn compile(&self, schema: &Schema, limits: &FilterLimits) -> Result<CompiledFilter> {
        let depth = self.depth();
        if depth > limits.max_depth {
            return Err(Error::validation(format!(
                "filter nesting depth {} exceeds the limit of {}",
                depth, limits.max_depth
            )));
        }
        let encoded_len = serde_json::to_string(self)?.len();
        if encoded_len > limits.max_encoded_len {
            return Err(Error::validation(format!(
                "filter expression is too large ({} bytes encoded, limit {})",
                encoded_len, limits.max_encoded_len
            )));
        }
        Ok(CompiledFilter {
            root: compile_node(self, schema, limits)?,
        })
    }
}

/// A filter as submitted: textual grammar or structured tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSpec {
    Text(String),
    Expr(FilterExpr),
}

impl FilterSpec {
    pub fn to_expr(&self, limits: &FilterLimits) -> Result<FilterExpr> {
        match self {
            FilterSpec::Text(text) => parse_filter(text, limits),
            FilterSpec::Expr(expr) => Ok(expr.clone()),
        }
    }

    pub fn compile(&self, schema: &Schema, limits: &FilterLimits) -> Result<CompiledFilter> {
        self.to_expr(limits)?.compile(schema, limits)
    }
}

/// Executable predicate
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Compare {
        column: String,
        op: Operator,
        value: Value,
    },
    InList {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Like {
        column: String,
        pattern: LikePattern,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

impl CompiledFilter {
    pub fn matches(&self, row: &RowData) -> bool {
        eval(&self.root, row) == Some(true)
    }
}

fn compile_node(expr: &FilterExpr, schema: &Schema, limits: &FilterLimits) -> Result<Node> {
    match expr {
        FilterExpr::And(children) | FilterExpr::Or(children) => {
            if children.is_empty() {
                return Err(Error::validation("AND/OR needs at least one operand"));
            }
            let nodes = children
                .iter()
                .map(|c| compile_node(c, schema, limits))
                .collect::<Result<Vec<_>>>()?;
            Ok(match expr {
                FilterExpr::And(_) => Node::And(nodes),
                _ => Node::Or(nodes),
            })
        }
        FilterExpr::Not(inner) => Ok(Node::Not(Box::new(compile_node(inner, schema, limits)?))),
        FilterExpr::Condition { column, op, value } => {
            compile_condition(column, *op, value, schema, limits)
        }
    }
}

fn compile_condition(
    column: &str,
    op: Operator,
    raw: &serde_json::Value,
    schema: &Schema,
    limits: &FilterLimits,
) -> Result<Node> {
    let def = schema.require(column)?;
    let ty = def.column_type;
    let column = column.to_string();

    match op {
        Operator::IsNull | Operator::IsNotNull => {
            if !raw.is_null() {
                return Err(Error::validation(format!("{} takes no value", op)));
            }
            Ok(Node::IsNull {
                column,
                negated: op == Operator::IsNotNull,
            })
        }
        Operator::In | Operator::NotIn => {
            let items = raw.as_array().ok_or_else(|| {
                Error::validation(format!("{} on '{}' needs a list of values", op, column))
            })?;
            if items.is_empty() {
                return Err(Error::validation(format!("{} list on '{}' is empty", op, column)));
            }
            if items.len() > limits.max_in_list {
                return Err(Error::validation(format!(
                    "{} list on '{}' has {} values; the limit is {}",
                    op,
                    column,
                    items.len(),
                    limits.max_in_list
                )));
            }
            let values = items
                .iter()
                .map(|item| coerce_literal(&column, ty, item))
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::InList {
                column,
                values,
                negated: op == Operator::NotIn,
            })
        }
        Operator::Like | Operator::Ilike => {
            if ty != ColumnType::Text {
                return Err(Error::validation(format!(
                    "{} requires a text column; '{}' is {}",
                    op, column, ty
                )));
            }
            let pattern = raw.as_str().ok_or_else(|| {
                Error::validation(format!("{} pattern on '{}' must be a string", op, column))
            })?;
            if pattern.len() > limits.max_expression_len {
                return Err(Error::validation("LIKE pattern is too long"));
            }
            Ok(Node::Like {
                column,
                pattern: LikePattern::compile(pattern, op == Operator::Ilike)?,
            })
        }
        Operator::Gt
        | Operator::Gte
        | Operator::Lt
        | Operator::Lte
        | Operator::Eq
        | Operator::Ne => {
            let value = coerce_literal(&column, ty, raw)?;
            if op != Operator::Eq && op != Operator::Ne && ty == ColumnType::Boolean {
                return Err(Error::validation(format!(
                    "'{}' is boolean and only supports = and !=",
                    column
                )));
            }
            Ok(Node::Compare { column, op, value })
        }
    }
}

fn coerce_literal(column: &str, ty: ColumnType, raw: &serde_json::Value) -> Result<Value> {
    if raw.is_null() {
        return Err(Error::validation(format!(
            "null literal for '{}'; use IS NULL / IS NOT NULL",
            column
        )));
    }
    Value::from_json(raw, Some(ty)).map_err(|e| {
        Error::validation(format!("bad literal for column '{}': {}", column, e))
    })
}

/// Kleene three-valued evaluation; `None` is unknown
fn eval(node: &Node, row: &RowData) -> Option<bool> {
    let cell = |column: &str| row.get(column).filter(|v| !v.is_null());
    match node {
        Node::Compare { column, op, value } => {
            let ord = cell(column)?.compare(value)?;
            Some(match op {
                Operator::Gt => ord == Ordering::Greater,
                Operator::Gte => ord != Ordering::Less,
                Operator::Lt => ord == Ordering::Less,
                Operator::Lte => ord != Ordering::Greater,
                Operator::Eq => ord == Ordering::Equal,
                _ => ord != Ordering::Equal,
            })
        }
        Node::InList {
            column,
            values,
            negated,
        } => {
            let v = cell(column)?;
            let found = values
                .iter()
                .any(|candidate| v.compare(candidate) == Some(Ordering::Equal));
            Some(found != *negated)
        }
        Node::Like { column, pattern } => Some(pattern.matches(cell(column)?.as_text()?)),
        Node::IsNull { column, negated } => Some(cell(column).is_none() != *negated),
        Node::And(children) => {
            let mut unknown = false;
            for child in children {
                match eval(child, row) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(true)
            }
        }
        Node::Or(children) => {
            let mut unknown = false;
            for child in children {
                match eval(child, row) {
                    Some(true) => return Some(true),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
        Node::Not(inner) => eval(inner, row).map(|b| !b),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum LikeToken {
    Char(char),
    AnyOne,
    AnyMany,
}

/// SQL LIKE pattern (`%`, `_`, `\` escape)
#[derive(Debug, Clone)]
pub struct LikePattern {
    tokens: Vec<LikeToken>,
    case_insensitive: bool,
}

impl LikePattern {
    pub fn compile(pattern: &str, case_insensitive: bool) -> Result<Self> {
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            let token = match c {
                '%' => LikeToken::AnyMany,
                '_' => LikeToken::AnyOne,
                '\\' => match chars.next() {
                    Some(escaped) => LikeToken::Char(fold(escaped, case_insensitive)),
                    None => return Err(Error::validation("LIKE pattern ends with an escape")),
                },
                other => LikeToken::Char(fold(other, case_insensitive)),
            };
            // Runs of % collapse to one
            if token == LikeToken::AnyMany && tokens.last() == Some(&LikeToken::AnyMany) {
                continue;
            }
            tokens.push(token);
        }
        Ok(Self {
            tokens,
            case_insensitive,
        })
    }

    /// Iterative wildcard match; remembers only the last `%`, so the cost is
    /// bounded by text length times pattern length
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().map(|c| fold(c, self.case_insensitive)).collect();
        let (mut t, mut p) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(LikeToken::AnyMany) => {
                    star = Some((p, t));
                    p += 1;
                }
                Some(LikeToken::AnyOne) => {
                    t += 1;
                    p += 1;
                }
                Some(LikeToken::Char(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                }
                _ => match star {
                    Some((star_p, star_t)) => {
                        p = star_p + 1;
                        t = star_t + 1;
                        star = Some((star_p, star_t + 1));
                    }
                    None => return false,
                },
            }
        }
        self.tokens[p..].iter().all(|tok| *tok == LikeToken::AnyMany)
    }
}

fn fold(c: char, case_insensitive: bool) -> char {
    if case_insensitive {
        c.to_lowercase().next().unwrap_or(c)
    } else {
        c
    }
}
