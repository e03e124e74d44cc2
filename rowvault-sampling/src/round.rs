//! Sampling round configuration and plan compilation.
//!
//! A round as submitted (JSON or Rust):
//!
//! ```json
//! {
//!   "round_number": 1,
//!   "method": "stratified",
//!   "sample_size": 100,
//!   "strata_columns": ["region"],
//!   "seed": 42,
//!   "filter": "age >= 18 AND status IN ('active', 'trial')",
//!   "projection": { "columns": ["id", "region"], "order_by": [{ "column": "id" }] }
//! }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use rowvault_core::config::FilterLimits;
use rowvault_core::error::{Error, Result};
use rowvault_core::{ColumnDef, ColumnType, SamplingMethodKind, Schema};

use crate::filter::{CompiledFilter, FilterSpec};
use crate::projection::{CompiledProjection, Projection};

/// Column carrying the round that selected a sample row
pub const ROUND_COLUMN: &str = "_sample_round";
/// Column carrying the method that selected a sample row
pub const METHOD_COLUMN: &str = "_sample_method";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Allocation {
    /// `max(min_per_stratum, ceil(share × sample_size))` per stratum
    #[default]
    Proportional,
    /// The same count from every stratum
    Fixed(u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterTake {
    #[default]
    All,
    Count(u64),
    /// Percentage in (0, 100]
    Percent(f64),
}

fn default_start() -> u64 {
    1
}

fn default_min_per_stratum() -> u64 {
    1
}

/// Method-specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RoundMethod {
    Random {
        sample_size: u64,
        #[serde(default)]
        seed: Option<u64>,
    },
    Stratified {
        sample_size: u64,
        strata_columns: Vec<String>,
        #[serde(default)]
        seed: Option<u64>,
        #[serde(default)]
        allocation: Allocation,
        #[serde(default = "default_min_per_stratum")]
        min_per_stratum: u64,
    },
    Systematic {
        interval: u64,
        #[serde(default = "default_start")]
        start: u64,
        #[serde(default)]
        order_by: Vec<String>,
    },
    Cluster {
        cluster_column: String,
        num_clusters: u64,
        #[serde(default)]
        take: ClusterTake,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl RoundMethod {
    pub fn kind(&self) -> SamplingMethodKind {
        match self {
            RoundMethod::Random { .. } => SamplingMethodKind::Random,
            RoundMethod::Stratified { .. } => SamplingMethodKind::Stratified,
            RoundMethod::Systematic { .. } => SamplingMethodKind::Systematic,
            RoundMethod::Cluster { .. } => SamplingMethodKind::Cluster,
        }
    }

    /// Requested row count, for the methods that take one
    pub fn sample_size(&self) -> Option<u64> {
        match self {
            RoundMethod::Random { sample_size, .. } | RoundMethod::Stratified { sample_size, .. } => {
                Some(*sample_size)
            }
            _ => None,
        }
    }

    fn validate(&self, schema: &Schema) -> Result<()> {
        match self {
            RoundMethod::Random { sample_size, .. } => positive("sample_size", *sample_size),
            RoundMethod::Stratified {
                sample_size,
                strata_columns,
                allocation,
                ..
            } => {
                positive("sample_size", *sample_size)?;
                if strata_columns.is_empty() {
                    return Err(Error::validation("stratified sampling needs strata_columns"));
                }
                let mut seen = HashSet::new();
                for column in strata_columns {
                    schema.require(column)?;
                    if !seen.insert(column) {
                        return Err(Error::validation(format!(
                            "strata column '{}' listed twice",
                            column
                        )));
                    }
                }
                if let Allocation::Fixed(count) = allocation {
                    positive("fixed allocation", *count)?;
                }
                Ok(())
            }
            RoundMethod::Systematic {
                interval,
                start,
                order_by,
            } => {
                positive("interval", *interval)?;
                positive("start", *start)?;
                for column in order_by {
                    schema.require(column)?;
                }
                Ok(())
            }
            RoundMethod::Cluster {
                cluster_column,
                num_clusters,
                take,
                ..
            } => {
                schema.require(cluster_column)?;
                positive("num_clusters", *num_clusters)?;
                match take {
                    ClusterTake::All => Ok(()),
                    ClusterTake::Count(n) => positive("cluster take count", *n),
                    ClusterTake::Percent(p) if *p > 0.0 && *p <= 100.0 => Ok(()),
                    ClusterTake::Percent(p) => Err(Error::validation(format!(
                        "cluster take percent must be in (0, 100], got {}",
                        p
                    ))),
                }
            }
        }
    }
}

fn positive(what: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(Error::validation(format!("{} must be greater than 0", what)));
    }
    Ok(())
}

/// One round as submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundConfig {
    pub round_number: u32,
    #[serde(flatten)]
    pub method: RoundMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSpec>,
    #[serde(default)]
    pub projection: Projection,
}

impl RoundConfig {
    pub fn new(round_number: u32, method: RoundMethod) -> Self {
        Self {
            round_number,
            method,
            filter: None,
            projection: Projection::default(),
        }
    }

    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn compile(&self, schema: &Schema, limits: &FilterLimits) -> Result<CompiledRound> {
        let context = |e: Error| match e {
            Error::Validation { message } => {
                Error::validation(format!("round {}: {}", self.round_number, message))
            }
            other => other,
        };
        self.method.validate(schema).map_err(context)?;
        let filter = self
            .filter
            .as_ref()
            .map(|f| f.compile(schema, limits))
            .transpose()
            .map_err(context)?;
        let projection = self.projection.compile(schema).map_err(context)?;
        Ok(CompiledRound {
            round_number: self.round_number,
            method: self.method.clone(),
            filter,
            projection,
        })
    }
}

/// A round checked against the source schema
#[derive(Debug, Clone)]
pub struct CompiledRound {
    pub round_number: u32,
    pub method: RoundMethod,
    pub filter: Option<CompiledFilter>,
    pub projection: CompiledProjection,
}

/// Every round of a job, ordered by round number
#[derive(Debug, Clone)]
pub struct SamplingPlan {
    pub rounds: Vec<CompiledRound>,
    pub export_residual: bool,
}

impl SamplingPlan {
    pub fn compile(
        rounds: &[RoundConfig],
        schema: &Schema,
        limits: &FilterLimits,
        export_residual: bool,
    ) -> Result<Self> {
        if rounds.is_empty() {
            return Err(Error::validation("a sampling job needs at least one round"));
        }
        let mut seen = HashSet::new();
        for round in rounds {
            if !seen.insert(round.round_number) {
                return Err(Error::validation(format!(
                    "round_number {} is used twice",
                    round.round_number
                )));
            }
        }
        let mut compiled = rounds
            .iter()
            .map(|r| r.compile(schema, limits))
            .collect::<Result<Vec<_>>>()?;
        for round in &compiled {
            let output = round.projection.output_schema(schema)?;
            if let Some(tag) = [ROUND_COLUMN, METHOD_COLUMN]
                .into_iter()
                .find(|tag| output.contains(tag))
            {
                return Err(Error::validation(format!(
                    "round {}: column '{}' is reserved for sample tags; project it away",
                    round.round_number, tag
                )));
            }
        }
        compiled.sort_by_key(|r| r.round_number);
        Ok(Self {
            rounds: compiled,
            export_residual,
        })
    }

    /// Schema of the `sample` table: the union of every round's columns
    /// (all nullable) plus the round and method tags
    pub fn sample_schema(&self, source: &Schema) -> Result<Schema> {
        let mut wanted = HashSet::new();
        for round in &self.rounds {
            for column in round.projection.output_schema(source)?.columns {
                wanted.insert(column.name);
            }
        }
        let mut columns: Vec<ColumnDef> = source
            .columns
            .iter()
            .filter(|c| wanted.contains(&c.name))
            .map(|c| ColumnDef::new(c.name.clone(), c.column_type))
            .collect();
        columns.push(ColumnDef::new(ROUND_COLUMN, ColumnType::Integer).required());
        columns.push(ColumnDef::new(METHOD_COLUMN, ColumnType::Text).required());
        Schema::new(columns)
    }
}
