//! # Sampling Engine
//!
//! Executes a [`SamplingPlan`] over one table of a resolved commit.
//!
//! ```text
//!   population ──┬─> round 1: filter ─ minus exclusions ─> method ─> selected ─┐
//!                │                                                            │
//!                │       ┌────────────── exclusion set <──────────────────────┘
//!                │       ▼
//!                ├─> round 2: filter ─ minus exclusions ─> method ─> selected ─┐
//!                │                                                            ...
//!                └─> residual = population minus exclusion set
//! ```
//!
//! Rounds run strictly in ascending `round_number`. Each round's candidate
//! set depends on every earlier round, so rounds never run concurrently.
//! The engine is synchronous and CPU-bound; callers run it on a blocking
//! thread and cancel it through a [`CancelToken`], which is checked before
//! every round.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use rowvault_core::config::SamplingConfig;
use rowvault_core::error::{Error, Result};
use rowvault_core::metrics::Timer;
use rowvault_core::{LogicalRowId, RoundSummary, RowData, SamplingMethodKind, Value};

use crate::round::{CompiledRound, RoundMethod, SamplingPlan, METHOD_COLUMN, ROUND_COLUMN};
use crate::{cluster, random, stratified, systematic};

/// One row of the population
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: LogicalRowId,
    pub row: Arc<RowData>,
    key: String,
}

impl Candidate {
    pub fn new(id: LogicalRowId, row: Arc<RowData>) -> Self {
        let key = id.to_string();
        Self { id, row, key }
    }

    /// Hash key for seeded draws: the logical row id's text form
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Cooperative cancellation flag shared with the job runner
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    owner: Arc<str>,
}

impl CancelToken {
    pub fn new(owner: impl AsRef<str>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            owner: Arc::from(owner.as_ref()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled {
                job_id: self.owner.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new("")
    }
}

/// Logical row ids claimed by earlier rounds of the same job
#[derive(Debug, Default)]
pub struct ExclusionSet {
    claimed: HashSet<LogicalRowId>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &LogicalRowId) -> bool {
        self.claimed.contains(id)
    }

    /// Returns false if the id was already claimed
    pub fn claim(&mut self, id: LogicalRowId) -> bool {
        self.claimed.insert(id)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// A sampled row, projected for its round
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedRow {
    pub id: LogicalRowId,
    pub row: RowData,
    pub round_number: u32,
    pub method: SamplingMethodKind,
}

impl SelectedRow {
    /// The row with its round and method tag columns added
    pub fn tagged_row(&self) -> RowData {
        let mut row = self.row.clone();
        row.insert(ROUND_COLUMN.to_string(), Value::Integer(self.round_number as i64));
        row.insert(METHOD_COLUMN.to_string(), Value::Text(self.method.as_str().to_string()));
        row
    }
}

/// Everything a job produced
#[derive(Debug, Clone, Default)]
pub struct SamplingOutcome {
    /// Rounds in order; rows within a round in projection order
    pub selected: Vec<SelectedRow>,
    /// Population minus every selected row, in id order
    pub residual: Option<Vec<LogicalRowId>>,
    pub rounds: Vec<RoundSummary>,
    pub warnings: Vec<String>,
}

/// State handed to a sampling method for one round
pub(crate) struct RoundContext<'a> {
    pub config: &'a SamplingConfig,
    pub population: &'a [Candidate],
    /// Population positions that passed the filter and are not excluded
    pub eligible: Vec<usize>,
    pub label: String,
    pub warnings: &'a mut Vec<String>,
    /// Preflight run: warnings are collected but not logged
    pub dry_run: bool,
}

impl RoundContext<'_> {
    pub fn candidate(&self, position: usize) -> &Candidate {
        &self.population[position]
    }

    pub fn warn(&mut self, message: String) {
        if !self.dry_run {
            tracing::warn!(round = %self.label, %message, "Sampling warning");
        }
        self.warnings.push(format!("{}: {}", self.label, message));
    }
}

pub struct SamplingEngine {
    config: SamplingConfig,
}

impl SamplingEngine {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Dry run of every round, carrying exclusions from round to round, so
    /// a round that runs short once earlier rounds have claimed their rows is
    /// rejected before any job exists. Rows are selected but not projected.
    pub fn preflight(&self, plan: &SamplingPlan, population: &[Candidate]) -> Result<()> {
        let mut exclusions = ExclusionSet::new();
        let mut warnings = Vec::new();
        for round in &plan.rounds {
            let (_, picked) = self.draw_round(round, population, &exclusions, &mut warnings, true)?;
            for position in picked {
                exclusions.claim(population[position].id.clone());
            }
        }
        debug!(
            rounds = plan.rounds.len(),
            claimed = exclusions.len(),
            "Preflight passed"
        );
        Ok(())
    }

    /// Eligible count and sorted, deduplicated picks for one round
    fn draw_round(
        &self,
        round: &CompiledRound,
        population: &[Candidate],
        exclusions: &ExclusionSet,
        warnings: &mut Vec<String>,
        dry_run: bool,
    ) -> Result<(u64, Vec<usize>)> {
        let eligible = eligible_positions(round, population, exclusions);
        let candidates = eligible.len() as u64;
        check_capacity(&self.config, round, population, &eligible)?;

        let mut ctx = RoundContext {
            config: &self.config,
            population,
            eligible,
            label: format!("round {}", round.round_number),
            warnings,
            dry_run,
        };
        let mut picked = match &round.method {
            RoundMethod::Random { sample_size, seed } => {
                random::select(&mut ctx, *sample_size, *seed)
            }
            RoundMethod::Stratified {
                sample_size,
                strata_columns,
                seed,
                allocation,
                min_per_stratum,
            } => stratified::select(
                &mut ctx,
                *sample_size,
                strata_columns,
                *seed,
                *allocation,
                *min_per_stratum,
            ),
            RoundMethod::Systematic {
                interval,
                start,
                order_by,
            } => systematic::select(&mut ctx, *interval, *start, order_by),
            RoundMethod::Cluster {
                cluster_column,
                num_clusters,
                take,
                seed,
            } => cluster::select(&mut ctx, cluster_column, *num_clusters, *take, *seed),
        }?;
        picked.sort_unstable();
        picked.dedup();
        Ok((candidates, picked))
    }

    pub fn execute(
        &self,
        plan: &SamplingPlan,
        population: &[Candidate],
        cancel: &CancelToken,
    ) -> Result<SamplingOutcome> {
        self.execute_with_progress(plan, population, cancel, &mut |_| {})
    }

    /// Run every round, calling `on_round` after each one completes
    pub fn execute_with_progress(
        &self,
        plan: &SamplingPlan,
        population: &[Candidate],
        cancel: &CancelToken,
        on_round: &mut dyn FnMut(&RoundSummary),
    ) -> Result<SamplingOutcome> {
        let timer = Timer::new("sampling_plan");
        let mut exclusions = ExclusionSet::new();
        let mut outcome = SamplingOutcome::default();

        for round in &plan.rounds {
            cancel.check()?;

            let (candidates, picked) =
                self.draw_round(round, population, &exclusions, &mut outcome.warnings, false)?;

            let method = round.method.kind();
            let mut rows: Vec<&Candidate> = Vec::with_capacity(picked.len());
            for position in picked {
                let candidate = &population[position];
                if exclusions.claim(candidate.id.clone()) {
                    rows.push(candidate);
                }
            }
            round.projection.sort(&mut rows, |c| c.row.as_ref());

            let summary = RoundSummary {
                round_number: round.round_number,
                method,
                candidates,
                selected: rows.len() as u64,
            };
            outcome.selected.extend(rows.into_iter().map(|c| SelectedRow {
                id: c.id.clone(),
                row: round.projection.project(&c.row),
                round_number: round.round_number,
                method,
            }));

            info!(
                round = round.round_number,
                method = %method,
                candidates = summary.candidates,
                selected = summary.selected,
                "Sampling round complete"
            );
            on_round(&summary);
            outcome.rounds.push(summary);
        }

        if plan.export_residual {
            let residual: BTreeSet<LogicalRowId> = population
                .iter()
                .filter(|c| !exclusions.contains(&c.id))
                .map(|c| c.id.clone())
                .collect();
            debug!(rows = residual.len(), "Residual computed");
            outcome.residual = Some(residual.into_iter().collect());
        }

        timer.stop();
        Ok(outcome)
    }
}

fn eligible_positions(
    round: &CompiledRound,
    population: &[Candidate],
    exclusions: &ExclusionSet,
) -> Vec<usize> {
    population
        .iter()
        .enumerate()
        .filter(|(_, c)| !exclusions.contains(&c.id))
        .filter(|(_, c)| round.filter.as_ref().map_or(true, |f| f.matches(&c.row)))
        .map(|(i, _)| i)
        .collect()
}

fn check_capacity(
    config: &SamplingConfig,
    round: &CompiledRound,
    population: &[Candidate],
    eligible: &[usize],
) -> Result<()> {
    let available = eligible.len() as u64;
    match &round.method {
        RoundMethod::Random { sample_size, .. } | RoundMethod::Stratified { sample_size, .. }
            if *sample_size > available =>
        {
            Err(Error::capacity(
                format!(
                    "round {}: sample_size {} exceeds the {} rows available",
                    round.round_number, sample_size, available
                ),
                available,
            ))
        }
        RoundMethod::Stratified { strata_columns, .. } => {
            stratified::check_cardinality(config, population, eligible, strata_columns)
                .map_err(|e| prefix_round(round.round_number, e))
        }
        RoundMethod::Systematic { start, .. } if *start > available => Err(Error::capacity(
            format!(
                "round {}: start position {} is past the {} rows available",
                round.round_number, start, available
            ),
            available,
        )),
        RoundMethod::Cluster {
            cluster_column,
            num_clusters,
            ..
        } => {
            let distinct = cluster::distinct_clusters(population, eligible, cluster_column);
            if *num_clusters > distinct {
                return Err(Error::capacity(
                    format!(
                        "round {}: num_clusters {} exceeds the {} distinct '{}' values available",
                        round.round_number, num_clusters, distinct, cluster_column
                    ),
                    distinct,
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn prefix_round(round_number: u32, err: Error) -> Error {
    match err {
        Error::Capacity { message, limit } => Error::Capacity {
            message: format!("round {}: {}", round_number, message),
            limit,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowvault_core::config::FilterLimits;
    use rowvault_core::{ColumnDef, ColumnType, Schema};

    use crate::filter::FilterSpec;
    use crate::round::RoundConfig;

    fn population(n: u64) -> Vec<Candidate> {
        (0..n)
            .map(|i| {
                let mut row = RowData::new();
                row.insert("id".into(), Value::Integer(i as i64));
                Candidate::new(LogicalRowId::new("data", i), Arc::new(row))
            })
            .collect()
    }

    fn schema() -> Schema {
        Schema::new(vec![ColumnDef::new("id", ColumnType::Integer)]).unwrap()
    }

    fn plan(rounds: &[RoundConfig], residual: bool) -> SamplingPlan {
        SamplingPlan::compile(rounds, &schema(), &FilterLimits::default(), residual).unwrap()
    }

    #[test]
    fn test_cancel_before_first_round() {
        let engine = SamplingEngine::new(SamplingConfig::default());
        let p = plan(
            &[RoundConfig::new(1, RoundMethod::Random { sample_size: 5, seed: Some(1) })],
            false,
        );
        let token = CancelToken::new("job-1");
        token.cancel();
        let err = engine.execute(&p, &population(10), &token).unwrap_err();
        assert!(matches!(err, Error::Cancelled { ref job_id } if job_id == "job-1"));
    }

    #[test]
    fn test_filtered_capacity_names_available_rows() {
        let engine = SamplingEngine::new(SamplingConfig::default());
        let p = plan(
            &[RoundConfig::new(1, RoundMethod::Random { sample_size: 20, seed: Some(1) })
                .with_filter(FilterSpec::Text("id < 12".into()))],
            false,
        );
        let err = engine.preflight(&p, &population(100)).unwrap_err();
        match err {
            Error::Capacity { limit, message } => {
                assert_eq!(limit, 12);
                assert!(message.contains("12 rows available"));
            }
            other => panic!("expected capacity error, got {:?}", other),
        }
    }

    #[test]
    fn test_progress_callback_sees_each_round() {
        let engine = SamplingEngine::new(SamplingConfig::default());
        let p = plan(
            &[
                RoundConfig::new(1, RoundMethod::Random { sample_size: 3, seed: Some(1) }),
                RoundConfig::new(2, RoundMethod::Random { sample_size: 3, seed: Some(2) }),
            ],
            false,
        );
        let mut seen = Vec::new();
        engine
            .execute_with_progress(&p, &population(20), &CancelToken::default(), &mut |s| {
                seen.push(s.round_number)
            })
            .unwrap();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_tagged_row_columns() {
        let selected = SelectedRow {
            id: LogicalRowId::new("data", 1),
            row: RowData::new(),
            round_number: 2,
            method: SamplingMethodKind::Systematic,
        };
        let row = selected.tagged_row();
        assert_eq!(row[ROUND_COLUMN], Value::Integer(2));
        assert_eq!(row[METHOD_COLUMN], Value::Text("systematic".into()));
    }
}
