//! Systematic sampling: every `interval`-th candidate from `start`.
//!
//! Needs a total order over the candidates (logical row id, or the round's
//! `order_by` columns with the row id as tie-breaker), so the whole eligible
//! set is sorted. Above `systematic_max_sort_rows` the sort is skipped and a
//! hash-derived pseudo-position picks roughly one row per interval instead.

use std::cmp::Ordering;

use rowvault_core::crypto::selection_hash;
use rowvault_core::error::Result;

use crate::engine::RoundContext;
use crate::projection::{compare_rows, OrderKey};

const PSEUDO_POSITION_SEED: u64 = 0;

pub(crate) fn select(
    ctx: &mut RoundContext<'_>,
    interval: u64,
    start: u64,
    order_by: &[String],
) -> Result<Vec<usize>> {
    let len = ctx.eligible.len() as u64;
    if len > ctx.config.systematic_max_sort_rows {
        ctx.warn(format!(
            "{} candidates exceed the systematic sort limit of {}; using hash pseudo-positions",
            len, ctx.config.systematic_max_sort_rows
        ));
        return Ok(pseudo_positions(ctx, interval, start));
    }

    let keys: Vec<OrderKey> = order_by.iter().map(OrderKey::asc).collect();
    let population = ctx.population;
    let mut ordered = ctx.eligible.clone();
    ordered.sort_by(|&a, &b| {
        let (a, b) = (&population[a], &population[b]);
        let by_columns = if keys.is_empty() {
            Ordering::Equal
        } else {
            compare_rows(&a.row, &b.row, &keys)
        };
        by_columns.then_with(|| a.id.cmp(&b.id))
    });

    let step = usize::try_from(interval).unwrap_or(usize::MAX);
    let first = usize::try_from(start - 1).unwrap_or(usize::MAX);
    Ok(ordered.into_iter().skip(first).step_by(step).collect())
}

fn pseudo_positions(ctx: &RoundContext<'_>, interval: u64, start: u64) -> Vec<usize> {
    let residue = (start - 1) % interval;
    ctx.eligible
        .iter()
        .copied()
        .filter(|&p| selection_hash(ctx.candidate(p).key(), PSEUDO_POSITION_SEED) % interval == residue)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rowvault_core::config::SamplingConfig;
    use rowvault_core::{LogicalRowId, RowData, Value};

    use super::*;
    use crate::engine::Candidate;

    fn population(n: u64) -> Vec<Candidate> {
        (0..n)
            .map(|i| {
                let mut row = RowData::new();
                row.insert("rank".into(), Value::Integer((n - i) as i64));
                Candidate::new(LogicalRowId::new("data", i), Arc::new(row))
            })
            .collect()
    }

    fn run(config: &SamplingConfig, pop: &[Candidate], interval: u64, start: u64, order_by: &[String]) -> (Vec<usize>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut ctx = RoundContext {
            config,
            population: pop,
            eligible: (0..pop.len()).collect(),
            label: "round 1".into(),
            warnings: &mut warnings,
            dry_run: false,
        };
        let picked = select(&mut ctx, interval, start, order_by).unwrap();
        (picked, warnings)
    }

    #[test]
    fn test_row_id_order_uses_numeric_indexes() {
        // data:10 sorts after data:9
        let pop = population(12);
        let (picked, _) = run(&SamplingConfig::default(), &pop, 3, 2, &[]);
        assert_eq!(picked, vec![1, 4, 7, 10]);
    }

    #[test]
    fn test_order_by_column() {
        let pop = population(10);
        let (picked, _) = run(&SamplingConfig::default(), &pop, 4, 1, &["rank".to_string()]);
        // rank ascending visits indexes 9, 8, ..., 0
        assert_eq!(picked, vec![9, 5, 1]);
    }

    #[test]
    fn test_pseudo_position_fallback() {
        let config = SamplingConfig {
            systematic_max_sort_rows: 100,
            ..Default::default()
        };
        let pop = population(1000);
        let (picked, warnings) = run(&config, &pop, 10, 1, &[]);
        assert_eq!(warnings.len(), 1);
        assert!(picked.len() > 50 && picked.len() < 150);
        let (again, _) = run(&config, &pop, 10, 1, &[]);
        assert_eq!(picked, again);
    }
}
