//! Two-phase stratified sampling.
//!
//! ```text
//!   phase 1: hash sub-sample (estimation_fraction, at least min_estimation_rows)
//!            ──> group by strata columns ──> per-stratum share
//!                                             │ cardinality guard (max_strata)
//!                                             │ drop strata under min_stratum_sample_count
//!                                             ▼
//!   phase 2: allocation = max(min_per_stratum, ceil(share × sample_size))  or  Fixed(k)
//!            ──> seeded hash selection inside each stratum
//! ```
//!
//! Ceil allocation means a round can return up to one extra row per stratum
//! over `sample_size`. A stratum smaller than its allocation contributes
//! every row it has and a warning.

use std::collections::BTreeMap;

use rowvault_core::config::SamplingConfig;
use rowvault_core::crypto::{selection_hash, selection_threshold};
use rowvault_core::error::{Error, Result};
use rowvault_core::{RowData, Value};

use crate::engine::{Candidate, RoundContext};
use crate::round::Allocation;
use crate::selection::HashSelector;

/// Seed for the phase 1 sub-sample; fixed so preflight and execution agree
const ESTIMATION_SEED: u64 = 0x5354_5241_5441;

const KEY_SEPARATOR: char = '\u{1f}';

struct StratumEstimate {
    label: String,
    sampled: u64,
}

struct Estimate {
    fraction: f64,
    strata: BTreeMap<String, StratumEstimate>,
}

fn stratum_key(row: &RowData, columns: &[String]) -> String {
    let mut key = String::new();
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(&row.get(column).unwrap_or(&Value::Null).group_key());
    }
    key
}

fn stratum_label(row: &RowData, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("{}={}", c, row.get(c).unwrap_or(&Value::Null)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn estimation_fraction(config: &SamplingConfig, eligible: usize) -> f64 {
    if eligible == 0 {
        return 1.0;
    }
    let floor = (config.min_estimation_rows as f64 / eligible as f64).min(1.0);
    config.estimation_fraction.max(floor)
}

fn estimate(
    config: &SamplingConfig,
    population: &[Candidate],
    eligible: &[usize],
    columns: &[String],
) -> Result<Estimate> {
    let fraction = estimation_fraction(config, eligible.len());
    let threshold = selection_threshold(fraction);
    let mut strata: BTreeMap<String, StratumEstimate> = BTreeMap::new();

    for &position in eligible {
        let candidate = &population[position];
        if fraction < 1.0 && selection_hash(candidate.key(), ESTIMATION_SEED) >= threshold {
            continue;
        }
        let key = stratum_key(&candidate.row, columns);
        if let Some(stratum) = strata.get_mut(&key) {
            stratum.sampled += 1;
            continue;
        }
        if strata.len() as u64 >= config.max_strata {
            return Err(Error::capacity(
                format!(
                    "stratifying on [{}] yields more than {} strata",
                    columns.join(", "),
                    config.max_strata
                ),
                config.max_strata,
            ));
        }
        strata.insert(
            key,
            StratumEstimate {
                label: stratum_label(&candidate.row, columns),
                sampled: 1,
            },
        );
    }

    Ok(Estimate { fraction, strata })
}

/// Reject stratification whose estimated stratum count exceeds `max_strata`
pub(crate) fn check_cardinality(
    config: &SamplingConfig,
    population: &[Candidate],
    eligible: &[usize],
    columns: &[String],
) -> Result<()> {
    estimate(config, population, eligible, columns).map(|_| ())
}

fn ceil_share(count: u64, sample_size: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    let wanted = (count as u128 * sample_size as u128 + total as u128 - 1) / total as u128;
    wanted.min(u64::MAX as u128) as u64
}

pub(crate) fn select(
    ctx: &mut RoundContext<'_>,
    sample_size: u64,
    columns: &[String],
    seed: Option<u64>,
    allocation: Allocation,
    min_per_stratum: u64,
) -> Result<Vec<usize>> {
    let seed = seed.unwrap_or_else(rand::random);
    let mut estimate = estimate(ctx.config, ctx.population, &ctx.eligible, columns)?;

    let min_sampled = ctx.config.min_stratum_sample_count;
    let dropped: Vec<String> = estimate
        .strata
        .iter()
        .filter(|(_, s)| s.sampled < min_sampled)
        .map(|(k, _)| k.clone())
        .collect();
    for key in dropped {
        if let Some(stratum) = estimate.strata.remove(&key) {
            ctx.warn(format!(
                "dropped stratum ({}): {} estimation rows, below the minimum of {}",
                stratum.label, stratum.sampled, min_sampled
            ));
        }
    }

    let mut members: BTreeMap<&str, Vec<usize>> = estimate
        .strata
        .keys()
        .map(|k| (k.as_str(), Vec::new()))
        .collect();
    for &position in &ctx.eligible {
        let key = stratum_key(&ctx.candidate(position).row, columns);
        if let Some(list) = members.get_mut(key.as_str()) {
            list.push(position);
        }
    }

    let total_sampled: u64 = estimate.strata.values().map(|s| s.sampled).sum();
    tracing::debug!(
        round = %ctx.label,
        strata = estimate.strata.len(),
        estimation_fraction = estimate.fraction,
        "Strata estimated"
    );

    let selector = HashSelector::new(ctx.config, seed);
    let mut picked = Vec::new();
    for (key, positions) in members {
        let stratum = &estimate.strata[key];
        let wanted = match allocation {
            Allocation::Proportional => {
                ceil_share(stratum.sampled, sample_size, total_sampled).max(min_per_stratum)
            }
            Allocation::Fixed(count) => count,
        };
        let available = positions.len() as u64;
        if wanted > available {
            ctx.warn(format!(
                "stratum ({}) allocated {} rows but only {} are available",
                stratum.label, wanted, available
            ));
        }
        let draws = positions
            .iter()
            .map(|&p| selector.draw(ctx.population[p].key(), p))
            .collect();
        let label = format!("{} stratum ({})", ctx.label, stratum.label);
        picked.extend(selector.select(draws, wanted, &label, ctx.warnings));
    }
    Ok(picked)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rowvault_core::LogicalRowId;

    use super::*;

    fn population(groups: &[(&str, u64)]) -> Vec<Candidate> {
        let mut out = Vec::new();
        let mut index = 0;
        for (group, count) in groups {
            for _ in 0..*count {
                let mut row = RowData::new();
                row.insert("group".into(), Value::Text(group.to_string()));
                out.push(Candidate::new(LogicalRowId::new("data", index), Arc::new(row)));
                index += 1;
            }
        }
        out
    }

    fn run(
        config: &SamplingConfig,
        pop: &[Candidate],
        size: u64,
        allocation: Allocation,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<usize>> {
        let mut ctx = RoundContext {
            config,
            population: pop,
            eligible: (0..pop.len()).collect(),
            label: "round 1".into(),
            warnings,
            dry_run: false,
        };
        select(&mut ctx, size, &["group".to_string()], Some(42), allocation, 1)
    }

    #[test]
    fn test_ceil_share() {
        assert_eq!(ceil_share(80, 10, 100), 8);
        assert_eq!(ceil_share(1, 10, 100), 1);
        assert_eq!(ceil_share(0, 10, 100), 0);
        assert_eq!(ceil_share(5, 10, 0), 0);
    }

    #[test]
    fn test_fixed_allocation_and_short_stratum_warning() {
        let config = SamplingConfig::default();
        let pop = population(&[("a", 50), ("b", 3)]);
        let mut warnings = Vec::new();
        let picked = run(&config, &pop, 10, Allocation::Fixed(5), &mut warnings).unwrap();
        assert_eq!(picked.len(), 8);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("group=b"));
    }

    #[test]
    fn test_cardinality_guard() {
        let config = SamplingConfig {
            max_strata: 2,
            ..Default::default()
        };
        let pop = population(&[("a", 5), ("b", 5), ("c", 5)]);
        let err = check_cardinality(&config, &pop, &[0, 5, 10], &["group".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Capacity { limit: 2, .. }));
    }

    #[test]
    fn test_small_strata_dropped_with_warning() {
        let config = SamplingConfig {
            min_stratum_sample_count: 5,
            ..Default::default()
        };
        let pop = population(&[("a", 40), ("b", 2)]);
        let mut warnings = Vec::new();
        let picked = run(&config, &pop, 10, Allocation::Proportional, &mut warnings).unwrap();
        assert!(picked.iter().all(|&p| p < 40));
        assert!(warnings.iter().any(|w| w.contains("dropped stratum (group=b)")));
    }
}
