//! Simple random sampling.
//!
//! Seeded rounds go through [`HashSelector`] and are reproducible. Unseeded
//! rounds sample whole blocks of candidates with probability
//! `n / len × oversampling_factor`, complete the draw from the remaining
//! blocks in random order when it comes up short, then shuffle and truncate
//! to exactly `n`.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use rowvault_core::error::Result;

use crate::engine::RoundContext;
use crate::selection::HashSelector;

pub(crate) fn select(ctx: &mut RoundContext<'_>, sample_size: u64, seed: Option<u64>) -> Result<Vec<usize>> {
    match seed {
        Some(seed) => Ok(seeded(ctx, sample_size, seed)),
        None => Ok(unseeded(ctx, sample_size, &mut rand::thread_rng())),
    }
}

fn seeded(ctx: &mut RoundContext<'_>, sample_size: u64, seed: u64) -> Vec<usize> {
    let selector = HashSelector::new(ctx.config, seed);
    let draws = ctx
        .eligible
        .iter()
        .map(|&p| selector.draw(ctx.candidate(p).key(), p))
        .collect();
    let label = ctx.label.clone();
    selector.select(draws, sample_size, &label, ctx.warnings)
}

pub(crate) fn unseeded<R: Rng>(ctx: &mut RoundContext<'_>, sample_size: u64, rng: &mut R) -> Vec<usize> {
    let n = sample_size as usize;
    let eligible = &ctx.eligible;
    if n >= eligible.len() {
        return eligible.clone();
    }
    if n == 0 {
        return Vec::new();
    }

    let block_size = ctx.config.random_block_size.max(1);
    let fraction = n as f64 / eligible.len() as f64;
    let p = (fraction * ctx.config.oversampling_factor).min(1.0);

    let mut kept: Vec<usize> = Vec::with_capacity(n * 2);
    let mut skipped: Vec<&[usize]> = Vec::new();
    for block in eligible.chunks(block_size) {
        if rng.gen_bool(p) {
            kept.extend_from_slice(block);
        } else {
            skipped.push(block);
        }
    }

    if kept.len() < n {
        debug!(
            round = %ctx.label,
            kept = kept.len(),
            wanted = n,
            "Block draw short, completing from remaining blocks"
        );
        skipped.shuffle(rng);
        for block in skipped {
            if kept.len() >= n {
                break;
            }
            kept.extend_from_slice(block);
        }
    }

    kept.shuffle(rng);
    kept.truncate(n);
    kept
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use rowvault_core::config::SamplingConfig;
    use rowvault_core::{LogicalRowId, RowData};

    use super::*;
    use crate::engine::Candidate;

    fn population(n: u64) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate::new(LogicalRowId::new("data", i), Arc::new(RowData::new())))
            .collect()
    }

    #[test]
    fn test_unseeded_returns_exact_size_without_duplicates() {
        let config = SamplingConfig {
            random_block_size: 8,
            ..Default::default()
        };
        let pop = population(1000);
        let mut warnings = Vec::new();
        let mut rng = StdRng::seed_from_u64(11);
        for n in [1u64, 7, 250, 999] {
            let mut ctx = RoundContext {
                config: &config,
                population: &pop,
                eligible: (0..pop.len()).collect(),
                label: "round 1".into(),
                warnings: &mut warnings,
                dry_run: false,
            };
            let picked = unseeded(&mut ctx, n, &mut rng);
            assert_eq!(picked.len() as u64, n);
            let distinct: HashSet<_> = picked.iter().collect();
            assert_eq!(distinct.len(), picked.len());
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let config = SamplingConfig::default();
        let pop = population(200);
        let mut warnings = Vec::new();
        let mut run = |seed| {
            let mut ctx = RoundContext {
                config: &config,
                population: &pop,
                eligible: (0..pop.len()).collect(),
                label: "round 1".into(),
                warnings: &mut warnings,
                dry_run: false,
            };
            select(&mut ctx, 20, Some(seed)).unwrap()
        };
        let a = run(42);
        assert_eq!(a, run(42));
        assert_ne!(a, run(7));
    }
}
