//! Cluster sampling: choose `num_clusters` distinct values of a column, then
//! take all, a fixed count, or a percentage of each chosen cluster.
//!
//! Clusters are chosen by hashing the cluster value with the seed, so the same
//! seed picks the same clusters no matter how the rows are laid out. Null is a
//! cluster of its own.

use std::collections::{BTreeMap, HashSet};

use rowvault_core::error::Result;
use rowvault_core::Value;

use crate::engine::{Candidate, RoundContext};
use crate::round::ClusterTake;
use crate::selection::HashSelector;

fn cluster_key(candidate: &Candidate, column: &str) -> String {
    candidate.row.get(column).unwrap_or(&Value::Null).group_key()
}

/// Number of distinct cluster values among the eligible candidates
pub(crate) fn distinct_clusters(population: &[Candidate], eligible: &[usize], column: &str) -> u64 {
    eligible
        .iter()
        .map(|&p| cluster_key(&population[p], column))
        .collect::<HashSet<_>>()
        .len() as u64
}

fn take_count(take: ClusterTake, cluster_len: u64) -> u64 {
    match take {
        ClusterTake::All => cluster_len,
        ClusterTake::Count(n) => n.min(cluster_len),
        ClusterTake::Percent(p) => ((cluster_len as f64 * p / 100.0).ceil() as u64).min(cluster_len),
    }
}

pub(crate) fn select(
    ctx: &mut RoundContext<'_>,
    column: &str,
    num_clusters: u64,
    take: ClusterTake,
    seed: Option<u64>,
) -> Result<Vec<usize>> {
    let seed = seed.unwrap_or_else(rand::random);
    let mut clusters: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for &position in &ctx.eligible {
        clusters
            .entry(cluster_key(ctx.candidate(position), column))
            .or_default()
            .push(position);
    }
    let clusters: Vec<(String, Vec<usize>)> = clusters.into_iter().collect();

    let selector = HashSelector::new(ctx.config, seed);
    let cluster_draws = clusters
        .iter()
        .enumerate()
        .map(|(i, (key, _))| selector.draw(key, i))
        .collect();
    let label = ctx.label.clone();
    let chosen = selector.select(cluster_draws, num_clusters, &format!("{} clusters", label), ctx.warnings);

    tracing::debug!(
        round = %label,
        distinct = clusters.len(),
        chosen = chosen.len(),
        "Clusters chosen"
    );

    let mut picked = Vec::new();
    for index in chosen {
        let (key, members) = &clusters[index];
        let wanted = take_count(take, members.len() as u64);
        if wanted as usize == members.len() {
            picked.extend_from_slice(members);
            continue;
        }
        let draws = members
            .iter()
            .map(|&p| selector.draw(ctx.population[p].key(), p))
            .collect();
        picked.extend(selector.select(draws, wanted, &format!("{} cluster {}", label, key), ctx.warnings));
    }
    Ok(picked)
}
