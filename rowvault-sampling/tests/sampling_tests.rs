//! Sampling engine scenarios

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use proptest::prelude::*;

use rowvault_core::config::{FilterLimits, SamplingConfig};
use rowvault_core::error::Error;
use rowvault_core::{ColumnDef, ColumnType, LogicalRowId, RowData, Schema, Value};
use rowvault_sampling::{
    Allocation, CancelToken, Candidate, ClusterTake, FilterSpec, OrderKey, Projection,
    RoundConfig, RoundMethod, SamplingEngine, SamplingOutcome, SamplingPlan, METHOD_COLUMN,
    ROUND_COLUMN,
};

fn schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("id", ColumnType::Integer).required(),
        ColumnDef::new("region", ColumnType::Text),
        ColumnDef::new("score", ColumnType::Float),
    ])
    .unwrap()
}

/// Rows `data:0..n`; the first `a_rows` are region A, the rest region B
fn create_test_population(n: u64, a_rows: u64) -> Vec<Candidate> {
    (0..n)
        .map(|i| {
            let mut row = RowData::new();
            row.insert("id".into(), Value::Integer(i as i64));
            let region = if i < a_rows { "A" } else { "B" };
            row.insert("region".into(), Value::Text(region.into()));
            row.insert("score".into(), Value::Float((i % 7) as f64));
            Candidate::new(LogicalRowId::new("data", i), Arc::new(row))
        })
        .collect()
}

fn plan(rounds: &[RoundConfig], residual: bool) -> SamplingPlan {
    SamplingPlan::compile(rounds, &schema(), &FilterLimits::default(), residual).unwrap()
}

fn run(rounds: &[RoundConfig], population: &[Candidate], residual: bool) -> SamplingOutcome {
    SamplingEngine::new(SamplingConfig::default())
        .execute(&plan(rounds, residual), population, &CancelToken::default())
        .unwrap()
}

fn ids(outcome: &SamplingOutcome) -> BTreeSet<LogicalRowId> {
    outcome.selected.iter().map(|s| s.id.clone()).collect()
}

fn random(round: u32, sample_size: u64, seed: Option<u64>) -> RoundConfig {
    RoundConfig::new(round, RoundMethod::Random { sample_size, seed })
}

fn stratified(round: u32, sample_size: u64, seed: u64) -> RoundConfig {
    RoundConfig::new(
        round,
        RoundMethod::Stratified {
            sample_size,
            strata_columns: vec!["region".into()],
            seed: Some(seed),
            allocation: Allocation::Proportional,
            min_per_stratum: 1,
        },
    )
}

#[test]
fn test_scenario_a_seeded_random() {
    let population = create_test_population(100, 50);
    let first = run(&[random(1, 10, Some(42))], &population, false);
    let again = run(&[random(1, 10, Some(42))], &population, false);
    let other = run(&[random(1, 10, Some(7))], &population, false);

    assert_eq!(first.selected.len(), 10);
    assert_eq!(ids(&first).len(), 10);
    assert_eq!(ids(&first), ids(&again));
    assert_ne!(ids(&first), ids(&other));
}

#[test]
fn test_scenario_b_proportional_strata() {
    let population = create_test_population(100, 80);
    let outcome = run(&[stratified(1, 10, 42)], &population, false);

    let mut per_region: HashMap<String, usize> = HashMap::new();
    for row in &outcome.selected {
        let region = row.row["region"].as_text().unwrap().to_string();
        *per_region.entry(region).or_default() += 1;
    }
    assert_eq!(per_region["A"], 8);
    assert_eq!(per_region["B"], 2);
}

#[test]
fn test_scenario_c_systematic_positions() {
    let population = create_test_population(20, 20);
    let round = RoundConfig::new(
        1,
        RoundMethod::Systematic {
            interval: 5,
            start: 1,
            order_by: vec![],
        },
    );
    let outcome = run(&[round], &population, false);
    let picked: Vec<u64> = outcome.selected.iter().map(|s| s.id.index).collect();
    // ordinal positions 1, 6, 11, 16
    assert_eq!(picked, vec![0, 5, 10, 15]);
}

#[test]
fn test_scenario_d_rounds_never_overlap() {
    let population = create_test_population(100, 50);
    let outcome = run(&[random(1, 5, None), random(2, 5, Some(42))], &population, false);

    assert_eq!(outcome.selected.len(), 10);
    assert_eq!(ids(&outcome).len(), 10);
    assert_eq!(outcome.rounds[0].candidates, 100);
    assert_eq!(outcome.rounds[1].candidates, 95);
}

#[test]
fn test_scenario_e_capacity_names_available_count() {
    let population = create_test_population(100, 80);
    let round = random(1, 50, Some(1)).with_filter(FilterSpec::Text("region = 'B'".into()));
    let engine = SamplingEngine::new(SamplingConfig::default());
    let err = engine
        .execute(&plan(&[round], false), &population, &CancelToken::default())
        .unwrap_err();
    match err {
        Error::Capacity { limit, message } => {
            assert_eq!(limit, 20);
            assert!(message.contains("20"));
        }
        other => panic!("expected capacity error, got {:?}", other),
    }
}

#[test]
fn test_preflight_carries_exclusions_between_rounds() {
    let population = create_test_population(100, 50);
    let engine = SamplingEngine::new(SamplingConfig::default());

    // Each round fits the population on its own; together they do not
    for round in [random(1, 90, Some(1)), random(2, 20, Some(2))] {
        engine.preflight(&plan(&[round], false), &population).unwrap();
    }
    let p = plan(&[random(1, 90, Some(1)), random(2, 20, Some(2))], false);
    let err = engine.preflight(&p, &population).unwrap_err();
    match err {
        Error::Capacity { limit, message } => {
            assert_eq!(limit, 10);
            assert!(message.starts_with("round 2"));
        }
        other => panic!("expected capacity error, got {:?}", other),
    }

    let fits = plan(&[random(1, 90, Some(1)), random(2, 10, Some(2))], false);
    engine.preflight(&fits, &population).unwrap();
}

#[test]
fn test_sample_and_residual_partition_population() {
    let population = create_test_population(300, 120);
    let rounds = vec![
        stratified(1, 30, 9),
        RoundConfig::new(
            2,
            RoundMethod::Cluster {
                cluster_column: "score".into(),
                num_clusters: 2,
                take: ClusterTake::Percent(50.0),
                seed: Some(4),
            },
        ),
        RoundConfig::new(
            3,
            RoundMethod::Systematic {
                interval: 10,
                start: 3,
                order_by: vec!["score".into()],
            },
        )
        .with_filter(FilterSpec::Text("region = 'A' OR score >= 5".into())),
        random(4, 12, None),
    ];
    let outcome = run(&rounds, &population, true);

    let selected = ids(&outcome);
    assert_eq!(selected.len(), outcome.selected.len(), "rounds overlap");

    let residual: BTreeSet<LogicalRowId> =
        outcome.residual.clone().unwrap().into_iter().collect();
    assert!(selected.is_disjoint(&residual));
    let all: BTreeSet<LogicalRowId> = population.iter().map(|c| c.id.clone()).collect();
    let union: BTreeSet<LogicalRowId> = selected.union(&residual).cloned().collect();
    assert_eq!(union, all);

    let per_round: u64 = outcome.rounds.iter().map(|r| r.selected).sum();
    assert_eq!(per_round as usize, outcome.selected.len());
}

#[test]
fn test_projection_and_tags() {
    let population = create_test_population(50, 25);
    let round = random(1, 10, Some(5)).with_projection(Projection {
        columns: Some(vec!["id".into(), "score".into()]),
        order_by: vec![OrderKey::desc("score"), OrderKey::asc("id")],
    });
    let outcome = run(&[round], &population, false);

    let scores: Vec<f64> = outcome
        .selected
        .iter()
        .map(|s| match s.row["score"] {
            Value::Float(f) => f,
            ref other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));

    let tagged = outcome.selected[0].tagged_row();
    assert!(!tagged.contains_key("region"));
    assert_eq!(tagged[ROUND_COLUMN], Value::Integer(1));
    assert_eq!(tagged[METHOD_COLUMN], Value::Text("random".into()));
}

#[test]
fn test_cancelled_token_stops_execution() {
    let population = create_test_population(10, 5);
    let token = CancelToken::new("job-7");
    token.cancel();
    let err = SamplingEngine::new(SamplingConfig::default())
        .execute(&plan(&[random(1, 2, Some(1))], false), &population, &token)
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_seeded_rounds_are_deterministic(seed in any::<u64>(), size in 1u64..60) {
        let population = create_test_population(200, 130);
        let rounds = vec![random(1, size, Some(seed)), stratified(2, size, seed)];
        let first = run(&rounds, &population, true);
        let second = run(&rounds, &population, true);

        prop_assert_eq!(ids(&first), ids(&second));
        prop_assert_eq!(first.residual, second.residual);
        prop_assert_eq!(first.rounds[0].selected, size);
    }
}
