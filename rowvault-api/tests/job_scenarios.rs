//! # End-to-end sampling job scenarios
//!
//! Each test builds a small dataset, commits it on `main`, and drives sampling
//! jobs through the orchestrator:
//! 1. Multi-round job with residual export
//! 2. Synchronous rejection (validation, capacity, permissions)
//! 3. Failure and cancellation leave no output ref
//! 4. Background worker with concurrent jobs on one output branch
//! 5. On-disk row store

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use rowvault_api::{
    AllowAll, CommitRequest, InMemoryJobQueue, Orchestrator, OutputTable, Repository,
    SamplingJobRequest, SamplingParameters, StaticPermissions,
};
use rowvault_core::config::{Config, StorageConfig};
use rowvault_core::error::Error;
use rowvault_core::traits::PermissionLevel;
use rowvault_core::{
    ColumnDef, ColumnType, DatasetId, JobId, JobStatus, LogicalRowId, Manifest, ManifestDelta,
    RowData, Schema, Value,
};
use rowvault_sampling::{
    Allocation, FilterSpec, OrderKey, Projection, RoundConfig, RoundMethod, METHOD_COLUMN,
    ROUND_COLUMN,
};

fn people_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("id", ColumnType::Integer).required(),
        ColumnDef::new("region", ColumnType::Text),
        ColumnDef::new("age", ColumnType::Integer),
    ])
    .unwrap()
}

fn person(i: i64) -> RowData {
    let mut row = RowData::new();
    row.insert("id".into(), Value::Integer(i));
    let region = ["north", "south", "east", "west"][(i % 4) as usize];
    row.insert("region".into(), Value::Text(region.into()));
    row.insert("age".into(), Value::Integer(18 + (i * 7) % 60));
    row
}

/// Dataset with `rows` people committed on `main` as table `people`
async fn create_test_dataset(repo: &Repository, rows: i64) -> DatasetId {
    let ds = repo.create_dataset("people", "alice").unwrap();
    let hashes = repo
        .put_rows(&people_schema(), (0..rows).map(person).collect())
        .await
        .unwrap();
    let manifest: Manifest = hashes
        .into_iter()
        .enumerate()
        .map(|(i, h)| (LogicalRowId::new("people", i as u64), h))
        .collect();
    repo.commit(
        CommitRequest::on_branch(ds.id, "main", None, ManifestDelta::Replace(manifest), "import", "alice")
            .with_schemas(BTreeMap::from([("people".to_string(), people_schema())])),
    )
    .await
    .unwrap();
    ds.id
}

fn create_test_orchestrator(repo: Arc<Repository>) -> Orchestrator {
    Orchestrator::new(repo, Arc::new(InMemoryJobQueue::new()), Arc::new(AllowAll), Config::default())
}

fn request(ds: DatasetId, rounds: Vec<RoundConfig>, export_residual: bool) -> SamplingJobRequest {
    SamplingJobRequest {
        dataset_id: ds,
        source_ref: "main".into(),
        requested_by: "alice".into(),
        parameters: SamplingParameters {
            table_key: "people".into(),
            rounds,
            export_residual,
            output_name: Some("study".into()),
        },
    }
}

fn random(round: u32, sample_size: u64, seed: u64) -> RoundConfig {
    RoundConfig::new(round, RoundMethod::Random { sample_size, seed: Some(seed) })
}

async fn all_rows(orchestrator: &Orchestrator, job: JobId, table: OutputTable) -> Vec<RowData> {
    let mut rows = Vec::new();
    let mut offset = 0;
    loop {
        let page = orchestrator
            .get_job_output("alice", job, table, offset, 7, None)
            .await
            .unwrap();
        offset += page.rows.len() as u64;
        rows.extend(page.rows.into_iter().map(|r| r.data));
        if !page.has_more {
            return rows;
        }
    }
}

// ============================================================================
// SCENARIO 1: Multi-round job with residual
// ============================================================================

#[tokio::test]
async fn test_multi_round_job_publishes_sample_and_residual() {
    let repo = Arc::new(Repository::in_memory());
    let ds = create_test_dataset(&repo, 200).await;
    let orchestrator = create_test_orchestrator(Arc::clone(&repo));

    let rounds = vec![
        RoundConfig::new(
            1,
            RoundMethod::Stratified {
                sample_size: 20,
                strata_columns: vec!["region".into()],
                seed: Some(42),
                allocation: Allocation::Proportional,
                min_per_stratum: 1,
            },
        )
        .with_filter(FilterSpec::Text("age >= 30".into())),
        random(2, 15, 7).with_projection(Projection {
            columns: Some(vec!["id".into(), "age".into()]),
            order_by: vec![OrderKey::desc("age")],
        }),
    ];
    let job_id = orchestrator
        .create_sampling_job(request(ds, rounds, true))
        .await
        .unwrap();
    assert_eq!(orchestrator.get_job("alice", job_id).await.unwrap().status, JobStatus::Pending);

    assert_eq!(orchestrator.run_next().await.unwrap(), Some(job_id));
    let job = orchestrator.get_job("alice", job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    assert!(job.source_commit_id.is_some());
    assert_eq!(job.progress.rounds_completed, 2);
    assert!(job.started_at.is_some() && job.finished_at.is_some());

    let summary = job.output_summary.unwrap();
    assert_eq!(summary.output_ref.as_deref(), Some("samples/study"));
    assert_eq!(summary.rounds.len(), 2);
    assert_eq!(summary.rounds[1].selected, 15);
    assert_eq!(summary.sample_count + summary.residual_count.unwrap(), 200);
    assert_eq!(
        repo.resolve(ds, "samples/study").unwrap(),
        summary.output_commit_id.unwrap()
    );

    let sample = all_rows(&orchestrator, job_id, OutputTable::Sample).await;
    let residual = all_rows(&orchestrator, job_id, OutputTable::Residual).await;
    assert_eq!(sample.len() as u64, summary.sample_count);

    let ids = |rows: &[RowData]| -> BTreeSet<i64> {
        rows.iter()
            .map(|r| match r["id"] {
                Value::Integer(i) => i,
                ref other => panic!("bad id {:?}", other),
            })
            .collect()
    };
    let sampled = ids(&sample);
    let left = ids(&residual);
    assert_eq!(sampled.len(), sample.len(), "duplicate across rounds");
    assert!(sampled.is_disjoint(&left));
    assert_eq!(sampled.union(&left).count(), 200);

    for row in &sample {
        let round = &row[ROUND_COLUMN];
        match round {
            Value::Integer(1) => {
                assert_eq!(row[METHOD_COLUMN], Value::Text("stratified".into()));
                assert!(matches!(row["age"], Value::Integer(a) if a >= 30));
            }
            Value::Integer(2) => {
                assert_eq!(row[METHOD_COLUMN], Value::Text("random".into()));
                assert!(!row.contains_key("region"));
            }
            other => panic!("unexpected round {:?}", other),
        }
    }
}

// ============================================================================
// SCENARIO 2: Synchronous rejection
// ============================================================================

#[tokio::test]
async fn test_invalid_requests_never_become_jobs() {
    let repo = Arc::new(Repository::in_memory());
    let ds = create_test_dataset(&repo, 50).await;
    let orchestrator = create_test_orchestrator(Arc::clone(&repo));

    let unknown_column = random(1, 5, 1).with_filter(FilterSpec::Text("salary > 10".into()));
    let err = orchestrator
        .create_sampling_job(request(ds, vec![unknown_column], false))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    let zero = random(1, 0, 1);
    assert!(matches!(
        orchestrator.create_sampling_job(request(ds, vec![zero], false)).await,
        Err(Error::Validation { .. })
    ));

    let too_big = random(1, 30, 1).with_filter(FilterSpec::Text("region = 'north'".into()));
    match orchestrator.create_sampling_job(request(ds, vec![too_big], false)).await {
        Err(Error::Capacity { limit, .. }) => assert_eq!(limit, 13),
        other => panic!("expected capacity error, got {:?}", other),
    }

    // 30 + 30 of 50 rows: the second round only sees the 20 left over
    let overlapping = vec![random(1, 30, 1), random(2, 30, 2)];
    match orchestrator.create_sampling_job(request(ds, overlapping, false)).await {
        Err(Error::Capacity { limit, message }) => {
            assert_eq!(limit, 20);
            assert!(message.starts_with("round 2"));
        }
        other => panic!("expected capacity error, got {:?}", other),
    }

    let mut missing_ref = request(ds, vec![random(1, 5, 1)], false);
    missing_ref.source_ref = "nope".into();
    assert!(matches!(
        orchestrator.create_sampling_job(missing_ref).await,
        Err(Error::NotFound { kind: "ref", .. })
    ));

    assert!(orchestrator.list_jobs("alice", ds).await.unwrap().is_empty());
    assert!(orchestrator.run_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_permission_gate_is_checked() {
    let repo = Arc::new(Repository::in_memory());
    let ds = create_test_dataset(&repo, 20).await;
    let gate = Arc::new(StaticPermissions::new());
    gate.grant("reader", ds, PermissionLevel::Read);
    gate.grant("alice", ds, PermissionLevel::Write);
    let orchestrator = Orchestrator::new(
        Arc::clone(&repo),
        Arc::new(InMemoryJobQueue::new()),
        gate,
        Config::default(),
    );

    let mut req = request(ds, vec![random(1, 3, 1)], false);
    req.requested_by = "reader".into();
    assert!(matches!(
        orchestrator.create_sampling_job(req).await,
        Err(Error::PermissionDenied { .. })
    ));

    let id = orchestrator
        .create_sampling_job(request(ds, vec![random(1, 3, 1)], false))
        .await
        .unwrap();
    assert!(orchestrator.get_job("reader", id).await.is_ok());
    assert!(matches!(
        orchestrator.get_job("mallory", id).await,
        Err(Error::PermissionDenied { .. })
    ));
}

// ============================================================================
// SCENARIO 3: Failure and cancellation
// ============================================================================

#[tokio::test]
async fn test_failed_job_publishes_nothing() {
    let repo = Arc::new(Repository::in_memory());
    let ds = create_test_dataset(&repo, 30).await;
    let orchestrator = create_test_orchestrator(Arc::clone(&repo));

    let job_id = orchestrator
        .create_sampling_job(request(ds, vec![random(1, 25, 3)], true))
        .await
        .unwrap();

    // main moves on to a version with fewer rows before the job runs
    let head = repo.resolve(ds, "main").unwrap();
    let removals = (0..10).map(|i| LogicalRowId::new("people", i)).collect();
    repo.commit(CommitRequest::on_branch(
        ds,
        "main",
        Some(head),
        ManifestDelta::Patch { upserts: vec![], removals },
        "trim",
        "bob",
    ))
    .await
    .unwrap();

    orchestrator.run_next().await.unwrap();
    let job = orchestrator.get_job("alice", job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("20 rows available"));
    assert!(repo.resolve(ds, "samples/study").is_err());

    let output = orchestrator
        .get_job_output("alice", job_id, OutputTable::Sample, 0, 10, None)
        .await;
    assert!(matches!(output, Err(Error::Validation { .. })));
}

#[tokio::test]
async fn test_cancelled_job_fails_before_writing() {
    let repo = Arc::new(Repository::in_memory());
    let ds = create_test_dataset(&repo, 30).await;
    let orchestrator = create_test_orchestrator(Arc::clone(&repo));

    let job_id = orchestrator
        .create_sampling_job(request(ds, vec![random(1, 5, 3), random(2, 5, 4)], false))
        .await
        .unwrap();
    orchestrator.cancel("alice", job_id).await.unwrap();
    orchestrator.run_next().await.unwrap();

    let job = orchestrator.get_job("alice", job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("cancelled"));
    assert!(repo.resolve(ds, "samples/study").is_err());

    // terminal jobs cannot be cancelled again
    assert!(orchestrator.cancel("alice", job_id).await.is_err());
}

// ============================================================================
// SCENARIO 4: Background worker
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_runs_concurrent_jobs_onto_one_branch() {
    let repo = Arc::new(Repository::in_memory());
    let ds = create_test_dataset(&repo, 100).await;
    let mut config = Config::default();
    config.jobs.poll_interval_ms = 10;
    config.jobs.max_ref_retries = 10;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&repo),
        Arc::new(InMemoryJobQueue::new()),
        Arc::new(AllowAll),
        config,
    ));

    let mut ids = Vec::new();
    for seed in 0..4 {
        ids.push(
            orchestrator
                .create_sampling_job(request(ds, vec![random(1, 10, seed)], false))
                .await
                .unwrap(),
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(Arc::clone(&orchestrator).run_worker(shutdown_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut done = 0;
        for id in &ids {
            if orchestrator.get_job("alice", *id).await.unwrap().status.is_terminal() {
                done += 1;
            }
        }
        if done == ids.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    shutdown_tx.send(true).unwrap();
    worker.await.unwrap().unwrap();

    let mut outputs = BTreeSet::new();
    for id in &ids {
        let job = orchestrator.get_job("alice", *id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
        outputs.insert(job.output_summary.unwrap().output_commit_id.unwrap());
    }

    // Every output commit is on the branch's single-parent history
    let head = repo.resolve(ds, "samples/study").unwrap();
    let history: BTreeSet<_> = repo
        .log(&head, 10)
        .unwrap()
        .iter()
        .map(|c| c.commit_id)
        .collect();
    assert!(outputs.is_subset(&history));
}

// ============================================================================
// SCENARIO 5: On-disk row store
// ============================================================================

#[tokio::test]
async fn test_job_over_disk_row_store() {
    let tmp = TempDir::new().unwrap();
    let storage = StorageConfig {
        data_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let repo = Arc::new(Repository::open(&storage).await.unwrap());
    let ds = create_test_dataset(&repo, 40).await;
    let orchestrator = create_test_orchestrator(Arc::clone(&repo));

    let systematic = RoundConfig::new(
        1,
        RoundMethod::Systematic {
            interval: 10,
            start: 1,
            order_by: vec![],
        },
    );
    let job_id = orchestrator
        .create_sampling_job(request(ds, vec![systematic], true))
        .await
        .unwrap();
    orchestrator.run_next().await.unwrap();

    let sample = all_rows(&orchestrator, job_id, OutputTable::Sample).await;
    let picked: Vec<Value> = sample.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(
        picked,
        vec![Value::Integer(0), Value::Integer(10), Value::Integer(20), Value::Integer(30)]
    );

    // Residual rows are the source rows themselves, so nothing new was stored for them
    let stats = repo.row_store().stats().await.unwrap();
    assert_eq!(stats.row_count, 44);
}
