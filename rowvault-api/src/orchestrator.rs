//! # Job Orchestrator
//!
//! Turns sampling requests into jobs and jobs into output commits.
//!
//! ```text
//!   create_sampling_job ── permission, dataset, rounds, capacity preflight ──> queue (Pending)
//!
//!   worker: claim (Running)
//!     │  resolve source ref once (snapshot for the whole job)
//!     │  load table ──> SamplingEngine (blocking thread, cancel checked per round)
//!     ▼
//!   write phase: put sample rows ──> create commit ──> CAS output branch (bounded retries)
//!     │
//!     └──> Completed(summary)       any error ──> Failed(message), no ref moved
//! ```
//!
//! Validation and capacity errors surface synchronously from
//! `create_sampling_job`; everything after that surfaces only through the
//! job's terminal state.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{error, info, info_span, warn, Instrument};

use rowvault_core::config::{Config, JobConfig};
use rowvault_core::error::{Error, Result, ResultExt};
use rowvault_core::metrics::{Metrics, Timer};
use rowvault_core::traits::{JobQueue, PermissionGate, PermissionLevel};
use rowvault_core::utils::{validate_ref_name, validate_table_key};
use rowvault_core::{
    CommitId, DatasetId, Job, JobId, JobProgress, JobStatus, JobSummary, LogicalRowId, Manifest,
    ManifestDelta, RunType, Schema, StatusDetail,
};
use rowvault_sampling::{CancelToken, Candidate, RoundConfig, SamplingEngine, SamplingOutcome, SamplingPlan};

use crate::repository::{CommitRequest, OutputPage, Repository};

/// Table holding sampled rows in an output commit
pub const SAMPLE_TABLE: &str = "sample";
/// Table holding unselected rows in an output commit
pub const RESIDUAL_TABLE: &str = "residual";

/// Sampling parameters stored on the job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParameters {
    pub table_key: String,
    pub rounds: Vec<RoundConfig>,
    #[serde(default)]
    pub export_residual: bool,
    /// Output branch suffix; defaults to `job-<id>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SamplingJobRequest {
    pub dataset_id: DatasetId,
    pub source_ref: String,
    pub requested_by: String,
    pub parameters: SamplingParameters,
}

/// Which output table to page through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTable {
    Sample,
    Residual,
}

impl OutputTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputTable::Sample => SAMPLE_TABLE,
            OutputTable::Residual => RESIDUAL_TABLE,
        }
    }
}

pub struct Orchestrator {
    repo: Arc<Repository>,
    queue: Arc<dyn JobQueue>,
    permissions: Arc<dyn PermissionGate>,
    engine: Arc<SamplingEngine>,
    config: Config,
    cancels: DashMap<JobId, CancelToken>,
    metrics: Metrics,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<Repository>,
        queue: Arc<dyn JobQueue>,
        permissions: Arc<dyn PermissionGate>,
        config: Config,
    ) -> Self {
        let metrics = repo.metrics().clone();
        Self {
            repo,
            queue,
            permissions,
            engine: Arc::new(SamplingEngine::new(config.sampling.clone())),
            config,
            cancels: DashMap::new(),
            metrics,
        }
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    fn job_config(&self) -> &JobConfig {
        &self.config.jobs
    }

    async fn require(&self, user: &str, dataset_id: DatasetId, level: PermissionLevel) -> Result<()> {
        if self.permissions.has_permission(user, dataset_id, level).await? {
            Ok(())
        } else {
            Err(Error::PermissionDenied {
                reason: format!("{} lacks {:?} access to dataset {}", user, level, dataset_id),
            })
        }
    }

    fn output_ref(&self, job_id: JobId, parameters: &SamplingParameters) -> String {
        let name = parameters
            .output_name
            .clone()
            .unwrap_or_else(|| format!("job-{}", job_id));
        format!("{}{}", self.job_config().output_ref_prefix, name)
    }

    fn compile_plan(&self, schema: &Schema, parameters: &SamplingParameters) -> Result<SamplingPlan> {
        SamplingPlan::compile(
            &parameters.rounds,
            schema,
            &self.config.filter,
            parameters.export_residual,
        )
    }

    async fn load_population(&self, commit_id: &CommitId, table_key: &str) -> Result<Vec<Candidate>> {
        Ok(self
            .repo
            .load_table(commit_id, table_key)
            .await?
            .into_iter()
            .map(|(id, row)| Candidate::new(id, row))
            .collect())
    }

    // ========== Job creation ==========

    /// Validate a request and enqueue it as a pending job
    pub async fn create_sampling_job(&self, request: SamplingJobRequest) -> Result<JobId> {
        let SamplingJobRequest {
            dataset_id,
            source_ref,
            requested_by,
            parameters,
        } = request;

        self.require(&requested_by, dataset_id, PermissionLevel::Write).await?;
        self.repo.get_dataset(dataset_id)?;
        validate_table_key(&parameters.table_key)?;
        if let Some(name) = &parameters.output_name {
            validate_ref_name(&format!("{}{}", self.job_config().output_ref_prefix, name))?;
        }

        let source_commit = self.repo.resolve(dataset_id, &source_ref)?;
        let commit = self.repo.get_commit(&source_commit)?;
        let schema = commit.schema(&parameters.table_key)?;
        let plan = self.compile_plan(schema, &parameters)?;

        let population = self.load_population(&source_commit, &parameters.table_key).await?;
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.preflight(&plan, &population))
            .await
            .map_err(|e| Error::Internal {
                message: format!("preflight task failed: {}", e),
            })??;

        let job = Job::new(
            RunType::Sampling,
            dataset_id,
            source_ref,
            serde_json::to_value(&parameters)?,
            requested_by,
        );
        let job_id = self.queue.enqueue(job).await?;
        self.metrics.record_job_created();
        info!(
            job_id = %job_id,
            dataset_id = %dataset_id,
            rounds = parameters.rounds.len(),
            "Sampling job created"
        );
        Ok(job_id)
    }

    // ========== Execution ==========

    /// Claim and run one pending job; `None` if the queue is empty
    pub async fn run_next(&self) -> Result<Option<JobId>> {
        match self.queue.claim_next_pending().await? {
            Some(job) => {
                let id = job.id;
                self.run_job(job).await;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Poll the queue until `shutdown` flips, running up to
    /// `max_concurrent_jobs` jobs at once. Waits for in-flight jobs on exit.
    pub async fn run_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let slots = self.job_config().max_concurrent_jobs.max(1);
        let semaphore = Arc::new(Semaphore::new(slots));
        let poll = self.job_config().poll_interval();
        info!(max_concurrent_jobs = slots, "Job worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => permit.map_err(|_| Error::Internal {
                    message: "worker semaphore closed".to_string(),
                })?,
                _ = shutdown.changed() => break,
            };

            match self.queue.claim_next_pending().await {
                Ok(Some(job)) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.run_job(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "Failed to claim job");
                    tokio::time::sleep(poll).await;
                }
            }
        }

        let in_flight = u32::try_from(slots).unwrap_or(u32::MAX);
        let _drained = semaphore.acquire_many(in_flight).await;
        info!("Job worker stopped");
        Ok(())
    }

    /// Request cancellation. Takes effect before the next round, or before
    /// the write phase; once the output commit is being written the job runs
    /// to completion.
    pub async fn cancel(&self, user: &str, job_id: JobId) -> Result<()> {
        let job = self.queue.get(job_id).await?;
        self.require(user, job.dataset_id, PermissionLevel::Write).await?;
        if job.status.is_terminal() {
            return Err(Error::validation(format!(
                "job {} is already {}",
                job_id, job.status
            )));
        }
        self.token(job_id).cancel();
        info!(job_id = %job_id, "Job cancellation requested");
        Ok(())
    }

    fn token(&self, job_id: JobId) -> CancelToken {
        self.cancels
            .entry(job_id)
            .or_insert_with(|| CancelToken::new(job_id.to_string()))
            .clone()
    }

    async fn run_job(&self, job: Job) {
        let span = info_span!("sampling_job", job_id = %job.id, dataset_id = %job.dataset_id);
        async {
            let timer = Timer::new("sampling_job");
            let outcome = self.execute_job(&job).await;
            self.cancels.remove(&job.id);

            let transition = match outcome {
                Ok(summary) => {
                    info!(
                        samples = summary.sample_count,
                        output_ref = summary.output_ref.as_deref().unwrap_or(""),
                        "Sampling job completed"
                    );
                    self.metrics.record_job_completed();
                    self.queue
                        .update_status(job.id, JobStatus::Completed, StatusDetail::Summary(summary))
                        .await
                }
                Err(e) => {
                    warn!(error = %e, code = e.error_code(), "Sampling job failed");
                    self.metrics.record_job_failed();
                    self.queue
                        .update_status(job.id, JobStatus::Failed, StatusDetail::Error(e.to_string()))
                        .await
                }
            };
            if let Err(e) = transition {
                error!(error = %e, "Could not record job outcome");
            }
            timer.stop();
        }
        .instrument(span)
        .await
    }

    async fn execute_job(&self, job: &Job) -> Result<JobSummary> {
        let parameters: SamplingParameters = serde_json::from_value(job.parameters.clone())?;
        let cancel = self.token(job.id);

        let source_commit = self.repo.resolve(job.dataset_id, &job.source_ref)?;
        self.queue.record_source(job.id, source_commit).await?;
        let commit = self.repo.get_commit(&source_commit)?;
        let schema = commit.schema(&parameters.table_key)?.clone();
        let plan = Arc::new(self.compile_plan(&schema, &parameters)?);
        let population = self
            .load_population(&source_commit, &parameters.table_key)
            .await
            .with_context(|| format!("loading {}@{}", parameters.table_key, source_commit.short()))?;
        info!(
            source_commit = %source_commit.short(),
            population = population.len(),
            "Source resolved"
        );

        let total_rounds = plan.rounds.len() as u32;
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let engine = Arc::clone(&self.engine);
        let task_plan = Arc::clone(&plan);
        let task_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            engine.execute_with_progress(&task_plan, &population, &task_cancel, &mut |summary| {
                let _ = progress_tx.send(summary.round_number);
            })
        });

        // Drain every update and join the engine before surfacing a progress error
        let mut rounds_completed = 0;
        let mut progress_error = None;
        while progress_rx.recv().await.is_some() {
            rounds_completed += 1;
            if progress_error.is_some() {
                continue;
            }
            let progress = JobProgress {
                rounds_completed,
                total_rounds,
            };
            if let Err(e) = self.queue.record_progress(job.id, progress).await {
                warn!(error = %e, rounds_completed, "Could not record job progress");
                progress_error = Some(e);
            }
        }
        let outcome = handle.await.map_err(|e| Error::Internal {
            message: format!("sampling task failed: {}", e),
        })?;
        if let Some(e) = progress_error {
            return Err(e);
        }
        let outcome = outcome?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                job_id: job.id.to_string(),
            });
        }

        self.publish(job, &parameters, &plan, &schema, source_commit, outcome)
            .await
    }

    /// Write phase: rows, commit, then the output branch
    async fn publish(
        &self,
        job: &Job,
        parameters: &SamplingParameters,
        plan: &SamplingPlan,
        source_schema: &Schema,
        source_commit: CommitId,
        outcome: SamplingOutcome,
    ) -> Result<JobSummary> {
        let sample_rows = outcome.selected.iter().map(|s| s.tagged_row()).collect();
        let sample_hashes = self
            .repo
            .row_store()
            .put_batch(sample_rows)
            .await
            .with_context(|| format!("writing sample rows for job {}", job.id))?;

        let mut manifest: Manifest = sample_hashes
            .into_iter()
            .enumerate()
            .map(|(i, hash)| (LogicalRowId::new(SAMPLE_TABLE, i as u64), hash))
            .collect();
        let mut schemas = BTreeMap::from([(SAMPLE_TABLE.to_string(), plan.sample_schema(source_schema)?)]);

        let residual_count = match &outcome.residual {
            Some(residual) => {
                let source = self.repo.manifest(&source_commit)?;
                for (i, id) in residual.iter().enumerate() {
                    let hash = source
                        .get(id)
                        .ok_or_else(|| Error::not_found("row", id))?;
                    manifest.insert(LogicalRowId::new(RESIDUAL_TABLE, i as u64), *hash);
                }
                schemas.insert(RESIDUAL_TABLE.to_string(), source_schema.clone());
                Some(residual.len() as u64)
            }
            None => None,
        };

        let output_ref = self.output_ref(job.id, parameters);
        let message = format!(
            "Sampling job {} over {}@{}",
            job.id,
            parameters.table_key,
            source_commit.short()
        );
        let retries = self.job_config().max_ref_retries;
        let mut attempt = 0;
        let commit = loop {
            let head = self.repo.head(job.dataset_id, &output_ref)?;
            let request = CommitRequest::on_branch(
                job.dataset_id,
                output_ref.clone(),
                head,
                ManifestDelta::Replace(manifest.clone()),
                message.clone(),
                job.created_by.clone(),
            )
            .with_parent(head.or(Some(source_commit)))
            .with_schemas(schemas.clone());

            match self.repo.commit(request).await {
                Ok(commit) => break commit,
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    warn!(attempt, output_ref = %output_ref, error = %e, "Output ref moved, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        for round in &outcome.rounds {
            self.metrics.record_round(round.selected);
        }
        Ok(JobSummary {
            rounds: outcome.rounds,
            sample_count: outcome.selected.len() as u64,
            residual_count,
            output_commit_id: Some(commit.commit_id),
            output_ref: Some(output_ref),
            warnings: outcome.warnings,
        })
    }

    // ========== Queries ==========

    pub async fn get_job(&self, user: &str, job_id: JobId) -> Result<Job> {
        let job = self.queue.get(job_id).await?;
        self.require(user, job.dataset_id, PermissionLevel::Read).await?;
        Ok(job)
    }

    pub async fn list_jobs(&self, user: &str, dataset_id: DatasetId) -> Result<Vec<Job>> {
        self.require(user, dataset_id, PermissionLevel::Read).await?;
        self.queue.list(Some(dataset_id)).await
    }

    /// Page through a completed job's `sample` or `residual` table.
    /// `limit` is capped at `max_page_size`.
    pub async fn get_job_output(
        &self,
        user: &str,
        job_id: JobId,
        table: OutputTable,
        offset: u64,
        limit: u64,
        columns: Option<&[String]>,
    ) -> Result<OutputPage> {
        let job = self.get_job(user, job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(Error::validation(format!(
                "job {} is {}; output is available once it completes",
                job_id, job.status
            )));
        }
        let summary = job
            .output_summary
            .as_ref()
            .ok_or_else(|| Error::not_found("job output", job_id))?;
        let commit_id = summary
            .output_commit_id
            .ok_or_else(|| Error::not_found("job output", job_id))?;
        if table == OutputTable::Residual && summary.residual_count.is_none() {
            return Err(Error::not_found("table", format!("{}@{}", RESIDUAL_TABLE, job_id)));
        }
        let limit = limit.min(self.job_config().max_page_size as u64);
        self.repo
            .read_table(&commit_id, table.as_str(), offset, limit, columns)
            .await
    }
}
