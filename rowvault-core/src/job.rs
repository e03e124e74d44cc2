//! # Jobs
//!
//! Records for asynchronous work and the status state machine.
//!
//! ```text
//!   Pending ──> Running ──> Completed
//!      │           │
//!      └───────────┴──────> Failed
//! ```
//!
//! Transitions only move forward; `Completed` and `Failed` are terminal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{CommitId, DatasetId, Timestamp};
use crate::utils::now;

/// Unique identifier for jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| Error::validation(format!("invalid job id '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Sampling,
}

/// Sampling method label carried into summaries and output rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethodKind {
    Random,
    Stratified,
    Systematic,
    Cluster,
}

impl SamplingMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMethodKind::Random => "random",
            SamplingMethodKind::Stratified => "stratified",
            SamplingMethodKind::Systematic => "systematic",
            SamplingMethodKind::Cluster => "cluster",
        }
    }
}

impl fmt::Display for SamplingMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-round outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_number: u32,
    pub method: SamplingMethodKind,
    /// Rows eligible after filter and exclusion
    pub candidates: u64,
    pub selected: u64,
}

/// Result recorded on a completed job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub rounds: Vec<RoundSummary>,
    pub sample_count: u64,
    pub residual_count: Option<u64>,
    pub output_commit_id: Option<CommitId>,
    pub output_ref: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub rounds_completed: u32,
    pub total_rounds: u32,
}

/// Payload attached to a status transition
#[derive(Debug, Clone)]
pub enum StatusDetail {
    None,
    Summary(JobSummary),
    Error(String),
}

/// A unit of asynchronous work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub run_type: RunType,
    pub status: JobStatus,
    pub dataset_id: DatasetId,
    pub source_ref: String,
    /// Set once, when the job starts running
    pub source_commit_id: Option<CommitId>,
    pub parameters: serde_json::Value,
    pub output_summary: Option<JobSummary>,
    pub error: Option<String>,
    pub progress: JobProgress,
    pub created_by: String,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn new(
        run_type: RunType,
        dataset_id: DatasetId,
        source_ref: impl Into<String>,
        parameters: serde_json::Value,
        created_by: impl Into<String>,
    ) -> Self {
        let created_at = now();
        Self {
            id: JobId::new(),
            run_type,
            status: JobStatus::Pending,
            dataset_id,
            source_ref: source_ref.into(),
            source_commit_id: None,
            parameters,
            output_summary: None,
            error: None,
            progress: JobProgress::default(),
            created_by: created_by.into(),
            created_at,
            started_at: None,
            finished_at: None,
            updated_at: created_at,
        }
    }

    /// Apply a status transition, stamping the relevant timestamps
    pub fn transition(&mut self, next: JobStatus, detail: StatusDetail) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::validation(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let at = now();
        match next {
            JobStatus::Running => self.started_at = Some(at),
            JobStatus::Completed | JobStatus::Failed => self.finished_at = Some(at),
            JobStatus::Pending => {}
        }
        match detail {
            StatusDetail::None => {}
            StatusDetail::Summary(summary) => self.output_summary = Some(summary),
            StatusDetail::Error(message) => self.error = Some(message),
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }
}
