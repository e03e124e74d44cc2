//! # Core Traits
//!
//! Seams between rowvault components and their collaborators.
//!
//! ## Design Philosophy
//!
//! 1. **Async-First**: every store operation may cross an I/O boundary
//! 2. **Error Propagation**: all operations return `Result`
//! 3. **Injection**: the orchestrator receives its queue and permission gate
//!    at construction, never through globals

use std::sync::Arc;

use async_trait::async_trait;

use crate::job::{Job, JobId, JobProgress, JobStatus, StatusDetail};
use crate::types::{CommitId, DatasetId, RowHash};
use crate::value::RowData;
use crate::Result;

/// Content-addressable row storage
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Insert-or-get by content hash. Idempotent.
    async fn put(&self, row: RowData) -> Result<RowHash>;

    /// Store many rows; hashes come back in input order
    async fn put_batch(&self, rows: Vec<RowData>) -> Result<Vec<RowHash>>;

    /// Fetch a row, failing with `NotFound` for unknown hashes
    async fn get(&self, hash: &RowHash) -> Result<Arc<RowData>>;

    /// Fetch many rows in input order
    async fn get_many(&self, hashes: &[RowHash]) -> Result<Vec<Arc<RowData>>> {
        let mut rows = Vec::with_capacity(hashes.len());
        for hash in hashes {
            rows.push(self.get(hash).await?);
        }
        Ok(rows)
    }

    async fn contains(&self, hash: &RowHash) -> Result<bool>;

    async fn stats(&self) -> Result<RowStoreStats>;
}

/// Row store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowStoreStats {
    pub row_count: u64,
    pub total_bytes: u64,
    pub dedup_hits: u64,
}

/// Transport that persists jobs and hands pending ones to workers
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<JobId>;

    /// Atomically move the oldest pending job to `Running`
    async fn claim_next_pending(&self) -> Result<Option<Job>>;

    /// Apply a monotonic status transition
    async fn update_status(&self, job_id: JobId, status: JobStatus, detail: StatusDetail)
        -> Result<Job>;

    /// Record the commit a running job resolved its source ref to
    async fn record_source(&self, job_id: JobId, commit_id: CommitId) -> Result<()>;

    async fn record_progress(&self, job_id: JobId, progress: JobProgress) -> Result<()>;

    async fn get(&self, job_id: JobId) -> Result<Job>;

    async fn list(&self, dataset_id: Option<DatasetId>) -> Result<Vec<Job>>;
}

/// Access level checked by the permission gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

/// External authorization collaborator
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn has_permission(
        &self,
        user: &str,
        dataset_id: DatasetId,
        level: PermissionLevel,
    ) -> Result<bool>;
}
