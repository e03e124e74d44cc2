//! In-process job queue.
//!
//! Jobs live in a `DashMap`; pending ids wait in a FIFO. Claiming pops ids
//! until it finds one that is still pending and moves it to `Running` under the
//! job's map entry, so two workers never claim the same job.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use rowvault_core::error::{Error, Result};
use rowvault_core::traits::JobQueue;
use rowvault_core::{CommitId, DatasetId, Job, JobId, JobProgress, JobStatus, StatusDetail};

#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: DashMap<JobId, Job>,
    pending: Mutex<VecDeque<JobId>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<JobId> {
        if job.status != JobStatus::Pending {
            return Err(Error::validation(format!(
                "only pending jobs can be enqueued, {} is {}",
                job.id, job.status
            )));
        }
        let id = job.id;
        self.jobs.insert(id, job);
        self.pending.lock().push_back(id);
        debug!(job_id = %id, "Job enqueued");
        Ok(id)
    }

    async fn claim_next_pending(&self) -> Result<Option<Job>> {
        loop {
            let next = self.pending.lock().pop_front();
            let Some(id) = next else {
                return Ok(None);
            };
            let Some(mut job) = self.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }
            job.transition(JobStatus::Running, StatusDetail::None)?;
            debug!(job_id = %id, "Job claimed");
            return Ok(Some(job.clone()));
        }
    }

    async fn update_status(&self, job_id: JobId, status: JobStatus, detail: StatusDetail) -> Result<Job> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::not_found("job", job_id))?;
        job.transition(status, detail)?;
        Ok(job.clone())
    }

    async fn record_source(&self, job_id: JobId, commit_id: CommitId) -> Result<()> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::not_found("job", job_id))?;
        match job.source_commit_id {
            Some(existing) if existing != commit_id => Err(Error::validation(format!(
                "job {} already resolved its source to {}",
                job_id,
                existing.short()
            ))),
            _ => {
                job.source_commit_id = Some(commit_id);
                Ok(())
            }
        }
    }

    async fn record_progress(&self, job_id: JobId, progress: JobProgress) -> Result<()> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::not_found("job", job_id))?;
        job.progress = progress;
        job.updated_at = rowvault_core::utils::now();
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Job> {
        self.jobs
            .get(&job_id)
            .map(|j| j.value().clone())
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    async fn list(&self, dataset_id: Option<DatasetId>) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| dataset_id.map_or(true, |d| j.dataset_id == d))
            .map(|j| j.value().clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowvault_core::RunType;

    fn job() -> Job {
        Job::new(RunType::Sampling, DatasetId::new(), "main", serde_json::json!({}), "alice")
    }

    #[tokio::test]
    async fn test_claim_order_and_exclusivity() {
        let queue = InMemoryJobQueue::new();
        let first = queue.enqueue(job()).await.unwrap();
        let second = queue.enqueue(job()).await.unwrap();

        let claimed = queue.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());

        assert_eq!(queue.claim_next_pending().await.unwrap().unwrap().id, second);
        assert!(queue.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_is_monotonic() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(job()).await.unwrap();
        queue.claim_next_pending().await.unwrap();
        queue
            .update_status(id, JobStatus::Failed, StatusDetail::Error("boom".into()))
            .await
            .unwrap();

        let back = queue
            .update_status(id, JobStatus::Running, StatusDetail::None)
            .await;
        assert!(back.is_err());
        let done = queue
            .update_status(id, JobStatus::Completed, StatusDetail::None)
            .await;
        assert!(done.is_err());

        let stored = queue.get(id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_failed_pending_job_is_not_claimed() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(job()).await.unwrap();
        queue
            .update_status(id, JobStatus::Failed, StatusDetail::Error("cancelled".into()))
            .await
            .unwrap();
        assert!(queue.claim_next_pending().await.unwrap().is_none());
    }
}
