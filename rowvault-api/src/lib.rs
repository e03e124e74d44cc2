//! # rowvault API
//!
//! In-process surface for rowvault: a [`Repository`] over the stores and an
//! [`Orchestrator`] that runs sampling jobs against it.
//!
//! ```ignore
//! let repo = Arc::new(Repository::in_memory());
//! let orchestrator = Orchestrator::new(repo, Arc::new(InMemoryJobQueue::new()), Arc::new(AllowAll), config);
//! let job_id = orchestrator.create_sampling_job(request).await?;
//! orchestrator.run_next().await?;
//! ```

pub mod orchestrator;
pub mod permissions;
pub mod queue;
pub mod repository;

pub use orchestrator::{
    Orchestrator, OutputTable, SamplingJobRequest, SamplingParameters, RESIDUAL_TABLE,
    SAMPLE_TABLE,
};
pub use permissions::{AllowAll, StaticPermissions};
pub use queue::InMemoryJobQueue;
pub use repository::{CommitRequest, OutputPage, OutputRow, Repository};
