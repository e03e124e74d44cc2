//! # rowvault Core
//!
//! This crate provides the fundamental building blocks for rowvault:
//! - Typed row values and per-table schemas
//! - Content-addressed ids for rows and commits
//! - Job records and their status state machine
//! - Error types
//! - Collaborator traits (row store, job queue, permission gate)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  rowvault-core                  │
//! ├─────────────────────────────────────────────────┤
//! │  • value         - Typed cells, schemas        │
//! │  • types         - Ids, commits, refs          │
//! │  • job           - Job state machine           │
//! │  • traits        - Store / queue interfaces    │
//! │  • error         - Error handling              │
//! │  • crypto        - BLAKE3 content hashing      │
//! │  • serialization - Checksummed row objects     │
//! │  • config        - Tunables                    │
//! │  • metrics       - Counters and timers         │
//! │  • utils         - Name validation             │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod job;
pub mod metrics;
pub mod serialization;
pub mod traits;
pub mod types;
pub mod utils;
pub mod value;

// Re-export commonly used types
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use job::{
    Job, JobId, JobProgress, JobStatus, JobSummary, RoundSummary, RunType, SamplingMethodKind,
    StatusDetail,
};
pub use types::{
    Commit, CommitId, Dataset, DatasetId, LogicalRowId, Manifest, ManifestDelta, NewCommit, Ref,
    RefKind, Row, RowHash, Timestamp,
};
pub use value::{ColumnDef, ColumnType, RowData, Schema, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
