//! # Repository
//!
//! Service-boundary facade over the row store, commit graph, ref store and
//! dataset registry. Rules that the storage layer leaves to its callers live
//! here: referenced rows must exist before a commit names them, and tags never
//! move once created.
//!
//! ```text
//!   put_rows ──> RowStore (content addressed)
//!                    ▲
//!   commit ──────────┘ existence check ──> CommitGraph ──> RefStore CAS
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use rowvault_core::config::StorageConfig;
use rowvault_core::error::{Error, Result};
use rowvault_core::metrics::Metrics;
use rowvault_core::traits::RowStore;
use rowvault_core::utils::{validate_ref_name, validate_table_key};
use rowvault_core::{
    Commit, CommitId, Dataset, DatasetId, LogicalRowId, Manifest, ManifestDelta, NewCommit, Ref,
    RefKind, RowData, RowHash, Schema,
};
use rowvault_storage::{CommitGraph, DatasetStore, DiskRowStore, MemoryRowStore, RefStore};

/// A commit to publish on a branch
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub dataset_id: DatasetId,
    pub branch: String,
    /// Head the caller believes the branch is at; `None` creates the branch
    pub expected_head: Option<CommitId>,
    /// Parent of the new commit
    pub parent: Option<CommitId>,
    pub delta: ManifestDelta,
    /// `None` inherits the parent's schemas
    pub schemas: Option<BTreeMap<String, Schema>>,
    pub message: String,
    pub author: String,
}

impl CommitRequest {
    /// Commit on top of `head`, which is also the expected branch head
    pub fn on_branch(
        dataset_id: DatasetId,
        branch: impl Into<String>,
        head: Option<CommitId>,
        delta: ManifestDelta,
        message: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            dataset_id,
            branch: branch.into(),
            expected_head: head,
            parent: head,
            delta,
            schemas: None,
            message: message.into(),
            author: author.into(),
        }
    }

    pub fn with_schemas(mut self, schemas: BTreeMap<String, Schema>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn with_parent(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }
}

/// One row of a table read
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub id: LogicalRowId,
    pub data: RowData,
}

/// A page of table rows with pagination metadata
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPage {
    pub rows: Vec<OutputRow>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub has_more: bool,
}

/// High-level handle on a rowvault repository
pub struct Repository {
    rows: Arc<dyn RowStore>,
    commits: CommitGraph,
    refs: RefStore,
    datasets: DatasetStore,
    metrics: Metrics,
}

impl Repository {
    /// Repository over any row store
    pub fn new(rows: Arc<dyn RowStore>, metrics: Metrics) -> Self {
        Self {
            rows,
            commits: CommitGraph::new(metrics.clone()),
            refs: RefStore::new(metrics.clone()),
            datasets: DatasetStore::new(),
            metrics,
        }
    }

    /// Fully in-memory repository
    pub fn in_memory() -> Self {
        let metrics = Metrics::new();
        Self::new(Arc::new(MemoryRowStore::new(metrics.clone())), metrics)
    }

    /// Repository whose rows live on disk under `config.data_dir`
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let metrics = Metrics::new();
        let rows = DiskRowStore::open(config, metrics.clone()).await?;
        Ok(Self::new(Arc::new(rows), metrics))
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn row_store(&self) -> &Arc<dyn RowStore> {
        &self.rows
    }

    // ========== Datasets ==========

    pub fn create_dataset(&self, name: &str, owner: &str) -> Result<Dataset> {
        self.datasets.create(name, owner)
    }

    pub fn get_dataset(&self, dataset_id: DatasetId) -> Result<Dataset> {
        self.datasets.get(dataset_id)
    }

    pub fn list_datasets(&self) -> Vec<Dataset> {
        self.datasets.list()
    }

    /// Soft delete; commits and refs stay readable by id
    pub fn delete_dataset(&self, dataset_id: DatasetId) -> Result<Dataset> {
        self.datasets.soft_delete(dataset_id)
    }

    // ========== Rows ==========

    /// Validate rows against `schema`, normalize them to its column types and
    /// store them
    pub async fn put_rows(&self, schema: &Schema, rows: Vec<RowData>) -> Result<Vec<RowHash>> {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                schema.normalize_row(row).map_err(|e| match e {
                    Error::Validation { message } => {
                        Error::validation(format!("row {}: {}", i, message))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.rows.put_batch(rows).await
    }

    // ========== Commits & refs ==========

    /// Create a commit and move `request.branch` to it.
    ///
    /// Fails with `NotFound` if the delta names a row hash the row store does
    /// not hold, and with `Conflict` if the branch is not at `expected_head`.
    /// A commit that loses the ref race stays unreachable.
    pub async fn commit(&self, request: CommitRequest) -> Result<Arc<Commit>> {
        self.datasets.get(request.dataset_id)?;
        validate_ref_name(&request.branch)?;

        if let Ok(current) = self.refs.get(request.dataset_id, &request.branch) {
            if current.kind == RefKind::Tag {
                return Err(Error::validation(format!(
                    "'{}' is a tag and cannot be committed to",
                    request.branch
                )));
            }
            if Some(current.commit_id) != request.expected_head {
                self.metrics.record_ref_conflict();
                return Err(Error::Conflict {
                    reference: request.branch.clone(),
                    expected: describe(request.expected_head),
                    actual: current.commit_id.short(),
                });
            }
        }

        self.check_rows_exist(&request.delta).await?;

        let commit = self.commits.create_commit(NewCommit {
            dataset_id: request.dataset_id,
            parent_commit_id: request.parent,
            delta: request.delta,
            schemas: request.schemas,
            message: request.message,
            author: request.author,
        })?;

        self.refs.compare_and_swap(
            request.dataset_id,
            &request.branch,
            RefKind::Branch,
            request.expected_head,
            commit.commit_id,
        )?;

        info!(
            dataset_id = %request.dataset_id,
            branch = %request.branch,
            commit_id = %commit.commit_id.short(),
            rows = commit.row_count,
            "Commit published"
        );
        Ok(commit)
    }

    async fn check_rows_exist(&self, delta: &ManifestDelta) -> Result<()> {
        let hashes: Vec<&RowHash> = match delta {
            ManifestDelta::Replace(manifest) => manifest.row_hashes().collect(),
            ManifestDelta::Patch { upserts, .. } => upserts.iter().map(|(_, h)| h).collect(),
        };
        for hash in hashes {
            if !self.rows.contains(hash).await? {
                return Err(Error::not_found("row", hash.to_hex()));
            }
        }
        Ok(())
    }

    /// Create an immutable tag; an existing tag of the same name is a conflict
    pub fn create_tag(&self, dataset_id: DatasetId, name: &str, commit_id: CommitId) -> Result<Ref> {
        self.datasets.get(dataset_id)?;
        let commit = self.commits.get_commit(&commit_id)?;
        if commit.dataset_id != dataset_id {
            return Err(Error::validation(format!(
                "commit {} belongs to another dataset",
                commit_id.short()
            )));
        }
        let tag = self
            .refs
            .compare_and_swap(dataset_id, name, RefKind::Tag, None, commit_id)?;
        info!(dataset_id = %dataset_id, tag = %name, commit_id = %commit_id.short(), "Tag created");
        Ok(tag)
    }

    /// Move a branch with compare-and-swap. Tags are rejected.
    pub fn update_ref(
        &self,
        dataset_id: DatasetId,
        name: &str,
        expected: Option<CommitId>,
        new_commit: CommitId,
    ) -> Result<Ref> {
        if let Ok(existing) = self.refs.get(dataset_id, name) {
            if existing.kind == RefKind::Tag {
                return Err(Error::validation(format!("tag '{}' is immutable", name)));
            }
        }
        let commit = self.commits.get_commit(&new_commit)?;
        if commit.dataset_id != dataset_id {
            return Err(Error::validation(format!(
                "commit {} belongs to another dataset",
                new_commit.short()
            )));
        }
        self.refs
            .compare_and_swap(dataset_id, name, RefKind::Branch, expected, new_commit)
    }

    pub fn resolve(&self, dataset_id: DatasetId, name: &str) -> Result<CommitId> {
        self.refs.resolve(dataset_id, name)
    }

    /// Like [`Repository::resolve`], but a missing ref is `None`
    pub fn head(&self, dataset_id: DatasetId, name: &str) -> Result<Option<CommitId>> {
        match self.refs.resolve(dataset_id, name) {
            Ok(commit_id) => Ok(Some(commit_id)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_ref(&self, dataset_id: DatasetId, name: &str) -> Result<Ref> {
        self.refs.get(dataset_id, name)
    }

    pub fn list_refs(&self, dataset_id: DatasetId) -> Vec<Ref> {
        self.refs.list(dataset_id)
    }

    pub fn get_commit(&self, commit_id: &CommitId) -> Result<Arc<Commit>> {
        self.commits.get_commit(commit_id)
    }

    pub fn manifest(&self, commit_id: &CommitId) -> Result<Arc<Manifest>> {
        self.commits.manifest(commit_id)
    }

    /// Ancestry of a commit, newest first
    pub fn log(&self, commit_id: &CommitId, limit: usize) -> Result<Vec<Arc<Commit>>> {
        self.commits.log(commit_id, limit)
    }

    // ========== Table reads ==========

    /// Every row of one table of a commit, in logical row id order
    pub async fn load_table(
        &self,
        commit_id: &CommitId,
        table_key: &str,
    ) -> Result<Vec<(LogicalRowId, Arc<RowData>)>> {
        validate_table_key(table_key)?;
        let commit = self.commits.get_commit(commit_id)?;
        commit.schema(table_key)?;
        let manifest = self.commits.manifest(commit_id)?;

        let (ids, hashes): (Vec<LogicalRowId>, Vec<RowHash>) = manifest
            .table(table_key)
            .map(|(id, hash)| (id.clone(), *hash))
            .unzip();
        let rows = self.rows.get_many(&hashes).await?;
        debug!(
            commit_id = %commit_id.short(),
            table = %table_key,
            rows = rows.len(),
            "Table loaded"
        );
        Ok(ids.into_iter().zip(rows).collect())
    }

    /// One page of a table, optionally restricted to `columns`
    pub async fn read_table(
        &self,
        commit_id: &CommitId,
        table_key: &str,
        offset: u64,
        limit: u64,
        columns: Option<&[String]>,
    ) -> Result<OutputPage> {
        if limit == 0 {
            return Err(Error::validation("page limit must be greater than 0"));
        }
        validate_table_key(table_key)?;
        let commit = self.commits.get_commit(commit_id)?;
        let schema = commit.schema(table_key)?;
        if let Some(columns) = columns {
            schema.project(columns)?;
        }

        let manifest = self.commits.manifest(commit_id)?;
        let total = manifest.table_len(table_key) as u64;
        let (ids, hashes): (Vec<LogicalRowId>, Vec<RowHash>) = manifest
            .table(table_key)
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|(id, hash)| (id.clone(), *hash))
            .unzip();
        let data = self.rows.get_many(&hashes).await?;

        let rows = ids
            .into_iter()
            .zip(data)
            .map(|(id, row)| {
                let data = match columns {
                    None => row.as_ref().clone(),
                    Some(columns) => columns
                        .iter()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect(),
                };
                OutputRow { id, data }
            })
            .collect::<Vec<_>>();

        let end = offset.saturating_add(rows.len() as u64);
        Ok(OutputPage {
            rows,
            total,
            offset,
            limit,
            has_more: end < total,
        })
    }
}

fn describe(commit: Option<CommitId>) -> String {
    commit.map(|c| c.short()).unwrap_or_else(|| "<none>".to_string())
}
