//! # Commit Graph
//!
//! Immutable snapshots with a single parent pointer.
//!
//! ```text
//!   c0 (root) <── c1 <── c2        main
//!                  ^
//!                  └──── c3        samples/run-1
//! ```
//!
//! A commit's manifest is computed once, as the parent's manifest with the
//! caller's delta applied, and is never touched again. Readers get a shared
//! `Arc<Manifest>`.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use rowvault_core::crypto::{hash_commit, CommitHashInput};
use rowvault_core::error::{Error, Result};
use rowvault_core::metrics::Metrics;
use rowvault_core::utils::{now, validate_table_key};
use rowvault_core::{Commit, CommitId, DatasetId, Manifest, NewCommit, Schema};

pub struct CommitGraph {
    commits: DashMap<CommitId, Arc<Commit>>,
    manifests: DashMap<CommitId, Arc<Manifest>>,
    /// Commits per dataset, in creation order
    history: DashMap<DatasetId, Vec<CommitId>>,
    metrics: Metrics,
}

impl CommitGraph {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            commits: DashMap::new(),
            manifests: DashMap::new(),
            history: DashMap::new(),
            metrics,
        }
    }

    /// Create a commit from the parent's manifest plus `new.delta`
    pub fn create_commit(&self, new: NewCommit) -> Result<Arc<Commit>> {
        if new.author.trim().is_empty() {
            return Err(Error::validation("commit author must not be empty"));
        }

        let (base, inherited_schemas) = match new.parent_commit_id {
            Some(parent_id) => {
                let parent = self.get_commit(&parent_id)?;
                if parent.dataset_id != new.dataset_id {
                    return Err(Error::validation(format!(
                        "parent {} belongs to another dataset",
                        parent_id.short()
                    )));
                }
                (self.manifest(&parent_id)?, parent.schemas.clone())
            }
            None => (Arc::new(Manifest::new()), BTreeMap::new()),
        };

        let manifest = base.apply(&new.delta);
        let schemas = new.schemas.unwrap_or(inherited_schemas);
        check_tables(&manifest, &schemas)?;

        let committed_at = now();
        let commit_id = hash_commit(&CommitHashInput {
            dataset_id: new.dataset_id,
            parent: new.parent_commit_id,
            message: &new.message,
            author: &new.author,
            committed_at,
            schemas: &schemas,
            manifest: &manifest,
        })?;

        if let Some(existing) = self.commits.get(&commit_id) {
            return Ok(Arc::clone(existing.value()));
        }

        let commit = Arc::new(Commit {
            commit_id,
            dataset_id: new.dataset_id,
            parent_commit_id: new.parent_commit_id,
            message: new.message,
            author: new.author,
            committed_at,
            schemas,
            row_count: manifest.len() as u64,
        });

        // The history entry guard serializes root creation per dataset
        let mut history = self.history.entry(new.dataset_id).or_default();
        if new.parent_commit_id.is_none() && !history.is_empty() {
            return Err(Error::validation(format!(
                "dataset {} already has commits; a parent is required",
                new.dataset_id
            )));
        }
        self.manifests.insert(commit_id, Arc::new(manifest));
        self.commits.insert(commit_id, Arc::clone(&commit));
        history.push(commit_id);
        drop(history);

        self.metrics.record_commit();
        debug!(
            commit_id = %commit_id.short(),
            dataset_id = %commit.dataset_id,
            rows = commit.row_count,
            "Commit created"
        );
        Ok(commit)
    }

    pub fn get_commit(&self, commit_id: &CommitId) -> Result<Arc<Commit>> {
        self.commits
            .get(commit_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| Error::not_found("commit", commit_id))
    }

    pub fn manifest(&self, commit_id: &CommitId) -> Result<Arc<Manifest>> {
        self.manifests
            .get(commit_id)
            .map(|m| Arc::clone(m.value()))
            .ok_or_else(|| Error::not_found("commit", commit_id))
    }

    pub fn contains(&self, commit_id: &CommitId) -> bool {
        self.commits.contains_key(commit_id)
    }

    /// Walk parent pointers from `commit_id`, newest first
    pub fn log(&self, commit_id: &CommitId, limit: usize) -> Result<Vec<Arc<Commit>>> {
        let mut out = Vec::new();
        let mut next = Some(*commit_id);
        while let Some(id) = next {
            if out.len() >= limit {
                break;
            }
            let commit = self.get_commit(&id)?;
            next = commit.parent_commit_id;
            out.push(commit);
        }
        Ok(out)
    }

    pub fn commits_for_dataset(&self, dataset_id: &DatasetId) -> Vec<Arc<Commit>> {
        let ids = self
            .history
            .get(dataset_id)
            .map(|h| h.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_commit(id).ok()).collect()
    }

    pub fn has_commits(&self, dataset_id: &DatasetId) -> bool {
        self.history
            .get(dataset_id)
            .map(|h| !h.is_empty())
            .unwrap_or(false)
    }
}

impl Default for CommitGraph {
    fn default() -> Self {
        Self::new(Metrics::new())
    }
}

fn check_tables(manifest: &Manifest, schemas: &BTreeMap<String, Schema>) -> Result<()> {
    for table in manifest.tables() {
        validate_table_key(&table)?;
        if !schemas.contains_key(&table) {
            return Err(Error::validation(format!("table '{}' has no schema", table)));
        }
    }
    for table in schemas.keys() {
        validate_table_key(table)?;
    }
    Ok(())
}
