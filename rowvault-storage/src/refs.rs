//! # Ref Store
//!
//! Named pointers to commits. Every update is a compare-and-swap on a single
//! map entry: the writer names the commit it believes is current and stale
//! writers are rejected with `Conflict`. There is no store-wide lock; two
//! writers only contend when they target the same ref.
//!
//! Tag immutability is a service-boundary rule and is not enforced here.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use rowvault_core::error::{Error, Result};
use rowvault_core::metrics::Metrics;
use rowvault_core::utils::{now, validate_ref_name};
use rowvault_core::{CommitId, DatasetId, Ref, RefKind};

type RefKey = (DatasetId, String);

pub struct RefStore {
    refs: DashMap<RefKey, Ref>,
    metrics: Metrics,
}

impl RefStore {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            refs: DashMap::new(),
            metrics,
        }
    }

    pub fn get(&self, dataset_id: DatasetId, name: &str) -> Result<Ref> {
        self.refs
            .get(&(dataset_id, name.to_string()))
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::not_found("ref", format!("{}@{}", name, dataset_id)))
    }

    /// Commit a ref currently points to
    pub fn resolve(&self, dataset_id: DatasetId, name: &str) -> Result<CommitId> {
        self.get(dataset_id, name).map(|r| r.commit_id)
    }

    /// Point `name` at `new_commit` if it currently points at `expected`.
    ///
    /// `expected == None` means "the ref must not exist yet".
    pub fn compare_and_swap(
        &self,
        dataset_id: DatasetId,
        name: &str,
        kind: RefKind,
        expected: Option<CommitId>,
        new_commit: CommitId,
    ) -> Result<Ref> {
        validate_ref_name(name)?;
        let conflict = |actual: Option<CommitId>| Error::Conflict {
            reference: name.to_string(),
            expected: describe(expected),
            actual: describe(actual),
        };

        let updated = match self.refs.entry((dataset_id, name.to_string())) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if current.kind != kind {
                    return Err(Error::validation(format!(
                        "'{}' is a {}, not a {}",
                        name, current.kind, kind
                    )));
                }
                if Some(current.commit_id) != expected {
                    let actual = current.commit_id;
                    self.metrics.record_ref_conflict();
                    return Err(conflict(Some(actual)));
                }
                let r = slot.get_mut();
                r.commit_id = new_commit;
                r.updated_at = now();
                r.clone()
            }
            Entry::Vacant(slot) => {
                if expected.is_some() {
                    self.metrics.record_ref_conflict();
                    return Err(conflict(None));
                }
                slot.insert(Ref {
                    dataset_id,
                    name: name.to_string(),
                    commit_id: new_commit,
                    kind,
                    updated_at: now(),
                })
                .value()
                .clone()
            }
        };

        self.metrics.record_ref_update();
        debug!(
            reference = %name,
            dataset_id = %dataset_id,
            commit_id = %new_commit.short(),
            "Ref updated"
        );
        Ok(updated)
    }

    /// All refs of a dataset, sorted by name
    pub fn list(&self, dataset_id: DatasetId) -> Vec<Ref> {
        let mut refs: Vec<Ref> = self
            .refs
            .iter()
            .filter(|entry| entry.key().0 == dataset_id)
            .map(|entry| entry.value().clone())
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        refs
    }
}

impl Default for RefStore {
    fn default() -> Self {
        Self::new(Metrics::new())
    }
}

fn describe(commit: Option<CommitId>) -> String {
    commit.map(|c| c.short()).unwrap_or_else(|| "<none>".to_string())
}
