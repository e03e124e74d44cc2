//! Dataset registry with soft delete.

use dashmap::DashMap;
use tracing::info;

use rowvault_core::error::{Error, Result};
use rowvault_core::utils::now;
use rowvault_core::{Dataset, DatasetId};

const MAX_DATASET_NAME_LEN: usize = 255;

#[derive(Default)]
pub struct DatasetStore {
    datasets: DashMap<DatasetId, Dataset>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: &str, owner: &str) -> Result<Dataset> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_DATASET_NAME_LEN {
            return Err(Error::validation(format!(
                "dataset name must be 1..={} characters",
                MAX_DATASET_NAME_LEN
            )));
        }
        if owner.trim().is_empty() {
            return Err(Error::validation("dataset owner must not be empty"));
        }

        let dataset = Dataset {
            id: DatasetId::new(),
            name: name.to_string(),
            owner: owner.to_string(),
            created_at: now(),
            deleted_at: None,
        };
        self.datasets.insert(dataset.id, dataset.clone());
        info!(dataset_id = %dataset.id, name = %dataset.name, "Dataset created");
        Ok(dataset)
    }

    /// Live dataset; soft-deleted ones are reported as not found
    pub fn get(&self, id: DatasetId) -> Result<Dataset> {
        match self.datasets.get(&id) {
            Some(d) if !d.is_deleted() => Ok(d.value().clone()),
            _ => Err(Error::not_found("dataset", id)),
        }
    }

    pub fn list(&self) -> Vec<Dataset> {
        let mut out: Vec<Dataset> = self
            .datasets
            .iter()
            .filter(|d| !d.is_deleted())
            .map(|d| d.value().clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        out
    }

    pub fn soft_delete(&self, id: DatasetId) -> Result<Dataset> {
        let mut entry = self
            .datasets
            .get_mut(&id)
            .filter(|d| !d.is_deleted())
            .ok_or_else(|| Error::not_found("dataset", id))?;
        entry.deleted_at = Some(now());
        info!(dataset_id = %id, "Dataset soft-deleted");
        Ok(entry.value().clone())
    }
}
