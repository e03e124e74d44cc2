//! Permission gate implementations.
//!
//! Authorization itself is an external collaborator; these two gates cover
//! embedded use (`AllowAll`) and explicit grants (`StaticPermissions`).

use async_trait::async_trait;
use dashmap::DashMap;

use rowvault_core::error::Result;
use rowvault_core::traits::{PermissionGate, PermissionLevel};
use rowvault_core::DatasetId;

/// Grants everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn has_permission(&self, _user: &str, _dataset_id: DatasetId, _level: PermissionLevel) -> Result<bool> {
        Ok(true)
    }
}

/// Explicit per-user, per-dataset grants. A higher level implies the lower ones.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    grants: DashMap<(String, DatasetId), PermissionLevel>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user: &str, dataset_id: DatasetId, level: PermissionLevel) {
        self.grants.insert((user.to_string(), dataset_id), level);
    }

    pub fn revoke(&self, user: &str, dataset_id: DatasetId) {
        self.grants.remove(&(user.to_string(), dataset_id));
    }
}

#[async_trait]
impl PermissionGate for StaticPermissions {
    async fn has_permission(&self, user: &str, dataset_id: DatasetId, level: PermissionLevel) -> Result<bool> {
        Ok(self
            .grants
            .get(&(user.to_string(), dataset_id))
            .map_or(false, |granted| *granted >= level))
    }
}
