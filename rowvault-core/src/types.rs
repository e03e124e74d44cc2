//! # Core Types
//!
//! Identifiers and the versioning data model: datasets, rows, manifests,
//! commits and refs.
//!
//! ## Object Graph
//!
//! ```text
//!   Ref (main) ──> Commit c3 ──parent──> Commit c2 ──parent──> Commit c1
//!                     │
//!                     ▼
//!                  Manifest
//!                  ├── data:0  ──> RowHash 9f2c…  ──┐
//!                  ├── data:1  ──> RowHash 41aa…    │  Row store
//!                  └── data:2  ──> RowHash 9f2c…  ──┘  (stored once)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{hex_digest, parse_digest};
use crate::error::{Error, Result};
use crate::utils::validate_table_key;
use crate::value::{RowData, Schema};

/// Timestamp type used throughout the system
pub type Timestamp = DateTime<Utc>;

/// Content hash of a row's canonical encoding
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowHash(#[serde(with = "hex_digest")] pub [u8; 32]);

impl RowHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for RowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for RowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowHash({})", self.short())
    }
}

impl FromStr for RowHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_digest(s).map(RowHash)
    }
}

/// Hash of a commit's manifest and metadata
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId(#[serde(with = "hex_digest")] pub [u8; 32]);

impl CommitId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.short())
    }
}

impl FromStr for CommitId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_digest(s).map(CommitId)
    }
}

/// Unique identifier for datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId(pub Uuid);

impl DatasetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DatasetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(DatasetId)
            .map_err(|_| Error::validation(format!("invalid dataset id '{}'", s)))
    }
}

/// Stable per-table row identifier, rendered as `"{table_key}:{index}"`
///
/// Ordering is by table key, then numerically by index, so `data:2` sorts
/// before `data:10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalRowId {
    pub table_key: String,
    pub index: u64,
}

impl LogicalRowId {
    pub fn new(table_key: impl Into<String>, index: u64) -> Self {
        Self {
            table_key: table_key.into(),
            index,
        }
    }

    pub fn in_table(&self, table_key: &str) -> bool {
        self.table_key == table_key
    }
}

impl fmt::Display for LogicalRowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_key, self.index)
    }
}

impl FromStr for LogicalRowId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (table, index) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::validation(format!("logical row id '{}' has no table prefix", s)))?;
        validate_table_key(table)?;
        let index = index
            .parse::<u64>()
            .map_err(|_| Error::validation(format!("logical row id '{}' has a bad index", s)))?;
        Ok(Self::new(table, index))
    }
}

/// Immutable row blob
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub row_hash: RowHash,
    pub data: RowData,
}

/// Logical container of commits and refs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub owner: String,
    pub created_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Dataset {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Full `logical_row_id -> row_hash` mapping of one commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<LogicalRowId, RowHash>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: LogicalRowId, hash: RowHash) -> Option<RowHash> {
        self.entries.insert(id, hash)
    }

    pub fn remove(&mut self, id: &LogicalRowId) -> Option<RowHash> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &LogicalRowId) -> Option<&RowHash> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LogicalRowId, &RowHash)> {
        self.entries.iter()
    }

    /// Entries of one logical table, in index order
    pub fn table<'a>(
        &'a self,
        table_key: &str,
    ) -> impl Iterator<Item = (&'a LogicalRowId, &'a RowHash)> + 'a {
        let start = LogicalRowId::new(table_key, 0);
        let end = LogicalRowId::new(table_key, u64::MAX);
        self.entries.range(start..=end)
    }

    pub fn table_len(&self, table_key: &str) -> usize {
        self.table(table_key).count()
    }

    pub fn tables(&self) -> BTreeSet<String> {
        self.entries.keys().map(|id| id.table_key.clone()).collect()
    }

    pub fn row_hashes(&self) -> impl Iterator<Item = &RowHash> {
        self.entries.values()
    }

    /// Parent manifest with `delta` applied
    pub fn apply(&self, delta: &ManifestDelta) -> Manifest {
        match delta {
            ManifestDelta::Replace(manifest) => manifest.clone(),
            ManifestDelta::Patch { upserts, removals } => {
                let mut next = self.clone();
                for id in removals {
                    next.remove(id);
                }
                for (id, hash) in upserts {
                    next.insert(id.clone(), *hash);
                }
                next
            }
        }
    }
}

impl FromIterator<(LogicalRowId, RowHash)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (LogicalRowId, RowHash)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Change set used to derive a commit's manifest from its parent
#[derive(Debug, Clone)]
pub enum ManifestDelta {
    /// Caller supplies the complete row set
    Replace(Manifest),
    /// Parent rows with upserts and removals applied
    Patch {
        upserts: Vec<(LogicalRowId, RowHash)>,
        removals: Vec<LogicalRowId>,
    },
}

/// Immutable snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub commit_id: CommitId,
    pub dataset_id: DatasetId,
    pub parent_commit_id: Option<CommitId>,
    pub message: String,
    pub author: String,
    pub committed_at: Timestamp,
    /// Declared schema per logical table
    pub schemas: BTreeMap<String, Schema>,
    pub row_count: u64,
}

impl Commit {
    pub fn schema(&self, table_key: &str) -> Result<&Schema> {
        self.schemas.get(table_key).ok_or_else(|| {
            Error::not_found("table", format!("{}@{}", table_key, self.commit_id.short()))
        })
    }
}

/// Input to the commit graph
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub dataset_id: DatasetId,
    pub parent_commit_id: Option<CommitId>,
    pub delta: ManifestDelta,
    /// `None` inherits the parent's schemas
    pub schemas: Option<BTreeMap<String, Schema>>,
    pub message: String,
    pub author: String,
}

/// Mutability policy of a ref
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// Reassignable under compare-and-swap
    Branch,
    /// Fixed at creation
    Tag,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Branch => f.write_str("branch"),
            RefKind::Tag => f.write_str("tag"),
        }
    }
}

/// Named pointer to a commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ref {
    pub dataset_id: DatasetId,
    pub name: String,
    pub commit_id: CommitId,
    pub kind: RefKind,
    pub updated_at: Timestamp,
}
