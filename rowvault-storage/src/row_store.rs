//! # Row Store
//!
//! Content-addressable row storage. A row's key is the BLAKE3 hash of its
//! canonical encoding, so identical rows collapse to one stored object no
//! matter how many commits reference them.
//!
//! ## On-disk layout
//!
//! ```text
//! <data_dir>/objects/
//!   ├── 3f/
//!   │   └── 9a04...e1      (remaining 62 hex chars of the row hash)
//!   └── c0/
//!       └── 17bb...08
//! ```
//!
//! Each object is a checksummed MessagePack frame (see
//! `rowvault_core::serialization`). Writes go to a temp file in the shard
//! directory and are published with a no-clobber link, so concurrent puts of
//! the same row converge on a single object.

use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use rowvault_core::config::StorageConfig;
use rowvault_core::crypto::hash_row;
use rowvault_core::error::{Error, Result};
use rowvault_core::metrics::Metrics;
use rowvault_core::serialization::{decode_row_object, encode_row_object};
use rowvault_core::traits::{RowStore, RowStoreStats};
use rowvault_core::{RowData, RowHash, Value};

/// In-memory row store
pub struct MemoryRowStore {
    rows: DashMap<RowHash, Arc<RowData>>,
    total_bytes: AtomicU64,
    dedup_hits: AtomicU64,
    metrics: Metrics,
}

impl MemoryRowStore {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            rows: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            dedup_hits: AtomicU64::new(0),
            metrics,
        }
    }

    fn insert(&self, row: RowData) -> Result<RowHash> {
        let hash = hash_row(&row)?;
        match self.rows.entry(hash) {
            Entry::Occupied(_) => {
                self.dedup_hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_row_write(false, 0);
            }
            Entry::Vacant(slot) => {
                let bytes = approx_row_bytes(&row);
                slot.insert(Arc::new(row));
                self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
                self.metrics.record_row_write(true, bytes);
            }
        }
        Ok(hash)
    }
}

impl Default for MemoryRowStore {
    fn default() -> Self {
        Self::new(Metrics::new())
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn put(&self, row: RowData) -> Result<RowHash> {
        self.insert(row)
    }

    async fn put_batch(&self, rows: Vec<RowData>) -> Result<Vec<RowHash>> {
        rows.into_iter().map(|row| self.insert(row)).collect()
    }

    async fn get(&self, hash: &RowHash) -> Result<Arc<RowData>> {
        self.rows
            .get(hash)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_found("row", hash))
    }

    async fn contains(&self, hash: &RowHash) -> Result<bool> {
        Ok(self.rows.contains_key(hash))
    }

    async fn stats(&self) -> Result<RowStoreStats> {
        Ok(RowStoreStats {
            row_count: self.rows.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
        })
    }
}

fn approx_row_bytes(row: &RowData) -> u64 {
    row.iter()
        .map(|(name, value)| {
            let cell = match value {
                Value::Null => 1,
                Value::Boolean(_) => 2,
                Value::Integer(_) | Value::Float(_) => 9,
                Value::Text(s) => 5 + s.len(),
                Value::Timestamp(_) => 13,
            };
            4 + name.len() + cell
        })
        .sum::<usize>() as u64
}

/// Row store persisting one object file per row
pub struct DiskRowStore {
    objects_dir: PathBuf,
    sync_writes: bool,
    cache: Mutex<LruCache<RowHash, Arc<RowData>>>,
    row_count: AtomicU64,
    total_bytes: AtomicU64,
    dedup_hits: AtomicU64,
    metrics: Metrics,
}

impl DiskRowStore {
    /// Open (or create) a store under `config.data_dir`
    pub async fn open(config: &StorageConfig, metrics: Metrics) -> Result<Self> {
        let objects_dir = config.data_dir.join("objects");
        tokio::fs::create_dir_all(&objects_dir).await?;

        let scan_dir = objects_dir.clone();
        let (row_count, total_bytes) = tokio::task::spawn_blocking(move || scan_objects(&scan_dir))
            .await
            .map_err(|e| Error::Internal {
                message: format!("object scan task failed: {}", e),
            })??;

        info!(
            dir = %objects_dir.display(),
            rows = row_count,
            bytes = total_bytes,
            "Row store opened"
        );

        let capacity = NonZeroUsize::new(config.row_cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            objects_dir,
            sync_writes: config.sync_writes,
            cache: Mutex::new(LruCache::new(capacity)),
            row_count: AtomicU64::new(row_count),
            total_bytes: AtomicU64::new(total_bytes),
            dedup_hits: AtomicU64::new(0),
            metrics,
        })
    }

    fn object_path(&self, hash: &RowHash) -> PathBuf {
        let hex = hash.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    async fn write_object(&self, row: RowData) -> Result<RowHash> {
        let hash = hash_row(&row)?;
        if self.cache.lock().contains(&hash) {
            self.record_dedup();
            return Ok(hash);
        }

        let path = self.object_path(&hash);
        let bytes = encode_row_object(&row)?;
        let len = bytes.len() as u64;
        let sync = self.sync_writes;
        let created = tokio::task::spawn_blocking(move || publish_object(&path, &bytes, sync))
            .await
            .map_err(|e| Error::Internal {
                message: format!("row write task failed: {}", e),
            })??;

        if created {
            self.row_count.fetch_add(1, Ordering::Relaxed);
            self.total_bytes.fetch_add(len, Ordering::Relaxed);
            self.metrics.record_row_write(true, len);
        } else {
            self.record_dedup();
        }
        self.cache.lock().put(hash, Arc::new(row));
        Ok(hash)
    }

    fn record_dedup(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_row_write(false, 0);
    }
}

/// Write `bytes` to `path` unless an object already lives there.
/// Returns false when the object existed.
fn publish_object(path: &Path, bytes: &[u8], sync: bool) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let shard = path.parent().ok_or_else(|| Error::Internal {
        message: format!("object path {} has no parent", path.display()),
    })?;
    std::fs::create_dir_all(shard)?;

    let mut tmp = tempfile::NamedTempFile::new_in(shard)?;
    tmp.write_all(bytes)?;
    if sync {
        tmp.as_file().sync_all()?;
    }
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}

fn scan_objects(objects_dir: &Path) -> Result<(u64, u64)> {
    let mut count = 0;
    let mut bytes = 0;
    for shard in std::fs::read_dir(objects_dir)? {
        let shard = shard?;
        if !shard.file_type()?.is_dir() {
            continue;
        }
        for object in std::fs::read_dir(shard.path())? {
            let object = object?;
            let name = object.file_name();
            // Leftover temp files from interrupted writes start with '.'
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            count += 1;
            bytes += object.metadata()?.len();
        }
    }
    Ok((count, bytes))
}

#[async_trait]
impl RowStore for DiskRowStore {
    async fn put(&self, row: RowData) -> Result<RowHash> {
        self.write_object(row).await
    }

    async fn put_batch(&self, rows: Vec<RowData>) -> Result<Vec<RowHash>> {
        let mut hashes = Vec::with_capacity(rows.len());
        for row in rows {
            hashes.push(self.write_object(row).await?);
        }
        debug!(rows = hashes.len(), "Row batch stored");
        Ok(hashes)
    }

    async fn get(&self, hash: &RowHash) -> Result<Arc<RowData>> {
        if let Some(row) = self.cache.lock().get(hash) {
            return Ok(Arc::clone(row));
        }

        let path = self.object_path(hash);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("row", hash))
            }
            Err(e) => return Err(e.into()),
        };

        let row = decode_row_object(&bytes)?;
        let actual = hash_row(&row)?;
        if actual != *hash {
            warn!(expected = %hash, actual = %actual, "Row object hash mismatch");
            return Err(Error::Corruption {
                details: format!("object {} rehashes to {}", hash.short(), actual.short()),
            });
        }

        let row = Arc::new(row);
        self.cache.lock().put(*hash, Arc::clone(&row));
        Ok(row)
    }

    async fn contains(&self, hash: &RowHash) -> Result<bool> {
        if self.cache.lock().contains(hash) {
            return Ok(true);
        }
        Ok(tokio::fs::try_exists(self.object_path(hash)).await?)
    }

    async fn stats(&self) -> Result<RowStoreStats> {
        Ok(RowStoreStats {
            row_count: self.row_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64) -> RowData {
        let mut row = RowData::new();
        row.insert("id".into(), Value::Integer(id));
        row.insert("name".into(), Value::Text(format!("row-{}", id)));
        row
    }

    #[tokio::test]
    async fn test_memory_dedup() {
        let store = MemoryRowStore::default();
        let a = store.put(row(1)).await.unwrap();
        let b = store.put(row(1)).await.unwrap();
        assert_eq!(a, b);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.row_count, 1);
        assert_eq!(stats.dedup_hits, 1);
    }

    #[tokio::test]
    async fn test_memory_unknown_hash() {
        let store = MemoryRowStore::default();
        let err = store.get(&RowHash([9; 32])).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "row", .. }));
    }

    #[tokio::test]
    async fn test_disk_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = DiskRowStore::open(&config, Metrics::new()).await.unwrap();
        let hash = store.put(row(1)).await.unwrap();
        let hex = hash.to_hex();
        assert!(dir.path().join("objects").join(&hex[..2]).join(&hex[2..]).exists());
    }
}
