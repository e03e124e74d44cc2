//! # Content Hashing
//!
//! Deterministic hashing for content addressing and seeded selection.
//!
//! ## Key Components
//!
//! 1. **Row hashes**: BLAKE3 over a canonical byte encoding of the row
//! 2. **Commit ids**: BLAKE3 over commit metadata plus the sorted manifest
//! 3. **Selection hashes**: 64-bit draws from `H(key || seed)`, used by the
//!    sampling engine's hash-threshold tests
//! 4. **Checksums**: CRC32 framing for on-disk objects
//!
//! ## Canonical Row Encoding
//!
//! ```text
//! row    := u32 column_count, column*
//! column := u32 name_len, name bytes, u8 tag, payload
//! tag    := 0 null | 1 bool | 2 int (i64 BE) | 3 float (f64 bits BE)
//!         | 4 text (u32 len, bytes) | 5 timestamp (i64 secs BE, u32 nanos BE)
//! ```
//!
//! Columns are visited in `BTreeMap` order and `-0.0` is folded into `0.0`,
//! so equal rows always produce equal bytes.

use blake3::Hasher;
use crc32fast::Hasher as Crc32Hasher;

use crate::error::{Error, Result};
use crate::types::{CommitId, DatasetId, Manifest, RowHash, Timestamp};
use crate::value::{RowData, Schema, Value};

/// Domain separators so rows and commits never share a hash space
const ROW_DOMAIN: &[u8] = b"rowvault/row/v1";
const COMMIT_DOMAIN: &[u8] = b"rowvault/commit/v1";

/// Append the canonical encoding of a row
pub fn encode_canonical_row(row: &RowData, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&(row.len() as u32).to_be_bytes());
    for (name, value) in row {
        write_bytes(out, name.as_bytes());
        match value {
            Value::Null => out.push(0),
            Value::Boolean(b) => {
                out.push(1);
                out.push(*b as u8);
            }
            Value::Integer(i) => {
                out.push(2);
                out.extend_from_slice(&i.to_be_bytes());
            }
            Value::Float(f) => {
                if f.is_nan() {
                    return Err(Error::validation(format!(
                        "column '{}' holds NaN, which has no canonical form",
                        name
                    )));
                }
                let normalized = if *f == 0.0 { 0.0f64 } else { *f };
                out.push(3);
                out.extend_from_slice(&normalized.to_bits().to_be_bytes());
            }
            Value::Text(s) => {
                out.push(4);
                write_bytes(out, s.as_bytes());
            }
            Value::Timestamp(t) => {
                out.push(5);
                out.extend_from_slice(&t.timestamp().to_be_bytes());
                out.extend_from_slice(&t.timestamp_subsec_nanos().to_be_bytes());
            }
        }
    }
    Ok(())
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Content hash of a row. Pure function of `row`.
pub fn hash_row(row: &RowData) -> Result<RowHash> {
    let mut buf = Vec::with_capacity(64 + row.len() * 24);
    encode_canonical_row(row, &mut buf)?;
    let mut hasher = Hasher::new();
    hasher.update(ROW_DOMAIN);
    hasher.update(&buf);
    Ok(RowHash(*hasher.finalize().as_bytes()))
}

/// Metadata folded into a commit id
pub struct CommitHashInput<'a> {
    pub dataset_id: DatasetId,
    pub parent: Option<CommitId>,
    pub message: &'a str,
    pub author: &'a str,
    pub committed_at: Timestamp,
    pub schemas: &'a std::collections::BTreeMap<String, Schema>,
    pub manifest: &'a Manifest,
}

/// Commit id over metadata and every manifest entry in key order
pub fn hash_commit(input: &CommitHashInput<'_>) -> Result<CommitId> {
    let mut hasher = Hasher::new();
    hasher.update(COMMIT_DOMAIN);
    hasher.update(input.dataset_id.0.as_bytes());
    match input.parent {
        Some(parent) => {
            hasher.update(&[1]);
            hasher.update(&parent.0);
        }
        None => {
            hasher.update(&[0]);
        }
    }
    hash_field(&mut hasher, input.message.as_bytes());
    hash_field(&mut hasher, input.author.as_bytes());
    hasher.update(&input.committed_at.timestamp().to_be_bytes());
    hasher.update(&input.committed_at.timestamp_subsec_nanos().to_be_bytes());

    let schemas = rmp_serde::to_vec(input.schemas)?;
    hash_field(&mut hasher, &schemas);

    hasher.update(&(input.manifest.len() as u64).to_be_bytes());
    for (id, hash) in input.manifest.iter() {
        hash_field(&mut hasher, id.table_key.as_bytes());
        hasher.update(&id.index.to_be_bytes());
        hasher.update(&hash.0);
    }
    Ok(CommitId(*hasher.finalize().as_bytes()))
}

fn hash_field(hasher: &mut Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Uniform 64-bit draw for `key` under `seed`
///
/// The same `(key, seed)` pair always yields the same value, which is what
/// makes seeded sampling reproducible.
pub fn selection_hash(key: &str, seed: u64) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(key.as_bytes());
    hasher.update(b"|");
    hasher.update(&seed.to_le_bytes());
    let digest = hasher.finalize();
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(word)
}

/// Threshold below which a selection hash counts as "selected" for a
/// probability `p` (clamped to `[0, 1]`)
pub fn selection_threshold(p: f64) -> u64 {
    if p.is_nan() || p <= 0.0 {
        0
    } else if p >= 1.0 {
        u64::MAX
    } else {
        (p * u64::MAX as f64) as u64
    }
}

/// Fast CRC32 checksum for data integrity
pub fn crc32_checksum(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verify CRC32 checksum
pub fn verify_crc32(data: &[u8], expected: u32) -> bool {
    crc32_checksum(data) == expected
}

/// Parse a 64-character hex digest
pub fn parse_digest(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s).map_err(|_| Error::validation(format!("'{}' is not hex", s)))?;
    bytes
        .try_into()
        .map_err(|_| Error::validation(format!("'{}' is not a 32-byte digest", s)))
}

/// Serde adapter that renders digests as hex strings
pub mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_digest(&s).map_err(serde::de::Error::custom)
    }
}
