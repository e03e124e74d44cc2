//! Row object framing for persistent stores.
//!
//! ```text
//! ┌────────┬─────────┬────────────┬──────────────────────┐
//! │ "RVRW" │ version │ crc32 (BE) │ MessagePack(RowData) │
//! │ 4 B    │ 1 B     │ 4 B        │ variable             │
//! └────────┴─────────┴────────────┴──────────────────────┘
//! ```

use crate::crypto::crc32_checksum;
use crate::error::{Error, Result};
use crate::value::RowData;

const ROW_MAGIC: &[u8; 4] = b"RVRW";
const ROW_FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 9;

/// Serialize a row into a checksummed object
pub fn encode_row_object(row: &RowData) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec(row)?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(ROW_MAGIC);
    out.push(ROW_FORMAT_VERSION);
    out.extend_from_slice(&crc32_checksum(&payload).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a row object, verifying magic, version and checksum
pub fn decode_row_object(bytes: &[u8]) -> Result<RowData> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != ROW_MAGIC {
        return Err(Error::Corruption {
            details: "row object header is missing".to_string(),
        });
    }
    if bytes[4] != ROW_FORMAT_VERSION {
        return Err(Error::Corruption {
            details: format!("unsupported row object version {}", bytes[4]),
        });
    }
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&bytes[5..9]);
    let expected = u32::from_be_bytes(crc);
    let payload = &bytes[HEADER_LEN..];
    let actual = crc32_checksum(payload);
    if actual != expected {
        return Err(Error::Corruption {
            details: format!("row checksum mismatch: stored {:08x}, computed {:08x}", expected, actual),
        });
    }
    Ok(rmp_serde::from_slice(payload)?)
}
