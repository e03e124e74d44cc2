//! # Common Utilities
//!
//! Name validation and small helpers used throughout rowvault.

use crate::error::{Error, Result};
use crate::types::Timestamp;

/// Maximum length of a ref name
pub const MAX_REF_NAME_LEN: usize = 255;
/// Maximum length of column names and table keys
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Current wall-clock time
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Format bytes in human readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exp = (bytes_f64.log2() / 10.0).floor() as usize;
    let unit_index = exp.min(UNITS.len() - 1);
    let size = bytes_f64 / (1024_f64).powi(unit_index as i32);

    if size >= 100.0 {
        format!("{:.0} {}", size, UNITS[unit_index])
    } else if size >= 10.0 {
        format!("{:.1} {}", size, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Column names: letters, digits and underscores, not starting with a digit
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::validation(format!(
            "{} must be 1..={} characters",
            what, MAX_IDENTIFIER_LEN
        )));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !first_ok || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::validation(format!("invalid {} '{}'", what, name)));
    }
    Ok(())
}

/// Table keys prefix logical row ids, so they cannot contain ':'
pub fn validate_table_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::validation(format!(
            "table key must be 1..={} characters",
            MAX_IDENTIFIER_LEN
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::validation(format!("invalid table key '{}'", key)));
    }
    Ok(())
}

/// Branch and tag names, git-style
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_REF_NAME_LEN {
        return Err(Error::validation(format!(
            "ref name must be 1..={} characters",
            MAX_REF_NAME_LEN
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-');
    if !name.chars().all(allowed)
        || name.contains("..")
        || name.contains("//")
        || name.starts_with('/')
        || name.ends_with('/')
    {
        return Err(Error::validation(format!("invalid ref name '{}'", name)));
    }
    Ok(())
}
