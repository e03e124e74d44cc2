//! # Configuration Management
//!
//! Handles all configuration for rowvault components. Every section has a
//! `Default`, and missing fields in a config file fall back to it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub sampling: SamplingConfig,
    pub filter: FilterLimits,
    pub jobs: JobConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(s).map_err(|e| Error::Configuration {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Configuration {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |message: String| Err(Error::Configuration { message });
        let s = &self.sampling;
        if !(s.oversampling_factor >= 1.0 && s.oversampling_factor.is_finite()) {
            return bad(format!(
                "sampling.oversampling_factor must be >= 1.0, got {}",
                s.oversampling_factor
            ));
        }
        if !(s.estimation_fraction > 0.0 && s.estimation_fraction <= 1.0) {
            return bad(format!(
                "sampling.estimation_fraction must be in (0, 1], got {}",
                s.estimation_fraction
            ));
        }
        if s.max_strata == 0 || s.random_block_size == 0 {
            return bad("sampling.max_strata and sampling.random_block_size must be positive".into());
        }
        let f = &self.filter;
        if f.max_depth == 0 || f.max_expression_len == 0 || f.max_encoded_len == 0 || f.max_in_list == 0 {
            return bad("filter limits must be positive".into());
        }
        let j = &self.jobs;
        if j.max_concurrent_jobs == 0 || j.max_page_size == 0 {
            return bad("jobs.max_concurrent_jobs and jobs.max_page_size must be positive".into());
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Decoded rows kept in the on-disk store's read cache
    pub row_cache_capacity: usize,
    /// fsync row objects before the rename that publishes them
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            row_cache_capacity: 10_000,
            sync_writes: true,
        }
    }
}

/// Sampling engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Multiplier on hash thresholds to absorb draw variance before truncation
    pub oversampling_factor: f64,
    /// Populations at or below this size use exact ranked selection
    pub exact_selection_threshold: u64,
    /// Share of the population scanned when estimating strata and clusters
    pub estimation_fraction: f64,
    /// Estimation never looks at fewer rows than this (or the whole population)
    pub min_estimation_rows: u64,
    /// Ceiling on distinct strata
    pub max_strata: u64,
    /// Strata estimated below this many rows are dropped with a warning
    pub min_stratum_sample_count: u64,
    /// Systematic sampling sorts at most this many rows
    pub systematic_max_sort_rows: u64,
    /// Rows per block for unseeded block sampling
    pub random_block_size: usize,
    /// Threshold widenings allowed when a hash draw comes up short
    pub max_topup_passes: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            oversampling_factor: 1.5,
            exact_selection_threshold: 100_000_000,
            estimation_fraction: 0.01,
            min_estimation_rows: 10_000,
            max_strata: 10_000,
            min_stratum_sample_count: 1,
            systematic_max_sort_rows: 10_000_000,
            random_block_size: 1024,
            max_topup_passes: 4,
        }
    }
}

/// Bounds on user-supplied filter expressions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterLimits {
    pub max_depth: usize,
    /// Characters in a textual filter or a LIKE pattern
    pub max_expression_len: usize,
    /// Bytes of a filter tree once JSON-encoded; trees built from text count too
    pub max_encoded_len: usize,
    pub max_in_list: usize,
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_expression_len: 1000,
            max_encoded_len: 4000,
            max_in_list: 1000,
        }
    }
}

/// Job orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub max_concurrent_jobs: usize,
    pub poll_interval_ms: u64,
    /// Bounded retries of the output ref compare-and-swap
    pub max_ref_retries: u32,
    pub max_page_size: usize,
    pub output_ref_prefix: String,
}

impl JobConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            poll_interval_ms: 500,
            max_ref_retries: 3,
            max_page_size: 10_000,
            output_ref_prefix: "samples/".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Log formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::from_json_str(r#"{"sampling": {"oversampling_factor": 2.0}}"#).unwrap();
        assert_eq!(config.sampling.oversampling_factor, 2.0);
        assert_eq!(config.sampling.max_strata, 10_000);
        assert_eq!(config.filter.max_depth, 10);
        assert_eq!(config.jobs.output_ref_prefix, "samples/");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_json_str(r#"{"sampling": {"oversampling_factor": 0.5}}"#).is_err());
        assert!(Config::from_json_str(r#"{"sampling": {"estimation_fraction": 0}}"#).is_err());
        assert!(Config::from_json_str(r#"{"jobs": {"max_page_size": 0}}"#).is_err());
    }
}
