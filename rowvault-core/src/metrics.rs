//! # Metrics and Monitoring
//!
//! Counters shared by the stores and the orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Row store
    rows_written: AtomicU64,
    rows_deduplicated: AtomicU64,
    bytes_written: AtomicU64,

    // Commit graph / refs
    commits_created: AtomicU64,
    ref_updates: AtomicU64,
    ref_conflicts: AtomicU64,

    // Jobs
    jobs_created: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    rounds_executed: AtomicU64,
    rows_sampled: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a row write; `new_row` is false when content was already stored
    pub fn record_row_write(&self, new_row: bool, bytes: u64) {
        if new_row {
            self.inner.rows_written.fetch_add(1, Ordering::Relaxed);
            self.inner.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.inner.rows_deduplicated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_commit(&self) {
        self.inner.commits_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ref_update(&self) {
        self.inner.ref_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ref_conflict(&self) {
        self.inner.ref_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_created(&self) {
        self.inner.jobs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_completed(&self) {
        self.inner.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_failed(&self) {
        self.inner.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_round(&self, rows_selected: u64) {
        self.inner.rounds_executed.fetch_add(1, Ordering::Relaxed);
        self.inner.rows_sampled.fetch_add(rows_selected, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            rows_written: load(&self.inner.rows_written),
            rows_deduplicated: load(&self.inner.rows_deduplicated),
            bytes_written: load(&self.inner.bytes_written),
            commits_created: load(&self.inner.commits_created),
            ref_updates: load(&self.inner.ref_updates),
            ref_conflicts: load(&self.inner.ref_conflicts),
            jobs_created: load(&self.inner.jobs_created),
            jobs_completed: load(&self.inner.jobs_completed),
            jobs_failed: load(&self.inner.jobs_failed),
            rounds_executed: load(&self.inner.rounds_executed),
            rows_sampled: load(&self.inner.rows_sampled),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rows_written: u64,
    pub rows_deduplicated: u64,
    pub bytes_written: u64,
    pub commits_created: u64,
    pub ref_updates: u64,
    pub ref_conflicts: u64,
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub rounds_executed: u64,
    pub rows_sampled: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start new timer
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) -> Duration {
        let duration = self.elapsed();
        tracing::debug!(
            name = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_write_accounting() {
        let metrics = Metrics::new();
        metrics.record_row_write(true, 100);
        metrics.record_row_write(false, 100);
        metrics.record_row_write(false, 100);
        let snap = metrics.snapshot();
        assert_eq!(snap.rows_written, 1);
        assert_eq!(snap.rows_deduplicated, 2);
        assert_eq!(snap.bytes_written, 100);
    }

    #[test]
    fn test_clones_share_counters() {
        let a = Metrics::new();
        let b = a.clone();
        b.record_round(7);
        assert_eq!(a.snapshot().rows_sampled, 7);
        assert_eq!(a.snapshot().rounds_executed, 1);
    }
}
