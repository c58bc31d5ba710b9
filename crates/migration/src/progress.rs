//! Shared progress counters for a migration job.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::MigrationError;

/// Aggregate counters mutated by every concurrent migration task.
///
/// Scalar counters are atomics; the failure map is the only locked state and
/// the lock is held just for the insert. Nothing here blocks on I/O or
/// returns an error.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total_objects: AtomicU64,
    total_bytes: AtomicU64,
    migrated_objects: AtomicU64,
    skipped_objects: AtomicU64,
    completed_bytes: AtomicU64,
    failed_objects: Mutex<HashMap<String, MigrationError>>,
}

impl ProgressTracker {
    /// Create a tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more dispatched object.
    pub fn increment_objects(&self) {
        self.total_objects.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a dispatched object's size to the byte total.
    pub fn add_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count one more successfully migrated object.
    pub fn increment_migrated(&self) {
        self.migrated_objects.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one more intentionally skipped object.
    pub fn increment_skipped(&self) {
        self.skipped_objects.fetch_add(1, Ordering::Relaxed);
    }

    /// Add bytes that have landed on the target.
    pub fn add_completed_bytes(&self, bytes: u64) {
        self.completed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record the failure of an object. A later failure for the same key
    /// replaces the earlier one.
    pub fn record_failure(&self, key: impl Into<String>, error: MigrationError) {
        self.failures_guard().insert(key.into(), error);
    }

    /// Number of failed objects.
    pub fn failure_count(&self) -> usize {
        self.failures_guard().len()
    }

    /// Copy of the failure map.
    pub fn failures(&self) -> HashMap<String, MigrationError> {
        self.failures_guard().clone()
    }

    /// Error recorded for one key.
    pub fn failure(&self, key: &str) -> Option<MigrationError> {
        self.failures_guard().get(key).cloned()
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_objects: self.total_objects.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            migrated_objects: self.migrated_objects.load(Ordering::Relaxed),
            skipped_objects: self.skipped_objects.load(Ordering::Relaxed),
            completed_bytes: self.completed_bytes.load(Ordering::Relaxed),
            failed_objects: self.failure_count() as u64,
        }
    }

    fn failures_guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, MigrationError>> {
        self.failed_objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Counters of a [`ProgressTracker`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Objects dispatched so far.
    pub total_objects: u64,
    /// Bytes of all dispatched objects.
    pub total_bytes: u64,
    /// Objects copied to the target.
    pub migrated_objects: u64,
    /// Objects intentionally not copied.
    pub skipped_objects: u64,
    /// Bytes that have landed on the target.
    pub completed_bytes: u64,
    /// Objects that failed.
    pub failed_objects: u64,
}

impl ProgressSnapshot {
    /// Objects dispatched but not yet finished.
    pub fn pending_objects(&self) -> u64 {
        self.total_objects
            .saturating_sub(self.migrated_objects + self.skipped_objects + self.failed_objects)
    }

    /// Completed bytes as a percentage of total bytes.
    pub fn percent_bytes(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.completed_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} objects migrated, {} skipped, {} failed; {}/{} bytes ({:.1}%)",
            self.migrated_objects,
            self.total_objects,
            self.skipped_objects,
            self.failed_objects,
            self.completed_bytes,
            self.total_bytes,
            self.percent_bytes()
        )
    }
}
