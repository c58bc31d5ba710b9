//! Migration options.

use std::time::Duration;

use rusty_migrate_storage::{
    max_object_size, PartSizing, RetrySettings, MAX_KEYS_PER_PAGE, MAX_PARTS, MAX_PART_SIZE,
    MIN_PART_SIZE,
};
use serde::Deserialize;

use crate::error::MigrationError;

/// Default number of objects migrated at once.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default bounded wait when publishing a result (5 seconds).
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;

/// Options for a migration job.
///
/// Deserializes with defaults for every missing field, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MigrationOptions {
    /// Maximum objects migrated at once.
    pub concurrency: usize,
    /// Maximum parts of one object uploaded at once. Defaults to
    /// `concurrency` when unset.
    pub part_concurrency: Option<usize>,
    /// Keys requested per listing page (1..=1000).
    pub page_size: i32,
    /// Objects larger than this are skipped. 0 disables the check.
    pub skip_size: u64,
    /// Copy even when the target is at least as new as the source.
    pub force_overwrite: bool,
    /// Objects at or above this size use a multipart copy.
    pub multipart_threshold: u64,
    /// Preferred part size when the source reports no part count.
    pub part_size: u64,
    /// Largest part the target accepts.
    pub max_part_size: u64,
    /// Most parts the target accepts in one upload.
    pub max_parts: u64,
    /// Bounded wait for publishing one result, in milliseconds.
    pub publish_timeout_ms: u64,
    /// Retry settings for the source metadata fetch.
    pub metadata_retry: RetrySettings,
    /// Log every completed object at info level instead of debug.
    pub verbose: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            part_concurrency: None,
            page_size: MAX_KEYS_PER_PAGE,
            skip_size: 0,
            force_overwrite: false,
            multipart_threshold: MIN_PART_SIZE,
            part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_parts: MAX_PARTS,
            publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
            metadata_retry: RetrySettings::default(),
            verbose: false,
        }
    }
}

impl MigrationOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrent objects.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set maximum concurrent parts per multipart object.
    pub fn with_part_concurrency(mut self, part_concurrency: usize) -> Self {
        self.part_concurrency = Some(part_concurrency);
        self
    }

    /// Set the listing page size.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Skip objects larger than `skip_size` bytes (0 disables).
    pub fn with_skip_size(mut self, skip_size: u64) -> Self {
        self.skip_size = skip_size;
        self
    }

    /// Overwrite targets regardless of their modification time.
    pub fn with_force_overwrite(mut self, force: bool) -> Self {
        self.force_overwrite = force;
        self
    }

    /// Set the direct/multipart threshold.
    pub fn with_multipart_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = threshold;
        self
    }

    /// Set the preferred part size.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Set the part-count limit.
    pub fn with_max_parts(mut self, max_parts: u64) -> Self {
        self.max_parts = max_parts;
        self
    }

    /// Set the largest allowed part.
    pub fn with_max_part_size(mut self, max_part_size: u64) -> Self {
        self.max_part_size = max_part_size;
        self
    }

    /// Set the bounded wait for result publishing.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set retry settings for the source metadata fetch.
    pub fn with_metadata_retry(mut self, retry: RetrySettings) -> Self {
        self.metadata_retry = retry;
        self
    }

    /// Log every completed object at info level.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Effective part-level concurrency.
    pub fn effective_part_concurrency(&self) -> usize {
        self.part_concurrency.unwrap_or(self.concurrency).max(1)
    }

    /// Bounded wait for result publishing.
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Largest object that can be migrated.
    pub fn max_object_size(&self) -> u64 {
        max_object_size(self.max_parts, self.max_part_size)
    }

    /// Part sizing limits for the planner.
    pub fn part_sizing(&self) -> PartSizing {
        PartSizing {
            part_size: self.part_size,
            max_parts: self.max_parts,
            max_part_size: self.max_part_size,
        }
    }

    /// Check the options for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), MigrationError> {
        let invalid = |message: String| Err(MigrationError::InvalidConfig { message });

        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".into());
        }
        if self.part_concurrency == Some(0) {
            return invalid("part_concurrency must be at least 1".into());
        }
        if !(1..=MAX_KEYS_PER_PAGE).contains(&self.page_size) {
            return invalid(format!(
                "page_size must be between 1 and {MAX_KEYS_PER_PAGE}, got {}",
                self.page_size
            ));
        }
        if self.multipart_threshold == 0 {
            return invalid("multipart_threshold must be at least 1 byte".into());
        }
        if self.part_size == 0 || self.part_size > self.max_part_size {
            return invalid(format!(
                "part_size must be between 1 and {} bytes, got {}",
                self.max_part_size, self.part_size
            ));
        }
        if self.max_parts == 0 {
            return invalid("max_parts must be at least 1".into());
        }
        if self.metadata_retry.max_attempts == 0 {
            return invalid("metadata_retry.max_attempts must be at least 1".into());
        }
        Ok(())
    }
}
