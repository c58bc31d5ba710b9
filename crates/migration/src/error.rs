//! Error types for migration operations.

use rusty_migrate_storage::{PartPlanError, StorageError};
use thiserror::Error;

/// Errors produced while migrating objects.
///
/// Variants fall into three groups: the expected skip
/// ([`MigrationError::SkipLimitExceeded`]), per-object failures that are
/// recorded and isolated to one object, and fatal conditions
/// ([`MigrationError::is_fatal`]) that halt the whole run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrationError {
    /// Object is larger than the biggest possible multipart upload.
    #[error("{key} is {size} bytes, above the {limit} byte maximum object size")]
    SizeExceeded { key: String, size: u64, limit: u64 },

    /// Object is larger than the configured skip size. Not a real failure.
    #[error("skip limit exceeded: {key} is {size} bytes, limit is {limit}")]
    SkipLimitExceeded { key: String, size: u64, limit: u64 },

    /// Source object disappeared between listing and transfer.
    #[error("source object s3://{bucket}/{key} no longer exists")]
    SourceNotFound { bucket: String, key: String },

    /// Source metadata could not be fetched within the retry budget.
    #[error("fetching metadata for {key} failed after {attempts} attempt(s): {source}")]
    MetadataFetch {
        key: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// A storage call failed for one object.
    #[error("{operation} failed for {key}: {source}")]
    Storage {
        key: String,
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    /// Listing the source bucket failed.
    #[error("listing s3://{bucket} failed: {source}")]
    Listing {
        bucket: String,
        #[source]
        source: StorageError,
    },

    /// A part upload succeeded without returning an ETag.
    #[error("part {part_number} of {key} was uploaded without an ETag")]
    MissingPartETag { key: String, part_number: i32 },

    /// Part layout could not be planned.
    #[error("cannot plan multipart copy of {key}: {source}")]
    PartPlan {
        key: String,
        #[source]
        source: PartPlanError,
    },

    /// The listing reported more results but no cursor to fetch them.
    #[error("listing of s3://{bucket} is truncated but returned no continuation token")]
    MissingContinuationToken { bucket: String },

    /// A failed multipart upload could not be aborted; its parts are orphaned.
    #[error("aborting multipart upload {upload_id} for {key} failed: {abort}; original failure: {cause}")]
    AbortFailed {
        key: String,
        upload_id: String,
        abort: StorageError,
        cause: Box<MigrationError>,
    },

    /// The concurrency gate was closed before the object could start.
    #[error("concurrency gate closed before {key} could start")]
    GateClosed { key: String },

    /// The object was never started because the job had already halted.
    #[error("{key} not started, migration halted: {cause}")]
    Halted {
        key: String,
        cause: Box<MigrationError>,
    },

    /// A migration task panicked or was cancelled.
    #[error("migration task failed: {message}")]
    TaskFailed { message: String },

    /// A batch line is not in `key|size` form.
    #[error("invalid batch entry on line {line}: {entry:?}")]
    InvalidBatchEntry { line: usize, entry: String },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl MigrationError {
    /// Whether this is the expected "too large, skipped" outcome.
    pub fn is_skip(&self) -> bool {
        matches!(self, MigrationError::SkipLimitExceeded { .. })
    }

    /// Whether this error must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        match self {
            MigrationError::MissingContinuationToken { .. }
            | MigrationError::AbortFailed { .. }
            | MigrationError::TaskFailed { .. }
            | MigrationError::InvalidBatchEntry { .. }
            | MigrationError::InvalidConfig { .. } => true,
            MigrationError::PartPlan { source, .. } => {
                matches!(source, PartPlanError::TooManyParts { .. })
            }
            _ => false,
        }
    }

    /// The object key this error belongs to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            MigrationError::SizeExceeded { key, .. }
            | MigrationError::SkipLimitExceeded { key, .. }
            | MigrationError::SourceNotFound { key, .. }
            | MigrationError::MetadataFetch { key, .. }
            | MigrationError::Storage { key, .. }
            | MigrationError::MissingPartETag { key, .. }
            | MigrationError::PartPlan { key, .. }
            | MigrationError::AbortFailed { key, .. }
            | MigrationError::Halted { key, .. }
            | MigrationError::GateClosed { key } => Some(key),
            _ => None,
        }
    }

    /// Build a closure that wraps a storage error for `key`.
    pub(crate) fn storage<'a>(
        key: &'a str,
        operation: &'static str,
    ) -> impl FnOnce(StorageError) -> MigrationError + 'a {
        move |source| MigrationError::Storage {
            key: key.to_string(),
            operation,
            source,
        }
    }
}
