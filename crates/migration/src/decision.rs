//! Per-object decision: skip, copy directly, or copy in parts.

use log::debug;
use rusty_migrate_storage::{transfer_mode, ObjectMetadata, StorageError, TransferMode};

use crate::error::MigrationError;
use crate::manager::ObjectMigration;
use crate::retry::{with_backoff, RetryExhausted};

/// Why an object was not transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The target copy is at least as new as the source.
    TargetCurrent,
}

/// Successful outcome of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOutcome {
    /// The object was copied to the target.
    Migrated { mode: TransferMode, bytes: u64 },
    /// The object was left as it is.
    Skipped(SkipReason),
}

impl ObjectMigration {
    /// Decide what to do with the object and do it.
    ///
    /// Checks run cheapest first: the size limits need no network call, the
    /// source metadata fetch is retried, and the target freshness check is a
    /// single attempt. Counters for skips and migrations are updated here;
    /// transferred bytes are counted by the transfer itself.
    ///
    /// # Returns
    /// The outcome, or the error that stopped the object. An object above
    /// the skip size returns [`MigrationError::SkipLimitExceeded`].
    pub async fn run(&mut self) -> Result<ObjectOutcome, MigrationError> {
        let options = self.options();

        let limit: u64 = options.max_object_size();
        if self.size > limit {
            return Err(MigrationError::SizeExceeded {
                key: self.source_key.clone(),
                size: self.size,
                limit,
            });
        }

        if options.skip_size > 0 && self.size > options.skip_size {
            let limit: u64 = options.skip_size;
            debug!(
                "Skipping {}: {} bytes is above the {} byte skip size",
                self.source_key, self.size, limit
            );
            self.progress().increment_skipped();
            return Err(MigrationError::SkipLimitExceeded {
                key: self.source_key.clone(),
                size: self.size,
                limit,
            });
        }

        let source_metadata: ObjectMetadata = self.fetch_source_metadata().await?;
        let source_modified: Option<i64> = source_metadata.last_modified;
        self.source_metadata = Some(source_metadata);

        if !self.options().force_overwrite && self.target_is_current(source_modified).await? {
            debug!("Skipping {}: target is up to date", self.source_key);
            self.progress().increment_skipped();
            return Ok(ObjectOutcome::Skipped(SkipReason::TargetCurrent));
        }

        let mode: TransferMode = transfer_mode(self.size, self.options().multipart_threshold);
        let bytes: u64 = match mode {
            TransferMode::Direct => self.direct_copy().await?,
            TransferMode::Multipart => self.multipart_copy().await?,
        };

        self.progress().increment_migrated();
        Ok(ObjectOutcome::Migrated { mode, bytes })
    }

    /// Fetch source metadata, retrying transient failures.
    async fn fetch_source_metadata(&self) -> Result<ObjectMetadata, MigrationError> {
        let source = self.source();
        let what: String = format!("head s3://{}/{}", source.bucket, self.source_key);

        let metadata: Option<ObjectMetadata> =
            with_backoff(&self.options().metadata_retry, &what, move || {
                source.client.head_object(&source.bucket, &self.source_key)
            })
            .await
            .map_err(|RetryExhausted { attempts, error }| match error {
                StorageError::NotFound { bucket, key } => {
                    MigrationError::SourceNotFound { bucket, key }
                }
                error => MigrationError::MetadataFetch {
                    key: self.source_key.clone(),
                    attempts,
                    source: error,
                },
            })?;

        metadata.ok_or_else(|| MigrationError::SourceNotFound {
            bucket: source.bucket.clone(),
            key: self.source_key.clone(),
        })
    }

    /// Whether the target already holds a copy at least as new as the
    /// source. A missing timestamp on either side never counts as current.
    async fn target_is_current(&self, source_modified: Option<i64>) -> Result<bool, MigrationError> {
        let target = self.target();
        let existing: Option<ObjectMetadata> = target
            .client
            .head_object(&target.bucket, &self.target_key)
            .await
            .map_err(MigrationError::storage(&self.target_key, "head target object"))?;

        Ok(match (existing.and_then(|m| m.last_modified), source_modified) {
            (Some(target_modified), Some(source_modified)) => target_modified >= source_modified,
            _ => false,
        })
    }
}
