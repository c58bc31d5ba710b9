//! Migration job context.
//!
//! A [`MigrationManager`] owns everything shared by a job: both endpoints,
//! the options, the progress tracker, the object-level concurrency gate, the
//! optional result sender and the fatal-halt slot. Per object it hands out an
//! [`ObjectMigration`], which shares those handles and owns only the
//! object's identity and its own fetched metadata, so concurrent tasks never
//! write the same per-object field.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::error;
use rusty_migrate_storage::{ObjectDescriptor, ObjectMetadata, StorageClient};
use tokio::sync::{mpsc, Semaphore};

use crate::error::MigrationError;
use crate::options::MigrationOptions;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::results::CopyResult;

/// A bucket (and optional key prefix) behind a storage client.
#[derive(Clone)]
pub struct Endpoint {
    /// Client used for every call against this endpoint.
    pub client: Arc<dyn StorageClient>,
    /// Bucket name.
    pub bucket: String,
    /// Key prefix. On the source it scopes the listing; on the target it
    /// replaces the source prefix.
    pub prefix: String,
}

impl Endpoint {
    /// Create an endpoint for a whole bucket.
    pub fn new(client: Arc<dyn StorageClient>, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: String::new(),
        }
    }

    /// Scope the endpoint to a key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Read-only session state shared by every task of a job.
#[derive(Debug)]
pub(crate) struct Session {
    pub source: Endpoint,
    pub target: Endpoint,
    pub options: MigrationOptions,
}

/// First fatal error of a job. Once set, no new work is dispatched.
#[derive(Debug, Default)]
pub(crate) struct HaltSlot(Mutex<Option<MigrationError>>);

impl HaltSlot {
    fn trip(&self, error: MigrationError) {
        let mut slot = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            error!("Halting migration: {}", error);
            *slot = Some(error);
        }
    }

    fn get(&self) -> Option<MigrationError> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Context for one migration job.
///
/// Cloning is cheap: every field is a shared handle, and clones drive the
/// same job.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    pub(crate) session: Arc<Session>,
    pub(crate) progress: Arc<ProgressTracker>,
    pub(crate) gate: Arc<Semaphore>,
    pub(crate) results: Option<mpsc::Sender<CopyResult>>,
    halt: Arc<HaltSlot>,
}

impl MigrationManager {
    /// Create a manager for copying `source` into `target`.
    ///
    /// # Arguments
    /// * `source` - Endpoint objects are read from
    /// * `target` - Endpoint objects are written to
    /// * `options` - Job options; validated here
    ///
    /// # Returns
    /// The manager, or [`MigrationError::InvalidConfig`] for unusable options.
    pub fn new(
        source: Endpoint,
        target: Endpoint,
        options: MigrationOptions,
    ) -> Result<Self, MigrationError> {
        options.validate()?;
        let gate = Arc::new(Semaphore::new(options.concurrency));

        Ok(Self {
            session: Arc::new(Session {
                source,
                target,
                options,
            }),
            progress: Arc::new(ProgressTracker::new()),
            gate,
            results: None,
            halt: Arc::new(HaltSlot::default()),
        })
    }

    /// Publish a [`CopyResult`] for every object on `sender`.
    pub fn with_result_sender(mut self, sender: mpsc::Sender<CopyResult>) -> Self {
        self.results = Some(sender);
        self
    }

    /// Report into an existing tracker instead of a fresh one.
    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// Job options.
    pub fn options(&self) -> &MigrationOptions {
        &self.session.options
    }

    /// Source endpoint.
    pub fn source(&self) -> &Endpoint {
        &self.session.source
    }

    /// Target endpoint.
    pub fn target(&self) -> &Endpoint {
        &self.session.target
    }

    /// Shared progress tracker.
    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Current progress counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// The fatal error that halted this job, if any.
    pub fn halted(&self) -> Option<MigrationError> {
        self.halt.get()
    }

    /// Map a source key to its target key by swapping the endpoint prefixes.
    pub fn target_key(&self, source_key: &str) -> String {
        let relative: &str = source_key
            .strip_prefix(self.session.source.prefix.as_str())
            .unwrap_or(source_key);
        format!("{}{}", self.session.target.prefix, relative)
    }

    /// Build the per-object task descriptor for one listed object.
    pub fn object(&self, descriptor: &ObjectDescriptor) -> ObjectMigration {
        ObjectMigration {
            manager: self.clone(),
            source_key: descriptor.key.clone(),
            target_key: self.target_key(&descriptor.key),
            size: descriptor.size,
            source_metadata: None,
        }
    }

    /// Stop all further dispatch of this job.
    pub(crate) fn halt(&self, error: MigrationError) {
        self.halt.trip(error);
    }

    /// Return the halting error if the job has been halted.
    pub(crate) fn check_halted(&self) -> Result<(), MigrationError> {
        match self.halt.get() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// One object's migration: shared job handles plus per-object identity.
#[derive(Debug)]
pub struct ObjectMigration {
    pub(crate) manager: MigrationManager,
    pub(crate) source_key: String,
    pub(crate) target_key: String,
    pub(crate) size: u64,
    pub(crate) source_metadata: Option<ObjectMetadata>,
}

impl ObjectMigration {
    /// Key read from the source bucket.
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    /// Key written to the target bucket.
    pub fn target_key(&self) -> &str {
        &self.target_key
    }

    /// Object size as listed.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Source metadata fetched by the decision step, once it has run.
    pub fn source_metadata(&self) -> Option<&ObjectMetadata> {
        self.source_metadata.as_ref()
    }

    pub(crate) fn source(&self) -> &Endpoint {
        &self.manager.session.source
    }

    pub(crate) fn target(&self) -> &Endpoint {
        &self.manager.session.target
    }

    pub(crate) fn options(&self) -> &MigrationOptions {
        &self.manager.session.options
    }

    pub(crate) fn progress(&self) -> &ProgressTracker {
        &self.manager.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_migrate_storage::MemoryStorageClient;

    fn manager(source_prefix: &str, target_prefix: &str) -> MigrationManager {
        let client: Arc<dyn StorageClient> = Arc::new(MemoryStorageClient::new());
        MigrationManager::new(
            Endpoint::new(Arc::clone(&client), "src").with_prefix(source_prefix),
            Endpoint::new(client, "dst").with_prefix(target_prefix),
            MigrationOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_target_key_same_bucket_layout() {
        let manager = manager("", "");
        assert_eq!(manager.target_key("a/b/c.txt"), "a/b/c.txt");
    }

    #[test]
    fn test_target_key_swaps_prefix() {
        let manager = manager("2024/", "archive/2024/");
        assert_eq!(manager.target_key("2024/jan.csv"), "archive/2024/jan.csv");
    }

    #[test]
    fn test_object_clones_identity_only() {
        let manager = manager("", "copy/");
        let object = manager.object(&ObjectDescriptor::new("k", 42));
        assert_eq!(object.source_key(), "k");
        assert_eq!(object.target_key(), "copy/k");
        assert_eq!(object.size(), 42);
        assert!(object.source_metadata().is_none());
        assert!(Arc::ptr_eq(&object.manager.progress, &manager.progress));
        assert!(Arc::ptr_eq(&object.manager.gate, &manager.gate));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let client: Arc<dyn StorageClient> = Arc::new(MemoryStorageClient::new());
        let result = MigrationManager::new(
            Endpoint::new(Arc::clone(&client), "src"),
            Endpoint::new(client, "dst"),
            MigrationOptions::default().with_concurrency(0),
        );
        assert!(matches!(result, Err(MigrationError::InvalidConfig { .. })));
    }

    #[test]
    fn test_first_halt_wins() {
        let manager = manager("", "");
        assert!(manager.check_halted().is_ok());

        manager.halt(MigrationError::MissingContinuationToken {
            bucket: "src".into(),
        });
        manager.halt(MigrationError::TaskFailed {
            message: "later".into(),
        });

        assert!(matches!(
            manager.check_halted(),
            Err(MigrationError::MissingContinuationToken { .. })
        ));
    }
}
