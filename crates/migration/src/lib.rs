//! Concurrent bucket-to-bucket object migration.
//!
//! A [`MigrationManager`] copies objects from a source [`Endpoint`] to a
//! target [`Endpoint`]. Each object is handled by its own task:
//!
//! 1. Objects above the largest possible upload fail, objects above the
//!    configured skip size are skipped.
//! 2. Source metadata is fetched (with retries), and the object is skipped
//!    when the target already holds a copy at least as new.
//! 3. Small objects are copied with one get and one put; objects at or
//!    above the multipart threshold are copied as ranged parts into a
//!    multipart upload, which is aborted if any part fails.
//!
//! Objects come either from a paginated listing ([`PageDispatcher`]) or
//! from pre-enumerated `key|size` entries
//! ([`MigrationManager::migrate_batch`]). Aggregate counters live in a
//! shared [`ProgressTracker`]; per-object outcomes can be streamed as
//! [`CopyResult`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rusty_migrate::{Endpoint, MigrationManager, MigrationOptions};
//! use rusty_migrate_storage::{MemoryStorageClient, StorageClient};
//!
//! # async fn example() -> Result<(), rusty_migrate::MigrationError> {
//! let client: Arc<dyn StorageClient> = Arc::new(MemoryStorageClient::new());
//! let manager = MigrationManager::new(
//!     Endpoint::new(Arc::clone(&client), "source-bucket"),
//!     Endpoint::new(client, "target-bucket").with_prefix("backup/"),
//!     MigrationOptions::default().with_concurrency(32),
//! )?;
//!
//! let snapshot = manager.pages().run().await?;
//! println!("{snapshot}");
//! # Ok(())
//! # }
//! ```

mod batch;
mod decision;
mod dispatch;
mod error;
mod manager;
mod options;
mod progress;
mod results;
mod retry;
mod transfer;

pub use batch::{parse_batch, parse_batch_entry, BatchSummary};
pub use decision::{ObjectOutcome, SkipReason};
pub use dispatch::{PageDispatcher, PageOutcome};
pub use error::MigrationError;
pub use manager::{Endpoint, MigrationManager, ObjectMigration};
pub use options::{MigrationOptions, DEFAULT_CONCURRENCY, DEFAULT_PUBLISH_TIMEOUT_MS};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use results::{result_channel, CopyResult};
