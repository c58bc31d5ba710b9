//! Task dispatch and the page-driven listing loop.
//!
//! Every object runs as its own tokio task. A task first takes a slot from
//! the manager's concurrency gate, runs the per-object decision, gives the
//! slot back, accounts the outcome and publishes a [`CopyResult`].
//!
//! [`PageDispatcher`] feeds tasks from a paginated listing of the source
//! bucket, one page per call, so a caller can pace the listing and resume
//! it from a saved continuation token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rusty_migrate_storage::{ListPage, ObjectDescriptor};
use tokio::task::{JoinError, JoinSet};

use crate::decision::ObjectOutcome;
use crate::error::MigrationError;
use crate::manager::{MigrationManager, ObjectMigration};
use crate::progress::ProgressSnapshot;
use crate::results::{publish, CopyResult};

/// How a finished task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    Migrated,
    Skipped,
    Failed,
}

impl MigrationManager {
    /// Count a listed object into the totals and spawn its task.
    pub(crate) fn spawn_object(
        &self,
        tasks: &mut JoinSet<TaskStatus>,
        descriptor: &ObjectDescriptor,
    ) {
        self.progress.increment_objects();
        self.progress.add_bytes(descriptor.size);
        tasks.spawn(self.object(descriptor).execute());
    }

    /// Turn a task join failure into a fatal halt.
    pub(crate) fn task_joined(&self, joined: Result<TaskStatus, JoinError>) -> TaskStatus {
        match joined {
            Ok(status) => status,
            Err(e) => {
                self.halt(MigrationError::TaskFailed {
                    message: e.to_string(),
                });
                TaskStatus::Failed
            }
        }
    }

    /// Create a page-driven dispatcher over the source listing.
    pub fn pages(&self) -> PageDispatcher {
        PageDispatcher {
            manager: self.clone(),
            token: None,
            done: false,
            tasks: JoinSet::new(),
        }
    }
}

impl ObjectMigration {
    /// Run the object inside a concurrency slot and report the outcome.
    ///
    /// A task that gets its slot after the job halted does no transfer and
    /// reports [`MigrationError::Halted`].
    pub(crate) async fn execute(mut self) -> TaskStatus {
        let gate = Arc::clone(&self.manager.gate);
        let (result, duration): (Result<ObjectOutcome, MigrationError>, Duration) =
            match gate.acquire_owned().await {
                Ok(_permit) => match self.manager.check_halted() {
                    Err(cause) => {
                        debug!("Not starting {}: migration halted", self.source_key);
                        (
                            Err(MigrationError::Halted {
                                key: self.source_key.clone(),
                                cause: Box::new(cause),
                            }),
                            Duration::ZERO,
                        )
                    }
                    Ok(()) => {
                        let started = Instant::now();
                        let result = self.run().await;
                        (result, started.elapsed())
                    }
                },
                Err(_) => (
                    Err(MigrationError::GateClosed {
                        key: self.source_key.clone(),
                    }),
                    Duration::ZERO,
                ),
            };

        let status: TaskStatus = self.account(&result);
        let (bytes_copied, mode) = match &result {
            Ok(ObjectOutcome::Migrated { mode, bytes }) => (*bytes, Some(*mode)),
            _ => (0, None),
        };

        let copy_result = CopyResult {
            success: result.is_ok(),
            skipped: status == TaskStatus::Skipped,
            error: result.err(),
            duration,
            bytes_copied,
            mode,
            source_key: self.source_key,
            target_key: self.target_key,
        };

        if let Some(sender) = &self.manager.results {
            publish(sender, copy_result, self.manager.options().publish_timeout()).await;
        }
        status
    }

    /// Log the outcome and record failures. Fatal failures halt the job.
    fn account(&self, result: &Result<ObjectOutcome, MigrationError>) -> TaskStatus {
        match result {
            Ok(ObjectOutcome::Migrated { mode, bytes }) => {
                if self.options().verbose {
                    info!(
                        "Migrated {} -> {} ({} bytes, {:?})",
                        self.source_key, self.target_key, bytes, mode
                    );
                } else {
                    debug!(
                        "Migrated {} -> {} ({} bytes, {:?})",
                        self.source_key, self.target_key, bytes, mode
                    );
                }
                TaskStatus::Migrated
            }
            Ok(ObjectOutcome::Skipped(_)) => TaskStatus::Skipped,
            Err(e) if e.is_skip() => TaskStatus::Skipped,
            Err(e) => {
                warn!("Failed to migrate {}: {}", self.source_key, e);
                self.progress().record_failure(self.source_key.clone(), e.clone());
                if e.is_fatal() {
                    self.manager.halt(e.clone());
                }
                TaskStatus::Failed
            }
        }
    }
}

/// Result of dispatching one listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    /// Objects dispatched from this page.
    pub dispatched: usize,
    /// True when the listing has no further pages.
    pub is_done: bool,
    /// Token for the next page, if any.
    pub next_token: Option<String>,
}

/// Page-driven dispatcher over the source listing.
///
/// Dropping a dispatcher detaches its in-flight tasks instead of aborting
/// them, so no multipart session is cut off mid-transfer.
#[derive(Debug)]
pub struct PageDispatcher {
    manager: MigrationManager,
    token: Option<String>,
    done: bool,
    tasks: JoinSet<TaskStatus>,
}

impl PageDispatcher {
    /// Resume the listing after a previously returned token.
    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Token the next page will be requested with.
    pub fn continuation_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether the listing has been exhausted.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Tasks spawned but not yet joined.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// List one page and spawn a task for each object on it.
    ///
    /// # Returns
    /// The page outcome. After the listing is exhausted this returns an
    /// empty, done outcome without calling the storage service. Fails with
    /// the halting error once the job is halted, and halts the job when a
    /// truncated page carries no continuation token.
    pub async fn dispatch_next_page(&mut self) -> Result<PageOutcome, MigrationError> {
        self.manager.check_halted()?;
        if self.done {
            return Ok(PageOutcome {
                dispatched: 0,
                is_done: true,
                next_token: None,
            });
        }

        let source = self.manager.source();
        let page: ListPage = source
            .client
            .list_objects_page(
                &source.bucket,
                &source.prefix,
                self.token.as_deref(),
                self.manager.options().page_size,
            )
            .await
            .map_err(|e| MigrationError::Listing {
                bucket: source.bucket.clone(),
                source: e,
            })?;

        if page.is_truncated && page.next_token.is_none() {
            let error = MigrationError::MissingContinuationToken {
                bucket: source.bucket.clone(),
            };
            self.manager.halt(error.clone());
            return Err(error);
        }

        for descriptor in &page.objects {
            self.manager.spawn_object(&mut self.tasks, descriptor);
        }

        self.done = !page.is_truncated;
        self.token = if self.done { None } else { page.next_token };

        info!(
            "Dispatched {} objects from s3://{}/{} ({} in flight)",
            page.objects.len(),
            source.bucket,
            source.prefix,
            self.tasks.len()
        );

        Ok(PageOutcome {
            dispatched: page.objects.len(),
            is_done: self.done,
            next_token: self.token.clone(),
        })
    }

    /// Wait for every task spawned so far.
    ///
    /// # Returns
    /// The halting error if the job was halted.
    pub async fn wait(&mut self) -> Result<(), MigrationError> {
        while let Some(joined) = self.tasks.join_next().await {
            self.manager.task_joined(joined);
        }
        self.manager.check_halted()
    }

    /// Dispatch every remaining page, then wait for all tasks.
    ///
    /// At most about two pages of tasks are queued at once. On error the
    /// tasks already running are still waited for before returning.
    ///
    /// # Returns
    /// Final progress counters.
    pub async fn run(&mut self) -> Result<ProgressSnapshot, MigrationError> {
        let high_water: usize = self.manager.options().page_size.max(1) as usize;

        while !self.done {
            if let Err(e) = self.dispatch_next_page().await {
                let _ = self.wait().await;
                return Err(e);
            }
            while self.tasks.len() >= high_water {
                if let Some(joined) = self.tasks.join_next().await {
                    self.manager.task_joined(joined);
                }
            }
        }

        self.wait().await?;
        let snapshot: ProgressSnapshot = self.manager.snapshot();
        info!("Migration finished: {}", snapshot);
        Ok(snapshot)
    }
}

impl Drop for PageDispatcher {
    fn drop(&mut self) {
        self.tasks.detach_all();
    }
}
