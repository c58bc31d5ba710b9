//! Batch-driven dispatch over pre-enumerated `key|size` entries.

use std::fmt;

use log::info;
use rusty_migrate_storage::ObjectDescriptor;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::dispatch::TaskStatus;
use crate::error::MigrationError;
use crate::manager::MigrationManager;

/// Tally of one finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Entries dispatched.
    pub dispatched: usize,
    /// Entries copied to the target.
    pub migrated: usize,
    /// Entries skipped because the target was current or the object was too large.
    pub skipped: usize,
    /// Entries that failed.
    pub failed: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dispatched, {} migrated, {} skipped, {} failed",
            self.dispatched, self.migrated, self.skipped, self.failed
        )
    }
}

/// Parse one `key|size` entry.
///
/// The key may itself contain `|`; the size is taken after the last one.
///
/// # Arguments
/// * `line` - Entry text
/// * `line_number` - 1-based position, used in the error
pub fn parse_batch_entry(line: &str, line_number: usize) -> Result<ObjectDescriptor, MigrationError> {
    let invalid = || MigrationError::InvalidBatchEntry {
        line: line_number,
        entry: line.to_string(),
    };

    let (key, size) = line.trim_end_matches(['\r', '\n']).rsplit_once('|').ok_or_else(invalid)?;
    if key.is_empty() {
        return Err(invalid());
    }
    let size: u64 = size.trim().parse().map_err(|_| invalid())?;

    Ok(ObjectDescriptor::new(key, size))
}

/// Parse every entry of a batch. Blank lines are ignored.
///
/// # Returns
/// The descriptors in input order, or the first malformed entry.
pub fn parse_batch<S: AsRef<str>>(lines: &[S]) -> Result<Vec<ObjectDescriptor>, MigrationError> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.as_ref().trim().is_empty())
        .map(|(i, line)| parse_batch_entry(line.as_ref(), i + 1))
        .collect()
}

impl MigrationManager {
    /// Migrate a batch of `key|size` entries and wait for all of them.
    ///
    /// Every entry is parsed before anything is dispatched, so a malformed
    /// entry fails the batch without copying any object.
    ///
    /// # Returns
    /// The batch tally, or the halting error if the job was halted.
    pub async fn migrate_batch<S: AsRef<str>>(
        &self,
        lines: &[S],
    ) -> Result<BatchSummary, MigrationError> {
        self.check_halted()?;
        let entries: Vec<ObjectDescriptor> = parse_batch(lines)?;

        let mut tasks: JoinSet<TaskStatus> = JoinSet::new();
        for descriptor in &entries {
            self.spawn_object(&mut tasks, descriptor);
        }

        let mut summary = BatchSummary {
            dispatched: entries.len(),
            ..Default::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match self.task_joined(joined) {
                TaskStatus::Migrated => summary.migrated += 1,
                TaskStatus::Skipped => summary.skipped += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
        }

        info!("Batch finished: {}", summary);
        self.check_halted()?;
        Ok(summary)
    }
}
