//! Per-object results and their delivery channel.

use std::time::Duration;

use log::warn;
use rusty_migrate_storage::TransferMode;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use crate::error::MigrationError;

/// Outcome of one dispatched object.
#[derive(Debug, Clone, Serialize)]
pub struct CopyResult {
    /// Key read from the source bucket.
    pub source_key: String,
    /// Key written to the target bucket.
    pub target_key: String,
    /// True when the object was copied or found current on the target.
    pub success: bool,
    /// True when no transfer ran: the target was current or the object was
    /// above the skip size.
    pub skipped: bool,
    /// Failure description, when the object did not succeed.
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<MigrationError>,
    /// Time spent on the object after it acquired a concurrency slot.
    pub duration: Duration,
    /// Bytes written to the target.
    pub bytes_copied: u64,
    /// Transfer mode, when the object was copied.
    pub mode: Option<TransferMode>,
}

fn serialize_error<S>(error: &Option<MigrationError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Create a bounded channel for [`CopyResult`]s.
///
/// Publishing waits at most the configured publish timeout for room, so a
/// consumer that stops draining costs results, not stalled tasks.
pub fn result_channel(capacity: usize) -> (mpsc::Sender<CopyResult>, mpsc::Receiver<CopyResult>) {
    mpsc::channel(capacity.max(1))
}

/// Publish a result, giving up after `timeout`.
///
/// # Returns
/// True if the result was delivered.
pub(crate) async fn publish(
    sender: &mpsc::Sender<CopyResult>,
    result: CopyResult,
    timeout: Duration,
) -> bool {
    match sender.send_timeout(result, timeout).await {
        Ok(()) => true,
        Err(SendTimeoutError::Timeout(result)) => {
            warn!(
                "Dropping result for {}: channel full for {:?}",
                result.source_key, timeout
            );
            false
        }
        Err(SendTimeoutError::Closed(result)) => {
            warn!(
                "Dropping result for {}: channel closed",
                result.source_key
            );
            false
        }
    }
}
