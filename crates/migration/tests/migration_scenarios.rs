//! End-to-end migration scenarios against in-memory buckets.
//!
//! Covers:
//! - direct and multipart copies, including the threshold boundary
//! - size skips and freshness skips, and re-running a finished job
//! - part failures, abort failures and part-count overflow
//! - result publishing under a stalled consumer
//! - batch-driven dispatch and prefix mapping

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusty_migrate::{
    result_channel, CopyResult, Endpoint, MigrationError, MigrationManager, MigrationOptions,
};
use rusty_migrate_storage::{
    ByteRange, CompletedPart, Fault, ListPage, MemoryStorageClient, ObjectMetadata, Operation,
    PartPlanError, StorageClient, StorageError, TransferMode, MIB,
};

const SOURCE: &str = "source-bucket";
const TARGET: &str = "target-bucket";

/// Deterministic, non-repeating-per-MiB content.
fn patterned(len: u64) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 4096) % 251) as u8).collect()
}

/// Build a manager copying between two buckets on one in-memory client.
fn create_manager(client: &Arc<MemoryStorageClient>, options: MigrationOptions) -> MigrationManager {
    let dyn_client: Arc<dyn StorageClient> = client.clone();
    MigrationManager::new(
        Endpoint::new(Arc::clone(&dyn_client), SOURCE),
        Endpoint::new(dyn_client, TARGET),
        options,
    )
    .unwrap()
}

/// Drain every result once all senders are gone.
async fn collect_results(mut rx: tokio::sync::mpsc::Receiver<CopyResult>) -> Vec<CopyResult> {
    let mut results: Vec<CopyResult> = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    results
}

#[tokio::test]
async fn test_small_object_direct_copy() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "small.txt", patterned(1024));
    let (tx, rx) = result_channel(8);
    let manager = create_manager(&client, MigrationOptions::default()).with_result_sender(tx);

    let snapshot = manager.pages().run().await.unwrap();
    drop(manager);

    assert_eq!(snapshot.migrated_objects, 1);
    assert_eq!(snapshot.completed_bytes, 1024);
    assert_eq!(client.object(TARGET, "small.txt").unwrap(), patterned(1024));
    assert_eq!(client.calls(Operation::CreateMultipart), 0);

    let results = collect_results(rx).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].mode, Some(TransferMode::Direct));
    assert_eq!(results[0].bytes_copied, 1024);
}

#[tokio::test]
async fn test_large_object_multipart_copy() {
    let size: u64 = 50 * MIB;
    let data = patterned(size);
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "video.mp4", data.clone());
    let manager = create_manager(&client, MigrationOptions::default());

    let snapshot = manager.pages().run().await.unwrap();

    assert_eq!(snapshot.migrated_objects, 1);
    assert_eq!(snapshot.completed_bytes, size);
    assert_eq!(client.calls(Operation::UploadPart), 10);
    assert_eq!(client.calls(Operation::CompleteMultipart), 1);
    assert_eq!(client.object(TARGET, "video.mp4").unwrap(), data);

    let copied = client.head_object(TARGET, "video.mp4").await.unwrap().unwrap();
    assert_eq!(copied.parts_count, Some(10));
}

#[tokio::test]
async fn test_threshold_boundary() {
    let threshold: u64 = 2 * MIB;
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "at", patterned(threshold));
    client.insert_object(SOURCE, "below", patterned(threshold - 1));
    let (tx, rx) = result_channel(8);
    let manager = create_manager(
        &client,
        MigrationOptions::default().with_multipart_threshold(threshold),
    )
    .with_result_sender(tx);

    manager.pages().run().await.unwrap();
    drop(manager);

    let results = collect_results(rx).await;
    let mode_of = |key: &str| {
        results
            .iter()
            .find(|r| r.source_key == key)
            .and_then(|r| r.mode)
    };
    assert_eq!(mode_of("at"), Some(TransferMode::Multipart));
    assert_eq!(mode_of("below"), Some(TransferMode::Direct));
    assert_eq!(client.object(TARGET, "at").unwrap(), patterned(threshold));
}

#[tokio::test]
async fn test_skip_size_skips_without_transfer() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "big.bin", patterned(2000));
    let (tx, rx) = result_channel(8);
    let manager = create_manager(&client, MigrationOptions::default().with_skip_size(1000))
        .with_result_sender(tx);

    let snapshot = manager.pages().run().await.unwrap();
    drop(manager);

    assert_eq!(snapshot.skipped_objects, 1);
    assert_eq!(snapshot.failed_objects, 0);
    assert_eq!(client.calls(Operation::Get), 0);
    assert_eq!(client.calls(Operation::Put), 0);

    let results = collect_results(rx).await;
    assert!(results[0].skipped);
    assert!(results[0].error.as_ref().unwrap().is_skip());
}

#[tokio::test]
async fn test_newer_target_is_left_alone() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object_at(SOURCE, "report.csv", patterned(512), 1_700_000_000);
    client.insert_object_at(TARGET, "report.csv", b"kept".to_vec(), 1_800_000_000);
    let manager = create_manager(&client, MigrationOptions::default());

    let snapshot = manager.pages().run().await.unwrap();

    assert_eq!(snapshot.skipped_objects, 1);
    assert_eq!(snapshot.completed_bytes, 0);
    assert_eq!(client.object(TARGET, "report.csv").unwrap(), b"kept");
}

#[tokio::test]
async fn test_rerun_skips_everything() {
    let client = Arc::new(MemoryStorageClient::new());
    for i in 0..5 {
        client.insert_object_at(SOURCE, &format!("file-{i}"), patterned(300), 1_000);
    }
    let manager = create_manager(&client, MigrationOptions::default());

    let first = manager.pages().run().await.unwrap();
    assert_eq!(first.migrated_objects, 5);
    assert_eq!(first.completed_bytes, 1500);

    let second = manager.pages().run().await.unwrap();
    assert_eq!(second.migrated_objects, 5);
    assert_eq!(second.skipped_objects, 5);
    assert_eq!(second.completed_bytes, 1500);
    assert_eq!(client.calls(Operation::Put), 5);
}

#[tokio::test]
async fn test_part_failure_aborts_and_counts_uploaded_parts() {
    let size: u64 = 10 * MIB;
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "archive.tar", patterned(size));
    client.inject_fault(Fault::on(Operation::UploadPart).for_part(7).permanent());
    let options = MigrationOptions::default()
        .with_part_size(MIB)
        .with_part_concurrency(1);
    let manager = create_manager(&client, options);

    let snapshot = manager.pages().run().await.unwrap();

    assert_eq!(snapshot.failed_objects, 1);
    assert_eq!(snapshot.migrated_objects, 0);
    assert_eq!(snapshot.completed_bytes, 6 * MIB);
    assert_eq!(client.calls(Operation::AbortMultipart), 1);
    assert_eq!(client.calls(Operation::CompleteMultipart), 0);
    assert_eq!(client.pending_uploads(), 0);
    assert!(client.object(TARGET, "archive.tar").is_none());

    let failure = manager.progress().failure("archive.tar").unwrap();
    assert!(!failure.is_fatal());
    assert!(manager.halted().is_none());
}

#[tokio::test]
async fn test_abort_failure_halts_run() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "a-big", patterned(6 * MIB));
    client.inject_fault(Fault::on(Operation::UploadPart).permanent());
    client.inject_fault(Fault::on(Operation::AbortMultipart));
    let manager = create_manager(&client, MigrationOptions::default());

    let err = manager.pages().run().await.unwrap_err();

    assert!(matches!(err, MigrationError::AbortFailed { .. }));
    assert!(manager.halted().is_some());
    assert_eq!(client.pending_uploads(), 1);
}

#[tokio::test]
async fn test_queued_objects_do_not_start_after_halt() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "a-big", patterned(6 * MIB));
    for i in 0..5 {
        client.insert_object(SOURCE, &format!("b{i}"), patterned(10));
    }
    client.inject_fault(Fault::on(Operation::UploadPart).permanent());
    client.inject_fault(Fault::on(Operation::AbortMultipart).permanent());
    let (tx, rx) = result_channel(16);
    let manager = create_manager(&client, MigrationOptions::default().with_concurrency(1))
        .with_result_sender(tx);

    let batch = ["a-big|6291456", "b0|10", "b1|10", "b2|10", "b3|10", "b4|10"];
    let err = manager.migrate_batch(&batch).await.unwrap_err();
    drop(manager);

    assert!(matches!(err, MigrationError::AbortFailed { .. }));
    assert_eq!(client.object_count(TARGET), 0);
    assert_eq!(client.calls(Operation::Put), 0);
    assert_eq!(client.calls(Operation::CreateMultipart), 1);

    let results = collect_results(rx).await;
    assert_eq!(results.len(), 6);
    let not_started: Vec<&CopyResult> = results
        .iter()
        .filter(|r| r.source_key.starts_with('b'))
        .collect();
    assert_eq!(not_started.len(), 5);
    for result in not_started {
        assert!(!result.success);
        assert_eq!(result.bytes_copied, 0);
        assert!(matches!(
            result.error,
            Some(MigrationError::Halted { ref cause, .. })
                if matches!(**cause, MigrationError::AbortFailed { .. })
        ));
    }
}

#[tokio::test]
async fn test_part_count_overflow_is_fatal() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "fragmented", patterned(8 * MIB));
    client.set_parts_count(SOURCE, "fragmented", 8);
    let manager = create_manager(&client, MigrationOptions::default().with_max_parts(4));

    let err = manager.pages().run().await.unwrap_err();

    match err {
        MigrationError::PartPlan { source, .. } => {
            assert!(matches!(source, PartPlanError::TooManyParts { parts: 8, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.calls(Operation::CreateMultipart), 0);
}

#[tokio::test]
async fn test_halted_manager_refuses_batches() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "a", patterned(10));
    client.insert_object(SOURCE, "b", patterned(10));
    client.set_drop_continuation_tokens(true);
    let manager = create_manager(&client, MigrationOptions::default().with_page_size(1));

    assert!(manager.pages().run().await.is_err());

    let err = manager.migrate_batch(&["a|10"]).await.unwrap_err();
    assert!(matches!(err, MigrationError::MissingContinuationToken { .. }));
    assert_eq!(client.calls(Operation::Get), 0);
}

#[tokio::test]
async fn test_stalled_consumer_drops_results() {
    let client = Arc::new(MemoryStorageClient::new());
    for i in 0..4 {
        client.insert_object(SOURCE, &format!("k{i}"), patterned(64));
    }
    let (tx, mut rx) = result_channel(1);
    let options = MigrationOptions::default().with_publish_timeout(Duration::from_millis(20));
    let manager = create_manager(&client, options).with_result_sender(tx);

    let started = Instant::now();
    let snapshot = manager.pages().run().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(snapshot.migrated_objects, 4);

    drop(manager);
    let mut delivered: usize = 0;
    while rx.recv().await.is_some() {
        delivered += 1;
    }
    assert_eq!(delivered, 1);
}

#[tokio::test]
async fn test_every_object_reports_once() {
    let client = Arc::new(MemoryStorageClient::new());
    for i in 0..30 {
        client.insert_object_at(SOURCE, &format!("obj/{i:02}"), patterned(100 + i), 1_000);
    }
    client.insert_object_at(TARGET, "obj/03", patterned(1), 2_000);
    client.inject_fault(Fault::on(Operation::Put).for_key("obj/07").permanent());
    let (tx, rx) = result_channel(64);
    let options = MigrationOptions::default()
        .with_page_size(7)
        .with_concurrency(4)
        .with_skip_size(125);
    let manager = create_manager(&client, options).with_result_sender(tx);

    let snapshot = manager.pages().run().await.unwrap();
    drop(manager);

    let mut keys: Vec<String> = collect_results(rx)
        .await
        .into_iter()
        .map(|r| r.source_key)
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 30);

    assert_eq!(snapshot.total_objects, 30);
    assert_eq!(snapshot.failed_objects, 1);
    // 03 is current on the target, 26..=29 are above the skip size
    assert_eq!(snapshot.skipped_objects, 5);
    assert_eq!(
        snapshot.migrated_objects + snapshot.skipped_objects + snapshot.failed_objects,
        snapshot.total_objects
    );
    assert!(snapshot.completed_bytes <= snapshot.total_bytes);
}

#[tokio::test]
async fn test_object_concurrency_is_bounded() {
    let client = Arc::new(MemoryStorageClient::new());
    for i in 0..24 {
        client.insert_object(SOURCE, &format!("k{i}"), patterned(32));
    }
    client.set_latency(Duration::from_millis(5));
    let manager = create_manager(&client, MigrationOptions::default().with_concurrency(4));

    manager.pages().run().await.unwrap();

    assert!(client.peak_in_flight() <= 4);
    assert!(client.peak_in_flight() > 1);
}

#[tokio::test]
async fn test_batch_migration() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "a", patterned(10));
    client.insert_object(SOURCE, "b|c", patterned(20));
    let manager = create_manager(&client, MigrationOptions::default().with_skip_size(15));

    let summary = manager
        .migrate_batch(&["a|10", "", "b|c|20", "missing|5"])
        .await
        .unwrap();

    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.migrated, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 1);
    assert!(matches!(
        manager.progress().failure("missing"),
        Some(MigrationError::SourceNotFound { .. })
    ));
}

#[tokio::test]
async fn test_malformed_batch_dispatches_nothing() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "a", patterned(10));
    let manager = create_manager(&client, MigrationOptions::default());

    let err = manager
        .migrate_batch(&["a|10", "not an entry"])
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::InvalidBatchEntry { line: 2, .. }));
    assert_eq!(manager.snapshot().total_objects, 0);
    assert_eq!(client.calls(Operation::Head), 0);
}

#[tokio::test]
async fn test_prefix_mapping() {
    let client = Arc::new(MemoryStorageClient::new());
    client.insert_object(SOURCE, "logs/2024/app.log", patterned(40));
    client.insert_object(SOURCE, "other/skip.me", patterned(40));
    let dyn_client: Arc<dyn StorageClient> = client.clone();
    let manager = MigrationManager::new(
        Endpoint::new(Arc::clone(&dyn_client), SOURCE).with_prefix("logs/"),
        Endpoint::new(dyn_client, TARGET).with_prefix("archive/logs/"),
        MigrationOptions::default(),
    )
    .unwrap();

    let snapshot = manager.pages().run().await.unwrap();

    assert_eq!(snapshot.total_objects, 1);
    assert!(client.object(TARGET, "archive/logs/2024/app.log").is_some());
    assert_eq!(client.object_count(TARGET), 1);
}

/// Client whose HEAD responses carry no modification time.
struct NoTimestampClient(Arc<MemoryStorageClient>);

#[async_trait]
impl StorageClient for NoTimestampClient {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage, StorageError> {
        self.0
            .list_objects_page(bucket, prefix, continuation_token, max_keys)
            .await
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError> {
        Ok(self.0.head_object(bucket, key).await?.map(|metadata| ObjectMetadata {
            last_modified: None,
            ..metadata
        }))
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Vec<u8>, StorageError> {
        self.0.get_object(bucket, key, range).await
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.0.put_object(bucket, key, data).await
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, StorageError> {
        self.0.create_multipart_upload(bucket, key).await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: &[u8],
    ) -> Result<Option<String>, StorageError> {
        self.0
            .upload_part(bucket, key, upload_id, part_number, data)
            .await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        self.0
            .complete_multipart_upload(bucket, key, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.0.abort_multipart_upload(bucket, key, upload_id).await
    }
}

#[tokio::test]
async fn test_missing_timestamps_never_count_as_current() {
    let memory = Arc::new(MemoryStorageClient::new());
    memory.insert_object_at(SOURCE, "k", patterned(16), 1_000);
    memory.insert_object_at(TARGET, "k", b"old".to_vec(), 2_000);
    let client: Arc<dyn StorageClient> = Arc::new(NoTimestampClient(Arc::clone(&memory)));
    let manager = MigrationManager::new(
        Endpoint::new(Arc::clone(&client), SOURCE),
        Endpoint::new(client, TARGET),
        MigrationOptions::default(),
    )
    .unwrap();

    let snapshot = manager.pages().run().await.unwrap();

    assert_eq!(snapshot.migrated_objects, 1);
    assert_eq!(memory.object(TARGET, "k").unwrap(), patterned(16));
}
