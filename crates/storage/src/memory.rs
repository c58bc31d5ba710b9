//! In-memory storage backend.
//!
//! Keeps buckets in process memory. Used for dry runs and throughout the
//! test suites; it can inject failures per operation and records call
//! counts and peak concurrency so callers can assert on traffic.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::traits::StorageClient;
use crate::types::{ByteRange, CompletedPart, ListPage, ObjectDescriptor, ObjectMetadata};

/// Storage operations, used to target faults and read call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Head,
    Get,
    Put,
    CreateMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
}

/// A failure to inject into matching calls.
#[derive(Debug, Clone)]
pub struct Fault {
    operation: Operation,
    key: Option<String>,
    part_number: Option<i32>,
    remaining: Option<u32>,
    retryable: bool,
}

impl Fault {
    /// Fail every call of `operation`.
    pub fn on(operation: Operation) -> Self {
        Self {
            operation,
            key: None,
            part_number: None,
            remaining: None,
            retryable: true,
        }
    }

    /// Only fail calls for this object key.
    pub fn for_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Only fail uploads of this part number.
    pub fn for_part(mut self, part_number: i32) -> Self {
        self.part_number = Some(part_number);
        self
    }

    /// Fail only the first `times` matching calls.
    pub fn times(mut self, times: u32) -> Self {
        self.remaining = Some(times);
        self
    }

    /// Mark the injected error as non-retryable.
    pub fn permanent(mut self) -> Self {
        self.retryable = false;
        self
    }

    fn matches(&self, operation: Operation, key: &str, part_number: Option<i32>) -> bool {
        self.operation == operation
            && self.remaining != Some(0)
            && self.key.as_deref().map_or(true, |k| k == key)
            && self.part_number.map_or(true, |p| Some(p) == part_number)
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: i64,
    etag: String,
    parts_count: Option<u32>,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (Vec<u8>, String)>,
}

/// StorageClient implementation backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStorageClient {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<Operation, usize>>,
    next_id: AtomicU64,
    latency_ms: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    drop_continuation_tokens: AtomicBool,
    omit_etags: AtomicBool,
}

impl MemoryStorageClient {
    /// Create an empty client with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object stamped with the current time.
    pub fn insert_object(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.insert_object_at(bucket, key, data, current_epoch_seconds());
    }

    /// Store an object with an explicit last-modified time (epoch seconds).
    pub fn insert_object_at(&self, bucket: &str, key: &str, data: Vec<u8>, last_modified: i64) {
        let etag: String = self.next_etag(data.len());
        lock(&self.buckets).entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified,
                etag,
                parts_count: None,
            },
        );
    }

    /// Record the part count an object reports on HEAD, as if it had been
    /// uploaded in `parts_count` parts.
    pub fn set_parts_count(&self, bucket: &str, key: &str, parts_count: u32) {
        if let Some(object) = lock(&self.buckets)
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(key))
        {
            object.parts_count = Some(parts_count);
        }
    }

    /// Read back an object's bytes.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.buckets)
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.clone())
    }

    /// Number of objects stored in a bucket.
    pub fn object_count(&self, bucket: &str) -> usize {
        lock(&self.buckets).get(bucket).map_or(0, BTreeMap::len)
    }

    /// Number of multipart sessions neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        lock(&self.uploads).len()
    }

    /// Register a fault for subsequent calls.
    pub fn inject_fault(&self, fault: Fault) {
        lock(&self.faults).push(fault);
    }

    /// Number of calls made for an operation.
    pub fn calls(&self, operation: Operation) -> usize {
        lock(&self.calls).get(&operation).copied().unwrap_or(0)
    }

    /// Highest number of concurrent get/put/upload-part calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Delay every data call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Report truncated pages without a continuation token.
    pub fn set_drop_continuation_tokens(&self, drop: bool) {
        self.drop_continuation_tokens.store(drop, Ordering::SeqCst);
    }

    /// Return no ETag from part uploads.
    pub fn set_omit_etags(&self, omit: bool) {
        self.omit_etags.store(omit, Ordering::SeqCst);
    }

    fn next_etag(&self, len: usize) -> String {
        let id: u64 = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("\"{len:x}{id:08x}\"")
    }

    /// Count the call and return an injected error if a fault matches.
    fn enter(
        &self,
        operation: Operation,
        key: &str,
        part_number: Option<i32>,
    ) -> Result<(), StorageError> {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;

        let mut faults = lock(&self.faults);
        if let Some(fault) = faults
            .iter_mut()
            .find(|f| f.matches(operation, key, part_number))
        {
            if let Some(remaining) = fault.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(StorageError::network(
                format!("injected {operation:?} failure for {key}"),
                fault.retryable,
            ));
        }
        Ok(())
    }

    async fn simulate_io(&self) -> InFlight<'_> {
        let current: usize = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency: u64 = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        InFlight(&self.in_flight)
    }

    fn store(&self, bucket: &str, key: &str, object: StoredObject) {
        lock(&self.buckets)
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }
}

/// Decrements the in-flight counter when dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageClient for MemoryStorageClient {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage, StorageError> {
        self.enter(Operation::List, prefix, None)?;

        let buckets = lock(&self.buckets);
        let Some(objects) = buckets.get(bucket) else {
            return Ok(ListPage::default());
        };

        let max_keys: usize = max_keys.max(1) as usize;
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation_token.map_or(true, |after| key.as_str() > after));

        let page: Vec<ObjectDescriptor> = matching
            .by_ref()
            .take(max_keys)
            .map(|(key, object)| ObjectDescriptor::new(key.clone(), object.data.len() as u64))
            .collect();
        let is_truncated: bool = matching.next().is_some();

        let next_token: Option<String> =
            if is_truncated && !self.drop_continuation_tokens.load(Ordering::SeqCst) {
                page.last().map(|object| object.key.clone())
            } else {
                None
            };

        Ok(ListPage {
            objects: page,
            next_token,
            is_truncated,
        })
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError> {
        self.enter(Operation::Head, key, None)?;

        Ok(lock(&self.buckets)
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| ObjectMetadata {
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
                etag: Some(object.etag.clone()),
                parts_count: object.parts_count,
            }))
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Vec<u8>, StorageError> {
        self.enter(Operation::Get, key, None)?;
        let _io = self.simulate_io().await;

        let buckets = lock(&self.buckets);
        let object = buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        match range {
            None => Ok(object.data.clone()),
            Some(range) => {
                let len: u64 = object.data.len() as u64;
                if range.start > range.end || range.end >= len {
                    return Err(StorageError::Other {
                        message: format!(
                            "range {} not satisfiable for s3://{bucket}/{key} of {len} bytes",
                            range.header_value()
                        ),
                    });
                }
                Ok(object.data[range.start as usize..=range.end as usize].to_vec())
            }
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.enter(Operation::Put, key, None)?;
        let _io = self.simulate_io().await;

        let etag: String = self.next_etag(data.len());
        self.store(
            bucket,
            key,
            StoredObject {
                data: data.to_vec(),
                last_modified: current_epoch_seconds(),
                etag,
                parts_count: None,
            },
        );
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, StorageError> {
        self.enter(Operation::CreateMultipart, key, None)?;

        let upload_id: String = format!(
            "upload-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        );
        lock(&self.uploads).insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: &[u8],
    ) -> Result<Option<String>, StorageError> {
        self.enter(Operation::UploadPart, key, Some(part_number))?;
        let _io = self.simulate_io().await;

        let etag: String = self.next_etag(data.len());
        let mut uploads = lock(&self.uploads);
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| unknown_upload(bucket, key, upload_id))?;
        upload
            .parts
            .insert(part_number, (data.to_vec(), etag.clone()));

        if self.omit_etags.load(Ordering::SeqCst) {
            Ok(None)
        } else {
            Ok(Some(etag))
        }
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        self.enter(Operation::CompleteMultipart, key, None)?;

        let mut uploads = lock(&self.uploads);
        let upload = uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| unknown_upload(bucket, key, upload_id))?;

        let invalid = |message: String| StorageError::Multipart {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            message,
        };

        if parts.is_empty() {
            return Err(invalid("no parts supplied".into()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(invalid("parts are not in ascending order".into()));
        }

        let mut data: Vec<u8> = Vec::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((bytes, etag)) if *etag == part.etag => data.extend_from_slice(bytes),
                _ => {
                    return Err(invalid(format!(
                        "part {} was not uploaded with etag {}",
                        part.part_number, part.etag
                    )))
                }
            }
        }

        uploads.remove(upload_id);
        drop(uploads);

        let etag: String = format!(
            "{}-{}\"",
            self.next_etag(data.len()).trim_end_matches('"'),
            parts.len()
        );
        self.store(
            bucket,
            key,
            StoredObject {
                data,
                last_modified: current_epoch_seconds(),
                etag,
                parts_count: Some(parts.len() as u32),
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.enter(Operation::AbortMultipart, key, None)?;

        lock(&self.uploads)
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| unknown_upload(bucket, key, upload_id))
    }
}

fn unknown_upload(bucket: &str, key: &str, upload_id: &str) -> StorageError {
    StorageError::Multipart {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        message: "no such upload".into(),
    }
}

/// Lock a mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Get current time as epoch seconds.
fn current_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(keys: &[&str]) -> MemoryStorageClient {
        let client = MemoryStorageClient::new();
        for key in keys {
            client.insert_object("bucket", key, key.as_bytes().to_vec());
        }
        client
    }

    #[tokio::test]
    async fn test_list_pages_in_key_order() {
        let client = seeded(&["a", "b", "c", "d", "e"]);

        let first = client.list_objects_page("bucket", "", None, 2).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert!(first.is_truncated);
        assert_eq!(first.next_token.as_deref(), Some("b"));

        let second = client
            .list_objects_page("bucket", "", first.next_token.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(second.objects[0].key, "c");

        let last = client
            .list_objects_page("bucket", "", second.next_token.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(last.objects.len(), 1);
        assert!(!last.is_truncated);
        assert!(last.next_token.is_none());
    }

    #[tokio::test]
    async fn test_list_respects_prefix() {
        let client = seeded(&["logs/1", "logs/2", "data/1"]);
        let page = client
            .list_objects_page("bucket", "logs/", None, 1000)
            .await
            .unwrap();
        let keys: Vec<&str> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["logs/1", "logs/2"]);
    }

    #[tokio::test]
    async fn test_dropped_continuation_token() {
        let client = seeded(&["a", "b", "c"]);
        client.set_drop_continuation_tokens(true);

        let page = client.list_objects_page("bucket", "", None, 2).await.unwrap();
        assert!(page.is_truncated);
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let client = MemoryStorageClient::new();
        client.insert_object("bucket", "k", b"0123456789".to_vec());

        let data = client
            .get_object("bucket", "k", Some(ByteRange::new(2, 5)))
            .await
            .unwrap();
        assert_eq!(data, b"2345");

        let err = client
            .get_object("bucket", "k", Some(ByteRange::new(5, 10)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Other { .. }));
    }

    #[tokio::test]
    async fn test_multipart_lifecycle() {
        let client = MemoryStorageClient::new();
        let upload_id = client.create_multipart_upload("bucket", "big").await.unwrap();

        let e2 = client
            .upload_part("bucket", "big", &upload_id, 2, b"world")
            .await
            .unwrap()
            .unwrap();
        let e1 = client
            .upload_part("bucket", "big", &upload_id, 1, b"hello ")
            .await
            .unwrap()
            .unwrap();

        let parts = vec![
            CompletedPart { part_number: 1, etag: e1 },
            CompletedPart { part_number: 2, etag: e2 },
        ];
        client
            .complete_multipart_upload("bucket", "big", &upload_id, &parts)
            .await
            .unwrap();

        assert_eq!(client.object("bucket", "big").unwrap(), b"hello world");
        assert_eq!(client.pending_uploads(), 0);

        let meta = client.head_object("bucket", "big").await.unwrap().unwrap();
        assert_eq!(meta.parts_count, Some(2));
        assert!(meta.etag.unwrap().ends_with("-2\""));
    }

    #[tokio::test]
    async fn test_complete_rejects_unordered_parts() {
        let client = MemoryStorageClient::new();
        let upload_id = client.create_multipart_upload("bucket", "big").await.unwrap();
        let e1 = client
            .upload_part("bucket", "big", &upload_id, 1, b"a")
            .await
            .unwrap()
            .unwrap();
        let e2 = client
            .upload_part("bucket", "big", &upload_id, 2, b"b")
            .await
            .unwrap()
            .unwrap();

        let parts = vec![
            CompletedPart { part_number: 2, etag: e2 },
            CompletedPart { part_number: 1, etag: e1 },
        ];
        let err = client
            .complete_multipart_upload("bucket", "big", &upload_id, &parts)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Multipart { .. }));
        assert_eq!(client.pending_uploads(), 1);
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let client = seeded(&["k"]);
        client.inject_fault(Fault::on(Operation::Head).for_key("k").times(2));

        assert!(client.head_object("bucket", "k").await.is_err());
        assert!(client.head_object("bucket", "k").await.is_err());
        assert!(client.head_object("bucket", "k").await.unwrap().is_some());
        assert_eq!(client.calls(Operation::Head), 3);
    }

    #[tokio::test]
    async fn test_fault_for_part() {
        let client = MemoryStorageClient::new();
        client.inject_fault(Fault::on(Operation::UploadPart).for_part(2).permanent());
        let upload_id = client.create_multipart_upload("bucket", "big").await.unwrap();

        assert!(client
            .upload_part("bucket", "big", &upload_id, 1, b"a")
            .await
            .is_ok());
        let err = client
            .upload_part("bucket", "big", &upload_id, 2, b"b")
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_abort_unknown_upload() {
        let client = MemoryStorageClient::new();
        assert!(client
            .abort_multipart_upload("bucket", "k", "upload-404")
            .await
            .is_err());
    }
}
