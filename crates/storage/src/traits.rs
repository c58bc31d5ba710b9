//! Storage traits/interfaces for bucket operations.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{ByteRange, CompletedPart, ListPage, ObjectMetadata};

/// Low-level object-storage operations - implemented by each backend.
///
/// The migration engine only ever talks to buckets through this trait, so a
/// source and a target may live behind different backends or endpoints.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// List one page of objects under `prefix`.
    ///
    /// # Arguments
    /// * `bucket` - Bucket to list
    /// * `prefix` - Key prefix to scope the listing (may be empty)
    /// * `continuation_token` - Cursor returned by the previous page, if any
    /// * `max_keys` - Upper bound on objects returned (service maximum is 1000)
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage, StorageError>;

    /// Fetch object metadata.
    /// Returns None if the object doesn't exist.
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError>;

    /// Download an object (or an inclusive byte range of it) to memory.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Vec<u8>, StorageError>;

    /// Upload bytes as a single object.
    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Open a multipart upload session and return its upload id.
    async fn create_multipart_upload(&self, bucket: &str, key: &str)
        -> Result<String, StorageError>;

    /// Upload one part of a multipart session.
    ///
    /// Returns the part's ETag. Some services omit it; callers decide how to
    /// treat a missing ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: &[u8],
    ) -> Result<Option<String>, StorageError>;

    /// Assemble uploaded parts into the final object.
    ///
    /// `parts` must be sorted by ascending part number.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError>;

    /// Abandon a multipart session and release its stored parts.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError>;
}
