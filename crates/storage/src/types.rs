//! Shared data structures for storage operations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Smallest part the service accepts for all but the last part (5MiB).
/// Also the default size below which objects are copied in one request.
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Largest single part the service accepts (5GiB).
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;

/// Maximum number of parts in one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// Maximum number of keys a single listing page may return.
pub const MAX_KEYS_PER_PAGE: i32 = 1000;

/// Configuration settings for storage backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// AWS region.
    pub region: String,
    /// Static credentials; the default provider chain is used when absent.
    pub credentials: Option<AwsCredentials>,
    /// Custom endpoint for S3-compatible services.
    pub endpoint_url: Option<String>,
    /// Use path-style addressing (required by most S3-compatible services).
    pub force_path_style: bool,
    /// Expected bucket owner account id, checked by the service on every call.
    pub expected_bucket_owner: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".into(),
            credentials: None,
            endpoint_url: None,
            force_path_style: false,
            expected_bucket_owner: None,
        }
    }
}

/// AWS credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Retry settings for transfer operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff multiplier (exponential backoff).
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Settings that make exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Grows by `backoff_multiplier` per attempt and is capped at
    /// `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent: i32 = attempt.saturating_sub(1).min(63) as i32;
        let raw: f64 = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped: f64 = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// A listed object: key and size, immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

impl ObjectDescriptor {
    /// Create a new descriptor.
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// Metadata returned by a HEAD request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object size in bytes.
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub last_modified: Option<i64>,
    /// ETag as reported by the service.
    pub etag: Option<String>,
    /// Number of parts the object was uploaded with, when it was a
    /// multipart upload and the service reports it.
    pub parts_count: Option<u32>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects on this page, in listing order.
    pub objects: Vec<ObjectDescriptor>,
    /// Cursor for the next page.
    pub next_token: Option<String>,
    /// Whether the service has more results after this page.
    pub is_truncated: bool,
}

/// Inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Create a new inclusive range.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Ranges are inclusive, so they are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// HTTP `Range` header value.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// A part that has been uploaded to a multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: i32,
    /// ETag returned by the upload.
    pub etag: String,
}
