//! AWS SDK S3 client implementation.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client as S3Client;
use log::debug;

use rusty_migrate_storage::{
    ByteRange, CompletedPart, ListPage, ObjectDescriptor, ObjectMetadata, StorageClient,
    StorageError, StorageSettings,
};

use crate::error::CrtError;

/// StorageClient implementation using AWS SDK for Rust.
///
/// Works against S3 and S3-compatible services (set `endpoint_url` and
/// usually `force_path_style`). Every call is a single attempt from the
/// migration engine's point of view; the SDK's own retry layer still
/// applies underneath.
pub struct CrtStorageClient {
    /// The underlying S3 client.
    s3_client: S3Client,
    /// Expected bucket owner for security validation.
    expected_bucket_owner: Option<String>,
}

impl CrtStorageClient {
    /// Create a new CRT storage client.
    ///
    /// # Arguments
    /// * `settings` - Region, optional static credentials and endpoint
    ///
    /// # Returns
    /// A new CRT storage client, or an error for an empty region.
    pub async fn new(settings: StorageSettings) -> Result<Self, StorageError> {
        if settings.region.trim().is_empty() {
            return Err(CrtError::ConfigError("region must not be empty".into()).into());
        }

        let config_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region.clone()));

        let config_loader = if let Some(ref creds) = settings.credentials {
            let credentials = Credentials::new(
                &creds.access_key_id,
                &creds.secret_access_key,
                creds.session_token.clone(),
                None,
                "rusty-migrate",
            );
            config_loader.credentials_provider(credentials)
        } else {
            config_loader
        };

        let sdk_config = config_loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.force_path_style);
        if let Some(ref endpoint_url) = settings.endpoint_url {
            debug!("Using custom S3 endpoint {}", endpoint_url);
            s3_config = s3_config.endpoint_url(endpoint_url);
        }

        Ok(Self {
            s3_client: S3Client::from_conf(s3_config.build()),
            expected_bucket_owner: settings.expected_bucket_owner,
        })
    }

    /// Create a client from an existing S3Client (for testing).
    ///
    /// # Arguments
    /// * `s3_client` - Pre-configured S3 client
    /// * `expected_bucket_owner` - Optional expected bucket owner
    pub fn from_client(s3_client: S3Client, expected_bucket_owner: Option<String>) -> Self {
        Self {
            s3_client,
            expected_bucket_owner,
        }
    }
}

/// Convert an SDK timestamp to epoch seconds.
fn epoch_seconds(dt: &aws_sdk_s3::primitives::DateTime) -> Option<i64> {
    dt.to_millis().ok().map(|ms| ms / 1000)
}

/// Part count encoded in a multipart ETag (`"<md5>-<parts>"`).
///
/// Single-part ETags carry no suffix and yield None.
pub(crate) fn parts_count_from_etag(etag: &str) -> Option<u32> {
    let (_, count) = etag.trim_matches('"').rsplit_once('-')?;
    count.parse::<u32>().ok().filter(|n| *n > 0)
}

#[async_trait]
impl StorageClient for CrtStorageClient {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage, StorageError> {
        let response = self
            .s3_client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .set_continuation_token(continuation_token.map(str::to_string))
            .set_expected_bucket_owner(self.expected_bucket_owner.clone())
            .send()
            .await
            .map_err(|err| CrtError::from_sdk(err, bucket, prefix))?;

        let objects: Vec<ObjectDescriptor> = response
            .contents()
            .iter()
            .filter_map(|obj| {
                let key: &str = obj.key()?;
                let size: u64 = obj.size().map(|s| s.max(0) as u64).unwrap_or(0);
                Some(ObjectDescriptor::new(key, size))
            })
            .collect();

        Ok(ListPage {
            objects,
            next_token: response.next_continuation_token().map(str::to_string),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError> {
        let result = self
            .s3_client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_expected_bucket_owner(self.expected_bucket_owner.clone())
            .send()
            .await;

        match result {
            Ok(output) => {
                let etag: Option<String> = output.e_tag().map(str::to_string);
                Ok(Some(ObjectMetadata {
                    size: output.content_length().map(|l| l.max(0) as u64).unwrap_or(0),
                    last_modified: output.last_modified().and_then(epoch_seconds),
                    parts_count: output
                        .parts_count()
                        .and_then(|n| u32::try_from(n).ok())
                        .or_else(|| etag.as_deref().and_then(parts_count_from_etag)),
                    etag,
                }))
            }
            Err(err) => match StorageError::from(CrtError::from_sdk(err, bucket, key)) {
                StorageError::NotFound { .. } => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Vec<u8>, StorageError> {
        let response = self
            .s3_client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range.map(|r| r.header_value()))
            .set_expected_bucket_owner(self.expected_bucket_owner.clone())
            .send()
            .await
            .map_err(|err| CrtError::from_sdk(err, bucket, key))?;

        let data: Vec<u8> = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::NetworkError {
                message: format!("reading body of s3://{bucket}/{key}: {e}"),
                retryable: true,
            })?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.s3_client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .set_expected_bucket_owner(self.expected_bucket_owner.clone())
            .send()
            .await
            .map_err(|err| CrtError::from_sdk(err, bucket, key))?;

        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, StorageError> {
        let output = self
            .s3_client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_expected_bucket_owner(self.expected_bucket_owner.clone())
            .send()
            .await
            .map_err(|err| CrtError::from_sdk(err, bucket, key))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Other {
                message: format!("no upload id returned for s3://{bucket}/{key}"),
            })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: &[u8],
    ) -> Result<Option<String>, StorageError> {
        let output = self
            .s3_client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data.to_vec()))
            .set_expected_bucket_owner(self.expected_bucket_owner.clone())
            .send()
            .await
            .map_err(|err| CrtError::from_sdk(err, bucket, key))?;

        Ok(output.e_tag().map(str::to_string))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let completed: Vec<S3CompletedPart> = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect();

        self.s3_client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .set_expected_bucket_owner(self.expected_bucket_owner.clone())
            .send()
            .await
            .map_err(|err| CrtError::from_sdk(err, bucket, key))?;

        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.s3_client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .set_expected_bucket_owner(self.expected_bucket_owner.clone())
            .send()
            .await
            .map_err(|err| CrtError::from_sdk(err, bucket, key))?;

        Ok(())
    }
}
