//! Error types for CRT storage operations.

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use rusty_migrate_storage::StorageError;
use thiserror::Error;

/// Service error codes worth another attempt.
const RETRYABLE_CODES: &[&str] = &[
    "InternalError",
    "RequestTimeout",
    "ServiceUnavailable",
    "SlowDown",
    "Throttling",
];

/// Errors specific to the CRT storage client.
#[derive(Error, Debug)]
pub enum CrtError {
    /// AWS SDK error for one object (or bucket, when `key` is empty).
    #[error("AWS SDK error for s3://{bucket}/{key}: {message}")]
    SdkError {
        bucket: String,
        key: String,
        status: Option<u16>,
        code: Option<String>,
        message: String,
        retryable: bool,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CrtError {
    /// Classify an SDK failure.
    ///
    /// Timeouts, dispatch failures, unparseable responses, 5xx, 429 and
    /// throttling codes are retryable; everything else is not.
    pub(crate) fn from_sdk<E>(err: SdkError<E, HttpResponse>, bucket: &str, key: &str) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let status: Option<u16> = err.raw_response().map(|r| r.status().as_u16());
        let message: String = DisplayErrorContext(&err).to_string();

        let (code, retryable): (Option<String>, bool) = match &err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                (None, true)
            }
            SdkError::ServiceError(service) => {
                let code: Option<String> = service.err().code().map(str::to_string);
                let retryable: bool = status.is_some_and(|s| s >= 500 || s == 429)
                    || code
                        .as_deref()
                        .is_some_and(|c| RETRYABLE_CODES.contains(&c));
                (code, retryable)
            }
            _ => (None, false),
        };

        CrtError::SdkError {
            bucket: bucket.to_string(),
            key: key.to_string(),
            status,
            code,
            message,
            retryable,
        }
    }
}

impl From<CrtError> for StorageError {
    fn from(err: CrtError) -> Self {
        match err {
            CrtError::SdkError {
                bucket,
                key,
                status,
                code,
                message,
                retryable,
            } => match (status, code.as_deref()) {
                (Some(404), _) | (_, Some("NoSuchKey" | "NotFound")) => {
                    StorageError::NotFound { bucket, key }
                }
                (Some(403), _) | (_, Some("AccessDenied")) => StorageError::AccessDenied {
                    bucket,
                    key,
                    message,
                },
                _ => StorageError::NetworkError { message, retryable },
            },
            CrtError::ConfigError(message) => StorageError::InvalidConfig { message },
        }
    }
}
