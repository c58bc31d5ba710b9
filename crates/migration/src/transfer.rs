//! Transfer strategies: direct copy and multipart copy.
//!
//! A direct copy buffers the whole object and writes it with one request. A
//! multipart copy plans a fixed part layout, opens an upload session on the
//! target, copies ranged parts with bounded concurrency and then either
//! completes the session with the ordered part list or aborts it.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use log::{debug, warn};
use rusty_migrate_storage::{plan_parts, CompletedPart, PartPlan, PartRange};

use crate::error::MigrationError;
use crate::manager::ObjectMigration;

/// A part that finished uploading.
#[derive(Debug)]
struct UploadedPart {
    part_number: i32,
    etag: Option<String>,
}

impl ObjectMigration {
    /// Copy the object with a single get and a single put.
    ///
    /// # Returns
    /// Bytes written to the target.
    pub(crate) async fn direct_copy(&self) -> Result<u64, MigrationError> {
        let source = self.source();
        let target = self.target();

        let data: Vec<u8> = source
            .client
            .get_object(&source.bucket, &self.source_key, None)
            .await
            .map_err(MigrationError::storage(&self.source_key, "get object"))?;

        target
            .client
            .put_object(&target.bucket, &self.target_key, &data)
            .await
            .map_err(MigrationError::storage(&self.target_key, "put object"))?;

        self.progress().add_completed_bytes(self.size);
        Ok(self.size)
    }

    /// Copy the object as a multipart upload.
    ///
    /// Parts are planned before the session is opened, so a layout that the
    /// target would reject never leaves an upload behind. Once any part
    /// fails, parts that have not started are skipped and the session is
    /// aborted.
    ///
    /// # Returns
    /// Bytes written to the target.
    pub(crate) async fn multipart_copy(&self) -> Result<u64, MigrationError> {
        let reported_parts: Option<u32> = self
            .source_metadata
            .as_ref()
            .and_then(|metadata| metadata.parts_count);
        let plan: PartPlan = plan_parts(self.size, reported_parts, self.options().part_sizing())
            .map_err(|source| MigrationError::PartPlan {
                key: self.source_key.clone(),
                source,
            })?;

        let target = self.target();
        let upload_id: String = target
            .client
            .create_multipart_upload(&target.bucket, &self.target_key)
            .await
            .map_err(MigrationError::storage(&self.target_key, "create multipart upload"))?;

        debug!(
            "Copying {} in {} parts of {} bytes (upload {})",
            self.source_key,
            plan.part_count(),
            plan.part_size,
            upload_id
        );

        let failed = AtomicBool::new(false);
        let results: Vec<Result<Option<UploadedPart>, MigrationError>> = stream::iter(plan.parts)
            .map(|part| {
                let failed = &failed;
                let upload_id = upload_id.as_str();
                async move {
                    if failed.load(Ordering::Relaxed) {
                        return Ok(None);
                    }
                    match self.copy_part(upload_id, part).await {
                        Ok(uploaded) => Ok(Some(uploaded)),
                        Err(e) => {
                            failed.store(true, Ordering::Relaxed);
                            Err(e)
                        }
                    }
                }
            })
            .buffer_unordered(self.options().effective_part_concurrency())
            .collect()
            .await;

        let mut uploaded: Vec<UploadedPart> = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(Some(part)) => uploaded.push(part),
                Ok(None) => {}
                Err(e) => return Err(self.abort(&upload_id, e).await),
            }
        }

        uploaded.sort_by_key(|part| part.part_number);
        let mut completed: Vec<CompletedPart> = Vec::with_capacity(uploaded.len());
        for part in uploaded {
            match part.etag {
                Some(etag) => completed.push(CompletedPart {
                    part_number: part.part_number,
                    etag,
                }),
                None => {
                    let missing = MigrationError::MissingPartETag {
                        key: self.target_key.clone(),
                        part_number: part.part_number,
                    };
                    return Err(self.abort(&upload_id, missing).await);
                }
            }
        }

        if let Err(e) = target
            .client
            .complete_multipart_upload(&target.bucket, &self.target_key, &upload_id, &completed)
            .await
        {
            let cause = MigrationError::storage(&self.target_key, "complete multipart upload")(e);
            return Err(self.abort(&upload_id, cause).await);
        }

        Ok(self.size)
    }

    /// Fetch one byte range from the source and upload it as a part.
    async fn copy_part(
        &self,
        upload_id: &str,
        part: PartRange,
    ) -> Result<UploadedPart, MigrationError> {
        let source = self.source();
        let target = self.target();

        let data: Vec<u8> = source
            .client
            .get_object(&source.bucket, &self.source_key, Some(part.range))
            .await
            .map_err(MigrationError::storage(&self.source_key, "get part"))?;

        let etag: Option<String> = target
            .client
            .upload_part(
                &target.bucket,
                &self.target_key,
                upload_id,
                part.part_number,
                &data,
            )
            .await
            .map_err(MigrationError::storage(&self.target_key, "upload part"))?;

        self.progress().add_completed_bytes(part.range.len());
        debug!(
            "Uploaded part {} of {} ({} bytes)",
            part.part_number,
            self.target_key,
            part.range.len()
        );

        Ok(UploadedPart {
            part_number: part.part_number,
            etag,
        })
    }

    /// Abort a multipart session after `cause`.
    ///
    /// # Returns
    /// `cause` if the session was aborted, or a fatal
    /// [`MigrationError::AbortFailed`] wrapping it if the abort failed.
    async fn abort(&self, upload_id: &str, cause: MigrationError) -> MigrationError {
        warn!(
            "Aborting multipart upload {} for {}: {}",
            upload_id, self.target_key, cause
        );

        let target = self.target();
        match target
            .client
            .abort_multipart_upload(&target.bucket, &self.target_key, upload_id)
            .await
        {
            Ok(()) => cause,
            Err(abort) => MigrationError::AbortFailed {
                key: self.target_key.clone(),
                upload_id: upload_id.to_string(),
                abort,
                cause: Box::new(cause),
            },
        }
    }
}
