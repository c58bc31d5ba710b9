//! Storage abstraction for bucket-to-bucket object migration.
//!
//! This crate provides a platform-agnostic interface to object storage. The
//! migration engine consumes buckets only through [`StorageClient`], so a
//! source and a target can sit behind different backends:
//!
//! - **CRT Backend** (`rusty-migrate-storage-crt`) - AWS SDK for Rust, works
//!   against S3 and S3-compatible endpoints
//! - **Memory Backend** ([`MemoryStorageClient`]) - in-process buckets for
//!   dry runs and tests
//!
//! # Part planning
//!
//! The `parts` module holds the pure logic for choosing between a direct
//! and a multipart transfer and for laying out part byte ranges.

pub mod memory;
mod error;
mod parts;
mod traits;
mod types;

pub use error::StorageError;
pub use memory::{Fault, MemoryStorageClient, Operation};
pub use parts::{
    expected_part_count, generate_part_ranges, max_object_size, needs_multipart, plan_parts,
    round_up_to_mib, transfer_mode, PartPlan, PartPlanError, PartRange, PartSizing, TransferMode,
};
pub use traits::StorageClient;
pub use types::{
    AwsCredentials, ByteRange, CompletedPart, ListPage, ObjectDescriptor, ObjectMetadata,
    RetrySettings, StorageSettings, MAX_KEYS_PER_PAGE, MAX_PARTS, MAX_PART_SIZE, MIB,
    MIN_PART_SIZE,
};
