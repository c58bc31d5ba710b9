//! AWS SDK S3 backend for rusty-migrate storage.
//!
//! This crate provides a `StorageClient` implementation using the AWS SDK for Rust.
//! It covers the listing, metadata, ranged read, put and multipart calls the
//! migration engine needs, against S3 or any S3-compatible endpoint.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rusty_migrate::{Endpoint, MigrationManager, MigrationOptions};
//! use rusty_migrate_storage::{StorageClient, StorageSettings};
//! use rusty_migrate_storage_crt::CrtStorageClient;
//!
//! let client: Arc<dyn StorageClient> =
//!     Arc::new(CrtStorageClient::new(StorageSettings::default()).await?);
//! let manager = MigrationManager::new(
//!     Endpoint::new(Arc::clone(&client), "old-bucket"),
//!     Endpoint::new(client, "new-bucket"),
//!     MigrationOptions::default(),
//! )?;
//! manager.pages().run().await?;
//! ```

mod client;
mod error;

pub use client::CrtStorageClient;
pub use error::CrtError;
