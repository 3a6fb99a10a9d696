//! Cloudflare R2 backend for assetsync storage.
//!
//! This crate provides a `StorageClient` implementation for R2's
//! S3-compatible API using the AWS SDK for Rust, plus loading and
//! validation of the credentials it needs.
//!
//! # Example
//!
//! ```ignore
//! use assetsync_storage::{SyncEngine, SyncOptions, MappingStore};
//! use assetsync_storage_crt::{R2Config, R2StorageClient};
//!
//! let config = R2Config::from_env()?;
//! let client = R2StorageClient::new(&config).await;
//! let store = MappingStore::new("data/asset-mapping.json");
//! let result = SyncEngine::new(&client, &store, SyncOptions::default())
//!     .sync_mapping_with_store()
//!     .await?;
//! ```

mod client;
mod config;
mod error;

pub use client::R2StorageClient;
pub use config::{
    ConfigError, R2Config, ENV_ACCESS_KEY_ID, ENV_ACCOUNT_ID, ENV_BUCKET_NAME, ENV_PUBLIC_URL,
    ENV_SECRET_ACCESS_KEY,
};
