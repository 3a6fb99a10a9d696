//! Object storage, mapping database and migration engine for assetsync.
//!
//! This crate owns everything that talks to the object store or mutates the
//! mapping database:
//!
//! - **Storage Client** - `StorageClient` trait over an S3-compatible bucket,
//!   with an in-process `MemoryStorageClient`
//! - **Mapping Database** - durable JSON index of one record per asset URL
//! - **Migration Pipeline** - bounded-concurrency download and upload stages
//!   with retry and backoff
//! - **Sync Engine** - reconciliation of "uploaded" claims against the store,
//!   read-only verification, and restore of the mapping from its backup
//! - **Maintenance** - bucket audit, staged file-type repair, staging cleanup
//!
//! # Lifecycle
//!
//! Every mapping entry moves `Discovered → Downloaded → Uploaded`. The sync
//! engine moves an entry back from `Uploaded` to `Downloaded` only when the
//! store confirms the object is gone. File-type repair does the same when a
//! staged file's content changes its key.

pub mod audit;
pub mod content_type;
pub mod download;
mod error;
pub mod fetch;
pub mod mapping;
mod memory;
pub mod retry;
pub mod staging;
pub mod sync;
mod traits;
mod types;
pub mod upload;

pub use audit::{audit_store, AuditReport, METADATA_PREFIX};
pub use content_type::{
    content_type_for_extension, detect_extension, extension_for_content_type,
    is_known_extension, DEFAULT_CONTENT_TYPE,
};
pub use download::DownloadOrchestrator;
pub use error::{ErrorKind, StorageError, TransferError};
pub use fetch::{
    check_urls, AssetFetcher, FetchedAsset, HttpFetcher, UrlCheckReport, DEFAULT_FETCH_TIMEOUT,
};
pub use mapping::{
    AssetCategory, AssetMapping, LifecycleState, MappingDatabase, MappingError, MappingStats,
    MappingStore, ProgressSummary, MAPPING_VERSION,
};
pub use memory::MemoryStorageClient;
pub use retry::retry_with_backoff;
pub use staging::{clear_staging, fix_file_types, FileTypeFix, FileTypeReport};
pub use sync::{
    RestoreOutcome, SyncEngine, SyncError, SyncOptions, SyncResult, VerifyReport, MAPPING_BACKUP_KEY,
};
pub use traits::{BucketStats, ListPage, ObjectInfo, StorageClient};
pub use types::{
    MigrationProgress, MigrationSettings, MigrationStage, RetrySettings, StageError,
    TransferStatistics, DEFAULT_STAGING_DIR,
};
pub use upload::UploadOrchestrator;
