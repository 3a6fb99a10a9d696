//! Reconciliation of the mapping database against the object store.
//!
//! Every entry claiming to be uploaded is checked with an existence request.
//! Entries whose object is confirmed absent are moved back to `Downloaded`
//! so the next upload run picks them up again. Checks that fail for any
//! other reason leave the entry untouched.

use futures::future::join_all;
use thiserror::Error;

use assetsync_common::FIXED_KEYS_PREVIEW_LIMIT;

use crate::error::StorageError;
use crate::mapping::{MappingDatabase, MappingError, MappingStore};
use crate::retry::retry_with_backoff;
use crate::traits::StorageClient;
use crate::types::{MigrationSettings, RetrySettings};

/// Object key the mapping document is backed up to after a sync.
pub const MAPPING_BACKUP_KEY: &str = "_meta/asset-mapping.json";

/// Errors that abort a sync pass.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Loading or saving the mapping file failed.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// The repaired mapping was saved locally but could not be backed up.
    #[error("Failed to back up mapping to {key}: {source}")]
    Backup {
        key: String,
        #[source]
        source: StorageError,
    },

    /// The backed-up mapping could not be fetched from the store.
    #[error("Failed to restore mapping from {key}: {source}")]
    Restore {
        key: String,
        #[source]
        source: StorageError,
    },
}

/// Options for a sync pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Existence checks issued concurrently per batch.
    pub batch_size: usize,
    /// Where to back up the mapping document; `None` skips the backup.
    pub backup_key: Option<String>,
    /// Retry policy for existence checks and the backup upload.
    pub retry: RetrySettings,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_settings(&MigrationSettings::default())
    }
}

impl SyncOptions {
    /// Derive sync options from migration settings.
    pub fn from_settings(settings: &MigrationSettings) -> Self {
        Self {
            batch_size: settings.concurrent_uploads.max(1),
            backup_key: Some(MAPPING_BACKUP_KEY.to_string()),
            retry: settings.retry.clone(),
        }
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set or clear the backup key.
    pub fn with_backup_key(mut self, backup_key: Option<String>) -> Self {
        self.backup_key = backup_key;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }
}

/// Outcome of a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Claimed uploads whose existence check completed.
    pub total_checked: u64,
    /// Entries whose object was confirmed absent.
    pub missing_in_store: u64,
    /// Entries repaired back to `Downloaded`.
    pub fixed: u64,
    /// Entries whose object was confirmed present.
    pub verified: u64,
    /// Checks that failed with an unexpected error; not counted elsewhere.
    pub errors: u64,
    /// Former object keys of repaired entries.
    pub fixed_keys: Vec<String>,
}

impl SyncResult {
    /// The first repaired keys, for display.
    pub fn preview(&self) -> &[String] {
        let end: usize = self.fixed_keys.len().min(FIXED_KEYS_PREVIEW_LIMIT);
        &self.fixed_keys[..end]
    }
}

/// Read-only outcome of checking claimed uploads against the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Entries whose object was confirmed present.
    pub verified: u64,
    /// Object keys confirmed absent.
    pub missing: Vec<String>,
    /// Object keys whose check failed, with the error.
    pub errors: Vec<(String, String)>,
}

/// Outcome of restoring the mapping from its backup object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No backup key is configured or the object does not exist.
    NoBackup,
    /// The local mapping file was replaced by the backup.
    Restored { entries: usize },
}

/// Drives a sync pass for one mapping file and one bucket.
pub struct SyncEngine<'a, C: StorageClient + ?Sized> {
    client: &'a C,
    store: &'a MappingStore,
    options: SyncOptions,
}

impl<'a, C: StorageClient + ?Sized> SyncEngine<'a, C> {
    /// Create a sync engine.
    ///
    /// # Arguments
    /// * `client` - Store to verify against
    /// * `store` - Mapping file to repair
    /// * `options` - Batch size, backup key and retry policy
    pub fn new(client: &'a C, store: &'a MappingStore, options: SyncOptions) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    /// Verify every claimed upload and repair entries whose object is gone.
    ///
    /// # Returns
    /// Counts for the pass and the object keys that were repaired.
    ///
    /// # Errors
    /// Returns `SyncError::Mapping` if the mapping file cannot be loaded or
    /// saved, and `SyncError::Backup` if the final backup upload fails.
    pub async fn sync_mapping_with_store(&self) -> Result<SyncResult, SyncError> {
        let mut db: MappingDatabase = self.store.load()?;
        let claimed: Vec<(String, String)> = claimed_object_keys(&db);

        let mut result: SyncResult = SyncResult::default();

        if claimed.is_empty() {
            log::info!("No uploaded entries to verify in {}", self.store.path().display());
            return Ok(result);
        }

        log::info!(
            "Verifying {} uploaded entries against bucket {}",
            claimed.len(),
            self.client.bucket()
        );

        let batch_size: usize = self.options.batch_size.max(1);
        for batch in claimed.chunks(batch_size) {
            let outcomes: Vec<Result<bool, StorageError>> =
                join_all(batch.iter().map(|(_, object_key)| self.check(object_key))).await;

            let mut batch_fixes: u64 = 0;
            for ((hash_key, object_key), outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(true) => {
                        result.total_checked += 1;
                        result.verified += 1;
                    }
                    Ok(false) => {
                        result.total_checked += 1;
                        if let Some(asset) = db.get_mut(hash_key) {
                            asset.strip_upload();
                        }
                        log::warn!("Object {} is missing from the store; marked for re-upload", object_key);
                        result.missing_in_store += 1;
                        result.fixed += 1;
                        result.fixed_keys.push(object_key.clone());
                        batch_fixes += 1;
                    }
                    Err(e) => {
                        log::warn!("Could not verify {}: {}", object_key, e);
                        result.errors += 1;
                    }
                }
            }

            if batch_fixes > 0 {
                self.store.save(&mut db)?;
            }
        }

        self.store.save(&mut db)?;

        if let Some(key) = &self.options.backup_key {
            self.backup(&db, key).await?;
        }

        log::info!(
            "Sync complete: checked={} verified={} missing={} fixed={} errors={}",
            result.total_checked,
            result.verified,
            result.missing_in_store,
            result.fixed,
            result.errors
        );

        Ok(result)
    }

    /// Check every claimed upload without changing the mapping.
    ///
    /// # Errors
    /// Returns `SyncError::Mapping` if the mapping file cannot be loaded.
    pub async fn verify_uploads(&self) -> Result<VerifyReport, SyncError> {
        let db: MappingDatabase = self.store.load()?;
        let claimed: Vec<(String, String)> = claimed_object_keys(&db);
        let mut report: VerifyReport = VerifyReport::default();

        log::info!("Checking {} uploaded entries", claimed.len());
        for batch in claimed.chunks(self.options.batch_size.max(1)) {
            let outcomes: Vec<Result<bool, StorageError>> =
                join_all(batch.iter().map(|(_, object_key)| self.check(object_key))).await;

            for ((_, object_key), outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(true) => report.verified += 1,
                    Ok(false) => {
                        log::warn!("Missing in store: {}", object_key);
                        report.missing.push(object_key.clone());
                    }
                    Err(e) => report.errors.push((object_key.clone(), e.to_string())),
                }
            }
        }

        Ok(report)
    }

    /// Replace the local mapping file with the backup held in the store.
    ///
    /// The backup is parsed before anything is written, so an unreadable
    /// backup leaves the local file untouched.
    ///
    /// # Errors
    /// - `SyncError::Restore` if the backup cannot be fetched
    /// - `SyncError::Mapping` if it is not a valid mapping or cannot be saved
    pub async fn restore_mapping(&self) -> Result<RestoreOutcome, SyncError> {
        let Some(key) = self.options.backup_key.as_deref() else {
            return Ok(RestoreOutcome::NoBackup);
        };
        let client: &C = self.client;
        let restore_error = |source: StorageError| SyncError::Restore {
            key: key.to_string(),
            source,
        };

        let present: bool = self.check(key).await.map_err(restore_error)?;
        if !present {
            log::info!("No mapping backup at {}/{}", client.bucket(), key);
            return Ok(RestoreOutcome::NoBackup);
        }

        let bytes: Vec<u8> =
            retry_with_backoff(&self.options.retry, key, move || client.get_object(key))
                .await
                .map_err(restore_error)?;
        let mut db: MappingDatabase = serde_json::from_slice(&bytes)
            .map_err(|e| MappingError::Serialization(format!("backup {}: {}", key, e)))?;

        self.store.save(&mut db)?;
        log::info!(
            "Restored {} entries from {}/{} into {}",
            db.len(),
            client.bucket(),
            key,
            self.store.path().display()
        );
        Ok(RestoreOutcome::Restored { entries: db.len() })
    }

    async fn check(&self, object_key: &str) -> Result<bool, StorageError> {
        let client: &C = self.client;
        retry_with_backoff(&self.options.retry, object_key, move || {
            client.exists(object_key)
        })
        .await
    }

    async fn backup(&self, db: &MappingDatabase, key: &str) -> Result<(), SyncError> {
        let bytes: Vec<u8> = db.to_json_bytes()?;
        let client: &C = self.client;
        let body: &[u8] = &bytes;

        retry_with_backoff(&self.options.retry, key, move || {
            client.put_object(key, body, Some("application/json"))
        })
        .await
        .map_err(|source| SyncError::Backup {
            key: key.to_string(),
            source,
        })?;

        log::info!("Backed up mapping to {}/{}", client.bucket(), key);
        Ok(())
    }
}

/// `(hash_key, object_key)` for every entry claiming to be uploaded.
fn claimed_object_keys(db: &MappingDatabase) -> Vec<(String, String)> {
    db.claimed_uploaded()
        .into_iter()
        .filter_map(|hash_key: String| {
            let object_key: String = db.get(&hash_key)?.object_key.clone()?;
            Some((hash_key, object_key))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::LifecycleState;
    use crate::memory::MemoryStorageClient;
    use chrono::Utc;
    use tempfile::TempDir;

    const URL: &str = "https://static.wikia.nocookie.net/a/Amber_Icon.png";

    fn options() -> SyncOptions {
        SyncOptions::default()
            .with_batch_size(2)
            .with_retry(RetrySettings::immediate(1))
    }

    /// Write a mapping with one entry per URL, all marked uploaded.
    fn seed_uploaded(store: &MappingStore, urls: &[&str]) -> Vec<String> {
        let mut db: MappingDatabase = MappingDatabase::new();
        let owned: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        db.register_urls(&owned, 16);

        let mut object_keys: Vec<String> = Vec::new();
        for hash_key in db.pending_download() {
            let asset = db.get_mut(&hash_key).unwrap();
            asset.mark_downloaded(3, "png", Utc::now());
            let object_key: String = asset.storage_key();
            asset
                .mark_uploaded(object_key.clone(), format!("https://cdn.test/{object_key}"), Utc::now())
                .unwrap();
            object_keys.push(object_key);
        }
        store.save(&mut db).unwrap();
        object_keys
    }

    #[tokio::test]
    async fn test_missing_object_is_repaired() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let keys: Vec<String> = seed_uploaded(&store, &[URL]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");

        let result: SyncResult = SyncEngine::new(&client, &store, options())
            .sync_mapping_with_store()
            .await
            .unwrap();

        assert_eq!(
            result,
            SyncResult {
                total_checked: 1,
                missing_in_store: 1,
                fixed: 1,
                verified: 0,
                errors: 0,
                fixed_keys: keys.clone(),
            }
        );

        let db: MappingDatabase = store.load().unwrap();
        let asset = db.entries().next().unwrap();
        assert!(asset.uploaded_at.is_none());
        assert!(asset.object_key.is_none());
        assert!(asset.public_url.is_none());
        assert_eq!(asset.state(), LifecycleState::Downloaded);
        assert!(client.contains(MAPPING_BACKUP_KEY));
        assert_eq!(
            client.content_type(MAPPING_BACKUP_KEY).as_deref(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        seed_uploaded(&store, &[URL]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");
        let engine = SyncEngine::new(&client, &store, options());

        engine.sync_mapping_with_store().await.unwrap();
        let second: SyncResult = engine.sync_mapping_with_store().await.unwrap();

        assert_eq!(second, SyncResult::default());
        let db: MappingDatabase = store.load().unwrap();
        assert_eq!(db.pending_upload().len(), 1);
    }

    #[tokio::test]
    async fn test_present_objects_are_verified() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let keys: Vec<String> = seed_uploaded(
            &store,
            &[URL, "https://x.net/b.png", "https://x.net/c.png"],
        );
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");
        for key in &keys {
            client.insert(key.clone(), b"png".to_vec());
        }

        let result: SyncResult = SyncEngine::new(&client, &store, options())
            .sync_mapping_with_store()
            .await
            .unwrap();

        assert_eq!(result.total_checked, 3);
        assert_eq!(result.verified, 3);
        assert_eq!(result.fixed, 0);
        assert!(result.fixed_keys.is_empty());
        assert_eq!(store.load().unwrap().claimed_uploaded().len(), 3);
    }

    #[tokio::test]
    async fn test_check_errors_leave_entry_untouched() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let keys: Vec<String> = seed_uploaded(&store, &[URL, "https://x.net/b.png"]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");
        client.fail_key(
            keys[0].clone(),
            StorageError::NetworkError {
                message: "connection reset".into(),
                retryable: true,
            },
        );

        let result: SyncResult = SyncEngine::new(&client, &store, options())
            .sync_mapping_with_store()
            .await
            .unwrap();

        assert_eq!(result.total_checked, 1);
        assert_eq!(result.errors, 1);
        assert_eq!(result.fixed, 1);
        assert_eq!(result.fixed_keys, vec![keys[1].clone()]);

        let db: MappingDatabase = store.load().unwrap();
        assert_eq!(db.claimed_uploaded().len(), 1);
    }

    #[tokio::test]
    async fn test_errored_check_is_not_counted_as_checked() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let keys: Vec<String> = seed_uploaded(&store, &[URL]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");
        client.fail_key(
            keys[0].clone(),
            StorageError::NetworkError {
                message: "connection reset".into(),
                retryable: true,
            },
        );

        let result: SyncResult = SyncEngine::new(&client, &store, options())
            .sync_mapping_with_store()
            .await
            .unwrap();

        assert_eq!(
            result,
            SyncResult {
                errors: 1,
                ..Default::default()
            }
        );
        assert_eq!(store.load().unwrap().claimed_uploaded().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_claimed_set_short_circuits() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");

        let result: SyncResult = SyncEngine::new(&client, &store, options())
            .sync_mapping_with_store()
            .await
            .unwrap();

        assert_eq!(result, SyncResult::default());
        assert_eq!(client.head_calls(), 0);
        assert!(!client.contains(MAPPING_BACKUP_KEY));
    }

    #[tokio::test]
    async fn test_backup_failure_is_reported_after_save() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        seed_uploaded(&store, &[URL]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");
        client.fail_key(
            MAPPING_BACKUP_KEY,
            StorageError::AccessDenied {
                bucket: "assets".into(),
                key: MAPPING_BACKUP_KEY.into(),
                message: "denied".into(),
            },
        );

        let err: SyncError = SyncEngine::new(&client, &store, options())
            .sync_mapping_with_store()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Backup { .. }));
        assert!(store.load().unwrap().claimed_uploaded().is_empty());
    }

    #[tokio::test]
    async fn test_verify_uploads_reports_without_repairing() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let keys: Vec<String> = seed_uploaded(&store, &[URL, "https://x.net/b.png"]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");
        client.insert(keys[0].clone(), b"png".to_vec());

        let report: VerifyReport = SyncEngine::new(&client, &store, options())
            .verify_uploads()
            .await
            .unwrap();

        assert_eq!(report.verified, 1);
        assert_eq!(report.missing, vec![keys[1].clone()]);
        assert!(report.errors.is_empty());
        assert_eq!(store.load().unwrap().claimed_uploaded().len(), 2);
        assert!(!client.contains(MAPPING_BACKUP_KEY));
    }

    #[tokio::test]
    async fn test_restore_mapping_from_backup() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        seed_uploaded(&store, &[URL, "https://x.net/b.png"]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");
        let engine = SyncEngine::new(&client, &store, options());
        engine.sync_mapping_with_store().await.unwrap();

        std::fs::remove_file(store.path()).unwrap();
        let outcome: RestoreOutcome = engine.restore_mapping().await.unwrap();

        assert_eq!(outcome, RestoreOutcome::Restored { entries: 2 });
        assert_eq!(store.load().unwrap().pending_upload().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_without_backup_leaves_local_file() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        seed_uploaded(&store, &[URL]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");

        let outcome: RestoreOutcome = SyncEngine::new(&client, &store, options())
            .restore_mapping()
            .await
            .unwrap();

        assert_eq!(outcome, RestoreOutcome::NoBackup);
        assert_eq!(store.load().unwrap().claimed_uploaded().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_backup_is_rejected() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        seed_uploaded(&store, &[URL]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", "https://cdn.test");
        client.insert(MAPPING_BACKUP_KEY, b"<html>".to_vec());

        let err: SyncError = SyncEngine::new(&client, &store, options())
            .restore_mapping()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Mapping(MappingError::Serialization(_))));
        assert_eq!(store.load().unwrap().claimed_uploaded().len(), 1);
    }

    #[test]
    fn test_preview_is_bounded() {
        let result: SyncResult = SyncResult {
            fixed_keys: (0..30).map(|i| format!("icons/{i}.png")).collect(),
            ..Default::default()
        };
        assert_eq!(result.preview().len(), 20);
        assert_eq!(result.preview()[0], "icons/0.png");
    }
}
