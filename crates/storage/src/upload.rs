//! Upload stage of the migration pipeline.
//!
//! Every `Downloaded` entry has its staged bytes pushed to the store under
//! its deterministic key `<category>/<hash_key>.<extension>`. Keys are
//! derived from the source URL, so an object already present with the same
//! size is taken as uploaded and the put is skipped.
//!
//! Batching, retry and persistence follow the download stage: sequential
//! batches of `concurrent_uploads`, results applied once the batch settles,
//! database saved after every batch.

use std::path::PathBuf;

use assetsync_common::ProgressCallback;
use chrono::Utc;
use futures::future::join_all;

use crate::content_type::content_type_for_extension;
use crate::error::{StorageError, TransferError};
use crate::mapping::{AssetMapping, MappingDatabase, MappingStore};
use crate::retry::retry_with_backoff;
use crate::traits::{ObjectInfo, StorageClient};
use crate::types::{
    MigrationProgress, MigrationSettings, MigrationStage, RetrySettings, StageError,
    TransferStatistics,
};

/// Result of uploading one asset.
struct UploadOutcome {
    asset: AssetMapping,
    bytes: u64,
    already_present: bool,
}

/// Drives the upload stage against any `StorageClient`.
pub struct UploadOrchestrator<'a, C: StorageClient + ?Sized> {
    client: &'a C,
    settings: MigrationSettings,
    progress: Option<&'a dyn ProgressCallback<MigrationProgress>>,
}

impl<'a, C: StorageClient + ?Sized> UploadOrchestrator<'a, C> {
    /// Create an upload orchestrator.
    ///
    /// # Arguments
    /// * `client` - Destination store
    /// * `settings` - Concurrency, staging directory and retry policy
    pub fn new(client: &'a C, settings: MigrationSettings) -> Self {
        Self {
            client,
            settings,
            progress: None,
        }
    }

    /// Report progress after each batch.
    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback<MigrationProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Upload every entry that is downloaded but not yet uploaded.
    ///
    /// Per-item failures are collected in the returned statistics and leave
    /// the entry `Downloaded`.
    ///
    /// # Errors
    /// Returns `StageError` only if persisting the database fails; it
    /// carries the statistics gathered so far.
    pub async fn upload_pending(
        &self,
        store: &MappingStore,
        db: &mut MappingDatabase,
    ) -> Result<TransferStatistics, StageError> {
        let pending: Vec<AssetMapping> = db
            .pending_upload()
            .iter()
            .filter_map(|hash_key: &String| db.get(hash_key).cloned())
            .collect();

        let mut stats: TransferStatistics = TransferStatistics::default();
        if pending.is_empty() {
            log::info!("Nothing to upload");
            return Ok(stats);
        }

        let total: u64 = pending.len() as u64;
        log::info!("Uploading {} assets to bucket {}", total, self.client.bucket());

        let batch_size: usize = self.settings.concurrent_uploads.max(1);
        let mut completed: u64 = 0;

        for batch in pending.chunks(batch_size) {
            let outcomes: Vec<Result<UploadOutcome, TransferError>> =
                join_all(batch.iter().map(|asset| self.upload_one(asset))).await;

            for outcome in outcomes {
                match outcome {
                    Ok(done) => {
                        if done.already_present {
                            stats.record_already_present();
                        } else {
                            stats.record_success(done.bytes);
                        }
                        db.upsert(done.asset.hash_key.clone(), done.asset);
                    }
                    Err(e) => {
                        log::warn!("Upload failed for {}: {}", e.key, e.error);
                        stats.record_failure(e);
                    }
                }
            }

            if let Err(source) = store.save(db) {
                return Err(StageError { stats, source });
            }
            completed += batch.len() as u64;

            if !self.report(completed, total, &stats) {
                log::info!("Upload cancelled after {} of {} assets", completed, total);
                break;
            }
        }

        log::info!("Upload stage finished: {}", stats);
        Ok(stats)
    }

    async fn upload_one(&self, asset: &AssetMapping) -> Result<UploadOutcome, TransferError> {
        let key: String = asset.storage_key();
        let path: PathBuf = asset.staging_path(&self.settings.staging_dir);

        let data: Vec<u8> = tokio::fs::read(&path)
            .await
            .map_err(|e| TransferError::new(&key, StorageError::io(path.display().to_string(), &e)))?;

        let client: &C = self.client;
        let object_key: &str = &key;
        let body: &[u8] = &data;
        let retry: &RetrySettings = &self.settings.retry;

        let existing: Option<ObjectInfo> =
            retry_with_backoff(retry, object_key, move || client.head_object(object_key))
                .await
                .map_err(|e| TransferError::new(object_key, e))?;

        let already_present: bool = matches!(&existing, Some(info) if info.size == data.len() as u64);

        if already_present {
            log::debug!("{} already present; skipping put", key);
        } else {
            let content_type: &str = content_type_for_extension(&asset.extension);
            retry_with_backoff(retry, object_key, move || {
                client.put_object(object_key, body, Some(content_type))
            })
            .await
            .map_err(|e| TransferError::new(object_key, e))?;
        }

        let mut uploaded: AssetMapping = asset.clone();
        let public_url: String = client.public_url(&key);
        uploaded
            .mark_uploaded(key.clone(), public_url, Utc::now())
            .map_err(|e| {
                TransferError::new(
                    &key,
                    StorageError::Other {
                        message: e.to_string(),
                    },
                )
            })?;

        Ok(UploadOutcome {
            asset: uploaded,
            bytes: data.len() as u64,
            already_present,
        })
    }

    fn report(&self, completed: u64, total: u64, stats: &TransferStatistics) -> bool {
        match self.progress {
            Some(cb) => cb.on_progress(&MigrationProgress {
                stage: MigrationStage::Uploading,
                completed,
                total,
                succeeded: stats.succeeded,
                failed: stats.failed,
            }),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::LifecycleState;
    use crate::memory::MemoryStorageClient;
    use tempfile::TempDir;

    const CDN: &str = "https://cdn.test";

    fn settings(dir: &TempDir) -> MigrationSettings {
        MigrationSettings::new()
            .with_concurrency(2)
            .with_staging_dir(dir.path().join("staging"))
            .with_retry(RetrySettings::immediate(1))
    }

    /// Register URLs, mark them downloaded and stage their bytes.
    fn staged_db(dir: &TempDir, urls: &[&str]) -> MappingDatabase {
        let mut db: MappingDatabase = MappingDatabase::new();
        let owned: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        db.register_urls(&owned, 16);
        let staging: PathBuf = dir.path().join("staging");
        for hash_key in db.pending_download() {
            let asset = db.get_mut(&hash_key).unwrap();
            let extension: String = asset.extension.clone();
            asset.mark_downloaded(4, &extension, Utc::now());
            let path: PathBuf = asset.staging_path(&staging);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"data").unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_uploads_and_marks_entries() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let mut db: MappingDatabase =
            staged_db(&dir, &["https://x.net/Amber_Icon.png", "https://x.net/Clip.mp4"]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", CDN);

        let stats: TransferStatistics = UploadOrchestrator::new(&client, settings(&dir))
            .upload_pending(&store, &mut db)
            .await
            .unwrap();

        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.bytes_transferred, 8);
        for asset in db.entries() {
            assert_eq!(asset.state(), LifecycleState::Uploaded);
            let key: &str = asset.object_key.as_deref().unwrap();
            assert_eq!(asset.public_url.as_deref(), Some(format!("{CDN}/{key}").as_str()));
            assert_eq!(client.object(key).as_deref(), Some(&b"data"[..]));
        }
        let video = db.entries().find(|a| a.extension == "mp4").unwrap();
        assert_eq!(
            client.content_type(video.object_key.as_deref().unwrap()).as_deref(),
            Some("video/mp4")
        );
        assert_eq!(store.load().unwrap().claimed_uploaded().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_object_skips_put() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let mut db: MappingDatabase = staged_db(&dir, &["https://x.net/a.png"]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", CDN);
        let key: String = db.entries().next().unwrap().storage_key();
        client.insert(key.clone(), b"data".to_vec());

        let stats: TransferStatistics = UploadOrchestrator::new(&client, settings(&dir))
            .upload_pending(&store, &mut db)
            .await
            .unwrap();

        assert_eq!(stats.already_present, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(client.put_calls(), 0);
        assert_eq!(db.get(&db.claimed_uploaded()[0]).unwrap().object_key, Some(key));
    }

    #[tokio::test]
    async fn test_failed_put_leaves_entry_downloaded() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let mut db: MappingDatabase = staged_db(&dir, &["https://x.net/a.png"]);
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", CDN);
        let key: String = db.entries().next().unwrap().storage_key();
        client.fail_key(
            key.clone(),
            StorageError::NetworkError {
                message: "503".into(),
                retryable: true,
            },
        );

        let stats: TransferStatistics = UploadOrchestrator::new(&client, settings(&dir))
            .upload_pending(&store, &mut db)
            .await
            .unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.errors[0].key, key);
        assert_eq!(client.head_calls(), 2);
        let asset: &AssetMapping = db.entries().next().unwrap();
        assert_eq!(asset.state(), LifecycleState::Downloaded);
        assert!(asset.uploaded_at.is_none());
        assert!(asset.object_key.is_none());
    }

    #[tokio::test]
    async fn test_missing_staged_file_is_reported() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let mut db: MappingDatabase = staged_db(&dir, &["https://x.net/a.png"]);
        std::fs::remove_dir_all(dir.path().join("staging")).unwrap();
        let client: MemoryStorageClient = MemoryStorageClient::new("assets", CDN);

        let stats: TransferStatistics = UploadOrchestrator::new(&client, settings(&dir))
            .upload_pending(&store, &mut db)
            .await
            .unwrap();

        assert_eq!(stats.failed, 1);
        assert!(matches!(stats.errors[0].error, StorageError::IoError { .. }));
        assert_eq!(db.pending_upload().len(), 1);
    }
}
