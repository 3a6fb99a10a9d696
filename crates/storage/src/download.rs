//! Download stage of the migration pipeline.
//!
//! Every `Discovered` entry is fetched from its source URL and written to
//! the staging directory as `<category>/<hash_key>.<extension>`. Work is
//! processed in sequential batches of `concurrent_downloads`; items within
//! a batch run concurrently. Results are applied to the database once the
//! batch settles and the database is persisted after every batch.
//!
//! # Example
//!
//! ```ignore
//! use assetsync_storage::{DownloadOrchestrator, HttpFetcher, MappingStore, MigrationSettings};
//!
//! let fetcher = HttpFetcher::new()?;
//! let store = MappingStore::new("data/asset-mapping.json");
//! let mut db = store.load()?;
//! let stats = DownloadOrchestrator::new(&fetcher, MigrationSettings::default())
//!     .download_pending(&store, &mut db)
//!     .await?;
//! ```

use std::path::{Path, PathBuf};

use assetsync_common::{ProgressCallback, FALLBACK_EXTENSION};
use chrono::Utc;
use futures::future::join_all;

use crate::content_type::{detect_extension, extension_for_content_type};
use crate::error::{StorageError, TransferError};
use crate::fetch::{AssetFetcher, FetchedAsset};
use crate::mapping::{AssetMapping, MappingDatabase, MappingStore};
use crate::retry::retry_with_backoff;
use crate::types::{
    MigrationProgress, MigrationSettings, MigrationStage, StageError, TransferStatistics,
};

/// Drives the download stage.
pub struct DownloadOrchestrator<'a, F: AssetFetcher + ?Sized> {
    fetcher: &'a F,
    settings: MigrationSettings,
    progress: Option<&'a dyn ProgressCallback<MigrationProgress>>,
}

impl<'a, F: AssetFetcher + ?Sized> DownloadOrchestrator<'a, F> {
    /// Create a download orchestrator.
    ///
    /// # Arguments
    /// * `fetcher` - Source of asset bytes
    /// * `settings` - Concurrency, staging directory and retry policy
    pub fn new(fetcher: &'a F, settings: MigrationSettings) -> Self {
        Self {
            fetcher,
            settings,
            progress: None,
        }
    }

    /// Report progress after each batch.
    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback<MigrationProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Download every entry that has not been downloaded yet.
    ///
    /// Per-item failures are collected in the returned statistics and leave
    /// the entry `Discovered`.
    ///
    /// # Arguments
    /// * `store` - Where the database is persisted after each batch
    /// * `db` - The loaded database
    ///
    /// # Errors
    /// Returns `StageError` only if persisting the database fails; it
    /// carries the statistics gathered so far.
    pub async fn download_pending(
        &self,
        store: &MappingStore,
        db: &mut MappingDatabase,
    ) -> Result<TransferStatistics, StageError> {
        let pending: Vec<AssetMapping> = db
            .pending_download()
            .iter()
            .filter_map(|hash_key: &String| db.get(hash_key).cloned())
            .collect();

        let mut stats: TransferStatistics = TransferStatistics::default();
        if pending.is_empty() {
            log::info!("Nothing to download");
            return Ok(stats);
        }

        let total: u64 = pending.len() as u64;
        log::info!(
            "Downloading {} assets into {}",
            total,
            self.settings.staging_dir.display()
        );

        let batch_size: usize = self.settings.concurrent_downloads.max(1);
        let mut completed: u64 = 0;

        for batch in pending.chunks(batch_size) {
            let outcomes: Vec<Result<AssetMapping, TransferError>> =
                join_all(batch.iter().map(|asset| self.download_one(asset))).await;

            for outcome in outcomes {
                match outcome {
                    Ok(downloaded) => {
                        stats.record_success(downloaded.size_bytes);
                        db.upsert(downloaded.hash_key.clone(), downloaded);
                    }
                    Err(e) => {
                        log::warn!("Download failed for {}: {}", e.key, e.error);
                        stats.record_failure(e);
                    }
                }
            }

            if let Err(source) = store.save(db) {
                return Err(StageError { stats, source });
            }
            completed += batch.len() as u64;

            if !self.report(completed, total, &stats) {
                log::info!("Download cancelled after {} of {} assets", completed, total);
                break;
            }
        }

        log::info!("Download stage finished: {}", stats);
        Ok(stats)
    }

    /// Fetch one asset and stage it.
    ///
    /// # Returns
    /// The record as it should look once the download is applied.
    async fn download_one(&self, asset: &AssetMapping) -> Result<AssetMapping, TransferError> {
        let url: &str = &asset.original_url;
        let fetcher: &F = self.fetcher;

        let fetched: FetchedAsset =
            retry_with_backoff(&self.settings.retry, url, move || fetcher.fetch(url))
                .await
                .map_err(|e| TransferError::new(url, e))?;

        let extension: &str =
            refine_extension(&asset.extension, fetched.content_type.as_deref(), &fetched.bytes);
        let mut downloaded: AssetMapping = asset.clone();
        downloaded.mark_downloaded(fetched.bytes.len() as u64, extension, Utc::now());

        let path: PathBuf = downloaded.staging_path(&self.settings.staging_dir);
        write_staged(&path, &fetched.bytes)
            .await
            .map_err(|e| TransferError::new(url, e))?;

        log::debug!("Staged {} as {}", url, path.display());
        Ok(downloaded)
    }

    fn report(&self, completed: u64, total: u64, stats: &TransferStatistics) -> bool {
        match self.progress {
            Some(cb) => cb.on_progress(&MigrationProgress {
                stage: MigrationStage::Downloading,
                completed,
                total,
                succeeded: stats.succeeded,
                failed: stats.failed,
            }),
            None => true,
        }
    }
}

/// Pick the extension to store an asset under.
///
/// A recognised file signature wins over the URL. Otherwise the fallback
/// extension is replaced with one derived from the response type.
fn refine_extension<'e>(current: &'e str, content_type: Option<&str>, bytes: &[u8]) -> &'e str {
    if let Some(detected) = detect_extension(bytes) {
        if detected != current {
            log::debug!("Content is {} although the URL says {}", detected, current);
        }
        return detected;
    }
    if current != FALLBACK_EXTENSION {
        return current;
    }
    match content_type.and_then(extension_for_content_type) {
        Some(extension) => extension,
        None => current,
    }
}

async fn write_staged(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent.display().to_string(), &e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| StorageError::io(path.display().to_string(), &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{LifecycleState, MappingError};
    use crate::types::RetrySettings;
    use assetsync_common::progress_fn;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Serves fixed bytes for every URL, optionally with a content type.
    struct StaticFetcher {
        content_type: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AssetFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedAsset, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedAsset {
                bytes: b"asset-bytes".to_vec(),
                content_type: self.content_type.map(str::to_string),
            })
        }
    }

    fn settings(dir: &TempDir) -> MigrationSettings {
        MigrationSettings::new()
            .with_concurrency(2)
            .with_staging_dir(dir.path().join("staging"))
            .with_retry(RetrySettings::immediate(0))
    }

    #[test]
    fn test_refine_extension() {
        assert_eq!(refine_extension("png", Some("video/mp4"), b"data"), "png");
        assert_eq!(refine_extension("bin", Some("video/mp4"), b"data"), "mp4");
        assert_eq!(refine_extension("bin", Some("text/html"), b"data"), "bin");
        assert_eq!(refine_extension("bin", None, b"data"), "bin");
    }

    #[test]
    fn test_signature_overrides_url_extension() {
        let gif: &[u8] = b"GIF89a\x01\x00\x01\x00";
        assert_eq!(refine_extension("png", Some("image/png"), gif), "gif");
        assert_eq!(refine_extension("bin", None, gif), "gif");
    }

    #[tokio::test]
    async fn test_downloads_are_staged_and_marked() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let mut db: MappingDatabase = MappingDatabase::new();
        db.register_urls(
            &[
                "https://x.net/Amber_Icon.png".to_string(),
                "https://x.net/b.png".to_string(),
                "https://x.net/c.png".to_string(),
            ],
            16,
        );
        let fetcher = StaticFetcher {
            content_type: Some("image/png"),
            calls: AtomicUsize::new(0),
        };

        let stats: TransferStatistics = DownloadOrchestrator::new(&fetcher, settings(&dir))
            .download_pending(&store, &mut db)
            .await
            .unwrap();

        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.bytes_transferred, 33);
        for asset in db.entries() {
            assert_eq!(asset.state(), LifecycleState::Downloaded);
            assert_eq!(asset.size_bytes, 11);
            let staged: PathBuf = asset.staging_path(&dir.path().join("staging"));
            assert_eq!(std::fs::read(staged).unwrap(), b"asset-bytes");
        }
        assert_eq!(store.load().unwrap().pending_upload().len(), 3);
    }

    #[tokio::test]
    async fn test_content_type_refines_unknown_extension() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let mut db: MappingDatabase = MappingDatabase::new();
        db.register_urls(&["https://x.net/media/Trailer".to_string()], 16);
        let fetcher = StaticFetcher {
            content_type: Some("video/mp4"),
            calls: AtomicUsize::new(0),
        };

        DownloadOrchestrator::new(&fetcher, settings(&dir))
            .download_pending(&store, &mut db)
            .await
            .unwrap();

        let asset: &AssetMapping = db.entries().next().unwrap();
        assert_eq!(asset.extension, "mp4");
        assert!(asset.staging_path(&dir.path().join("staging")).exists());
    }

    #[tokio::test]
    async fn test_progress_callback_can_stop() {
        let dir: TempDir = TempDir::new().unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("mapping.json"));
        let mut db: MappingDatabase = MappingDatabase::new();
        let urls: Vec<String> = (0..5).map(|i| format!("https://x.net/{i}.png")).collect();
        db.register_urls(&urls, 16);
        let fetcher = StaticFetcher {
            content_type: None,
            calls: AtomicUsize::new(0),
        };
        let stop = progress_fn(|p: &MigrationProgress| p.completed < 2);

        let stats: TransferStatistics = DownloadOrchestrator::new(&fetcher, settings(&dir))
            .with_progress(&stop)
            .download_pending(&store, &mut db)
            .await
            .unwrap();

        assert_eq!(stats.attempted, 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(db.pending_download().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_batch_statistics() {
        let dir: TempDir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blocker"), b"not a directory").unwrap();
        let store: MappingStore = MappingStore::new(dir.path().join("blocker/mapping.json"));
        let mut db: MappingDatabase = MappingDatabase::new();
        let urls: Vec<String> = (0..4).map(|i| format!("https://x.net/{i}.png")).collect();
        db.register_urls(&urls, 16);
        let fetcher = StaticFetcher {
            content_type: None,
            calls: AtomicUsize::new(0),
        };

        let err: StageError = DownloadOrchestrator::new(&fetcher, settings(&dir))
            .download_pending(&store, &mut db)
            .await
            .unwrap_err();

        assert_eq!(err.stats.attempted, 2);
        assert_eq!(err.stats.succeeded, 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err.source, MappingError::Io { .. }));
    }
}
