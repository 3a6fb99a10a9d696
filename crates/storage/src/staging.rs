//! Maintenance of the staging directory.
//!
//! Staged files are named `<category>/<hash_key>.<extension>`. When the
//! bytes on disk turn out to be a different format than the extension
//! claims, the file is renamed and the entry is sent back through upload
//! so the object gets the right key and content type.

use std::io;
use std::path::{Path, PathBuf};

use crate::content_type::detect_extension;
use crate::error::StorageError;
use crate::mapping::{AssetMapping, MappingDatabase, MappingError, MappingStore};

/// One corrected staged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTypeFix {
    pub hash_key: String,
    pub original_url: String,
    pub old_extension: String,
    pub new_extension: String,
}

/// Outcome of a file-type check over the staging directory.
#[derive(Debug, Clone, Default)]
pub struct FileTypeReport {
    /// Staged files inspected.
    pub checked: u64,
    /// Files whose signature was not recognised; left as they are.
    pub undetected: u64,
    /// Files renamed to their detected type.
    pub fixed: Vec<FileTypeFix>,
    /// Staged files that could not be read or renamed.
    pub errors: Vec<(String, StorageError)>,
}

/// Correct staged files whose content does not match their extension.
///
/// Every downloaded entry's staged file is read and its signature
/// detected. On a mismatch the file is moved to its new staging path and
/// the entry is retyped, which strips any upload. The database is saved
/// once at the end if anything changed.
///
/// # Arguments
/// * `store` - Where the database is persisted
/// * `db` - The loaded database
/// * `staging_dir` - Staging root
///
/// # Errors
/// Returns `MappingError` only if persisting the database fails.
pub async fn fix_file_types(
    store: &MappingStore,
    db: &mut MappingDatabase,
    staging_dir: &Path,
) -> Result<FileTypeReport, MappingError> {
    let downloaded: Vec<AssetMapping> = db
        .entries()
        .filter(|asset| asset.downloaded_at.is_some())
        .cloned()
        .collect();

    let mut report: FileTypeReport = FileTypeReport::default();
    for asset in downloaded {
        let path: PathBuf = asset.staging_path(staging_dir);
        let bytes: Vec<u8> = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = StorageError::io(path.display().to_string(), &e);
                report.errors.push((asset.hash_key.clone(), error));
                continue;
            }
        };
        report.checked += 1;

        let Some(actual) = detect_extension(&bytes) else {
            log::debug!("Could not detect the type of {}", path.display());
            report.undetected += 1;
            continue;
        };
        if actual == asset.extension {
            continue;
        }

        let mut retyped: AssetMapping = asset.clone();
        retyped.retype(actual);
        let target: PathBuf = retyped.staging_path(staging_dir);
        if let Err(e) = move_staged(&path, &target).await {
            report
                .errors
                .push((asset.hash_key.clone(), StorageError::io(target.display().to_string(), &e)));
            continue;
        }

        log::info!(
            "Retyped {}: .{} -> .{}",
            asset.original_url,
            asset.extension,
            actual
        );
        report.fixed.push(FileTypeFix {
            hash_key: asset.hash_key.clone(),
            original_url: asset.original_url.clone(),
            old_extension: asset.extension.clone(),
            new_extension: actual.to_string(),
        });
        db.upsert(retyped.hash_key.clone(), retyped);
    }

    if !report.fixed.is_empty() {
        store.save(db)?;
    }
    Ok(report)
}

async fn move_staged(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(from, to).await
}

/// Delete the staging directory and everything in it.
///
/// # Returns
/// `false` if there was nothing to delete.
///
/// # Errors
/// Returns `StorageError::IoError` if the directory exists but cannot be removed.
pub async fn clear_staging(staging_dir: &Path) -> Result<bool, StorageError> {
    match tokio::fs::remove_dir_all(staging_dir).await {
        Ok(()) => {
            log::info!("Removed staging directory {}", staging_dir.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io(staging_dir.display().to_string(), &e)),
    }
}
