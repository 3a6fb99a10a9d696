//! Loading and atomic persistence of the mapping document.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;

use super::error::MappingError;
use super::MappingDatabase;

/// File-backed home of a [`MappingDatabase`].
#[derive(Debug, Clone)]
pub struct MappingStore {
    path: PathBuf,
}

impl MappingStore {
    /// Create a store for the given mapping file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to the mapping file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the database.
    ///
    /// A missing file yields a fresh database. A file that exists but does not
    /// parse is logged and replaced by a fresh database on the next save.
    ///
    /// # Errors
    /// Returns `MappingError::Io` if the file exists but cannot be read.
    pub fn load(&self) -> Result<MappingDatabase, MappingError> {
        let bytes: Vec<u8> = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No mapping file at {}; starting fresh", self.path.display());
                return Ok(MappingDatabase::new());
            }
            Err(e) => return Err(MappingError::io(&self.path, &e)),
        };

        match serde_json::from_slice::<MappingDatabase>(&bytes) {
            Ok(db) => {
                log::debug!(
                    "Loaded {} mappings from {}",
                    db.len(),
                    self.path.display()
                );
                Ok(db)
            }
            Err(e) => {
                log::warn!(
                    "Mapping file {} is invalid ({}); starting with an empty database",
                    self.path.display(),
                    e
                );
                Ok(MappingDatabase::new())
            }
        }
    }

    /// Persist the database atomically.
    ///
    /// Stats are recomputed and `last_updated` is stamped before writing. The
    /// document is written to a temporary file in the same directory and then
    /// renamed over the target.
    ///
    /// # Errors
    /// Returns `MappingError::Io` or `MappingError::Serialization` on failure.
    pub fn save(&self, db: &mut MappingDatabase) -> Result<(), MappingError> {
        db.refresh_stats();
        db.last_updated = Utc::now();
        let bytes: Vec<u8> = db.to_json_bytes()?;

        let dir: &Path = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| MappingError::io(dir, &e))?;

        let mut tmp: NamedTempFile =
            NamedTempFile::new_in(dir).map_err(|e| MappingError::io(dir, &e))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| MappingError::io(tmp.path(), &e))?;
        tmp.persist(&self.path)
            .map_err(|e| MappingError::io(&self.path, &e.error))?;

        Ok(())
    }
}
