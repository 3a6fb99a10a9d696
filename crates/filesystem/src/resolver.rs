//! Resolution of user-supplied source paths into JSON documents.
//!
//! Every path is resolved relative to a designated data root. Resolution is
//! purely lexical (normalize, then prefix-check) so that `..` segments, mixed
//! separators and trailing slashes cannot escape the root. Only after the
//! containment check passes is the filesystem consulted.

use std::path::{Path, PathBuf};

use assetsync_common::{
    has_extension, is_within_root, lexical_normalize, normalize_separators, to_absolute,
    DEFAULT_SOURCE_SUBDIR,
};
use walkdir::WalkDir;

use crate::error::FileSystemError;

/// Result of resolving a source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSources {
    /// Normalized absolute data root.
    pub root: PathBuf,
    /// Normalized absolute target (file or directory).
    pub target: PathBuf,
    /// JSON files found under the target, sorted by path.
    pub files: Vec<PathBuf>,
}

/// Resolve a relative path under `root` into a set of JSON source files.
///
/// # Arguments
/// * `root` - Data root directory; nothing outside it may be read
/// * `relative` - Path relative to the root, or `None` for the default subdirectory
///
/// # Returns
/// The resolved target and the JSON files it contains.
///
/// # Errors
/// - `PathTraversal` if the normalized path leaves the root
/// - `NotFound` if the target does not exist
/// - `InvalidFileType` if the target is a file without a `.json` extension
pub fn resolve_sources(
    root: &Path,
    relative: Option<&str>,
) -> Result<ResolvedSources, FileSystemError> {
    let abs_root: PathBuf = lexical_normalize(&to_absolute(root)?);
    let requested: String = normalize_separators(relative.unwrap_or(DEFAULT_SOURCE_SUBDIR));

    // Joining an absolute path replaces the root, which the prefix check then rejects.
    let target: PathBuf = lexical_normalize(&abs_root.join(requested.trim_end_matches('/')));
    if !is_within_root(&target, &abs_root) {
        return Err(FileSystemError::PathTraversal {
            path: target.display().to_string(),
            root: abs_root.display().to_string(),
        });
    }

    let metadata: std::fs::Metadata = match std::fs::metadata(&target) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FileSystemError::NotFound {
                path: target.display().to_string(),
            });
        }
        Err(e) => return Err(FileSystemError::io(target.display().to_string(), &e)),
    };

    let files: Vec<PathBuf> = if metadata.is_dir() {
        collect_json_files(&target)
    } else if has_extension(&target, "json") {
        vec![target.clone()]
    } else {
        return Err(FileSystemError::InvalidFileType {
            path: target.display().to_string(),
        });
    };

    log::debug!(
        "Resolved {} to {} JSON file(s)",
        target.display(),
        files.len()
    );

    Ok(ResolvedSources {
        root: abs_root,
        target,
        files,
    })
}

/// Recursively collect `.json` files below a directory.
///
/// Unreadable directory entries are logged and skipped.
fn collect_json_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && has_extension(entry.path(), "json") {
                    files.push(entry.into_path());
                }
            }
            Err(e) => log::warn!("Skipping unreadable entry under {}: {}", dir.display(), e),
        }
    }

    files
}
