//! Path normalization utilities for resolving user-supplied source paths.

use std::path::{Component, Path, PathBuf};

use crate::error::PathError;

/// Convert a path to absolute without resolving symlinks.
///
/// # Arguments
/// * `path` - Path to convert (relative or absolute)
///
/// # Returns
/// Absolute path, joining with current directory if relative.
///
/// # Errors
/// Returns error if current directory cannot be determined.
pub fn to_absolute(path: &Path) -> Result<PathBuf, PathError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        std::env::current_dir()
            .map(|cwd: PathBuf| cwd.join(path))
            .map_err(|e: std::io::Error| PathError::io(path.display().to_string(), &e))
    }
}

/// Lexical path normalization without filesystem access.
///
/// Removes `.` components and resolves `..` components lexically.
/// Does not access the filesystem or resolve symlinks.
///
/// # Arguments
/// * `path` - Path to normalize
///
/// # Returns
/// Normalized path with `.` and `..` resolved lexically.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => { /* skip . */ }
            Component::ParentDir => {
                // Pop if we can and it's not a ParentDir or RootDir
                if !components.is_empty()
                    && !matches!(
                        components.last(),
                        Some(Component::ParentDir) | Some(Component::RootDir)
                    )
                {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            _ => components.push(component),
        }
    }

    components.iter().collect()
}

/// Treat backslashes in user input as path separators.
///
/// On Unix a backslash is a legal filename character, which would let
/// `..\..\etc` slip past component-based normalization. Input paths are
/// always relative to the data root, so both separators are accepted.
///
/// # Arguments
/// * `raw` - User-supplied relative path
///
/// # Returns
/// The same path with every `\` replaced by `/`.
pub fn normalize_separators(raw: &str) -> String {
    raw.replace('\\', "/")
}

/// Check if a path is within a root directory (security validation).
///
/// Uses lexical comparison, does not access filesystem.
///
/// # Arguments
/// * `path` - Path to check
/// * `root` - Root directory that should contain the path
///
/// # Returns
/// `true` if path is within root, `false` otherwise.
pub fn is_within_root(path: &Path, root: &Path) -> bool {
    let norm_path: PathBuf = lexical_normalize(path);
    let norm_root: PathBuf = lexical_normalize(root);
    norm_path.starts_with(&norm_root)
}

/// Check whether a path ends with the given extension (ASCII case-insensitive).
///
/// # Arguments
/// * `path` - Path to check
/// * `extension` - Extension without the leading dot
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext: &str| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
