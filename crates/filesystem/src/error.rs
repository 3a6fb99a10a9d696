//! Error types for source discovery.

use assetsync_common::PathError;
use thiserror::Error;

/// Errors that can occur while resolving or reading source documents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileSystemError {
    /// The requested path normalizes to a location outside the data root.
    #[error("Path traversal rejected: {path} escapes {root}")]
    PathTraversal { path: String, root: String },

    /// The requested path does not exist.
    #[error("Path not found: {path}")]
    NotFound { path: String },

    /// A single file was requested that is not a JSON document.
    #[error("Not a JSON file: {path}")]
    InvalidFileType { path: String },

    /// Local I/O error.
    #[error("I/O error for {path}: {message}")]
    Io { path: String, message: String },

    /// A document could not be parsed as JSON.
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

impl FileSystemError {
    /// Create an I/O error for a path.
    ///
    /// # Arguments
    /// * `path` - Path where the error occurred
    /// * `err` - The underlying I/O error
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        FileSystemError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<PathError> for FileSystemError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::PathOutsideRoot { path, root } => FileSystemError::PathTraversal { path, root },
            PathError::IoError { path, message } => FileSystemError::Io { path, message },
        }
    }
}
