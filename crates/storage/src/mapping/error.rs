//! Mapping database error types.

use thiserror::Error;

/// Errors that can occur while reading, writing or mutating the mapping database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// I/O error.
    #[error("I/O error for {path}: {message}")]
    Io { path: String, message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A lifecycle transition was requested from the wrong state.
    #[error("Invalid transition for {hash_key}: {message}")]
    InvalidTransition { hash_key: String, message: String },
}

impl MappingError {
    /// Create an I/O error for a path.
    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        MappingError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}
