//! Error types for storage operations.

use thiserror::Error;

/// Errors that can occur during storage and transfer operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Object confirmed absent from the store.
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Access denied.
    #[error("Access denied to {bucket}/{key}: {message}")]
    AccessDenied {
        bucket: String,
        key: String,
        message: String,
    },

    /// The remote asked us to slow down (HTTP 429 or S3 `SlowDown`).
    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    /// Network or service error.
    #[error("Network error: {message}")]
    NetworkError { message: String, retryable: bool },

    /// Source responded with a non-success status that retrying will not fix.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// Local I/O error.
    #[error("I/O error for {path}: {message}")]
    IoError { path: String, message: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

/// Coarse classification callers switch on instead of inspecting fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Confirmed absent.
    NotFound,
    /// Network failure, 5xx or rate limit; safe to retry.
    Transient,
    /// Anything else from the store or source; not retried.
    Permanent,
    /// Missing or malformed settings.
    InvalidConfiguration,
}

impl StorageError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::RateLimited { .. } => ErrorKind::Transient,
            StorageError::NetworkError { retryable: true, .. } => ErrorKind::Transient,
            StorageError::NetworkError { retryable: false, .. } => ErrorKind::Permanent,
            StorageError::AccessDenied { .. } => ErrorKind::Permanent,
            StorageError::HttpStatus { .. } => ErrorKind::Permanent,
            StorageError::IoError { .. } => ErrorKind::Permanent,
            StorageError::Other { .. } => ErrorKind::Permanent,
            StorageError::InvalidConfig { .. } => ErrorKind::InvalidConfiguration,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Check if this error is a rate-limit response.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, StorageError::RateLimited { .. })
    }

    /// Create an I/O error for a local path.
    ///
    /// # Arguments
    /// * `path` - Path where the error occurred
    /// * `err` - The underlying I/O error
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        StorageError::IoError {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Non-fatal error encountered for one item of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferError {
    /// The URL or object key that failed.
    pub key: String,
    /// The error that occurred.
    pub error: StorageError,
}

impl TransferError {
    /// Create a new transfer error.
    pub fn new(key: impl Into<String>, error: StorageError) -> Self {
        Self {
            key: key.into(),
            error,
        }
    }
}
