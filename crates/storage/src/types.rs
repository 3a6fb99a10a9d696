//! Shared data structures for migration operations.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use assetsync_common::{
    DEFAULT_HASH_LENGTH, DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_WAIT_MS,
    DEFAULT_RETRY_BACKOFF_MULTIPLIER, DEFAULT_RETRY_DELAY_MS,
};

use thiserror::Error;

use crate::error::{StorageError, TransferError};
use crate::mapping::MappingError;

/// Default staging directory for downloaded assets.
pub const DEFAULT_STAGING_DIR: &str = ".assetsync/staging";

/// Retry settings for network operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// Retries after the first attempt; an item gets `max_retries + 1` attempts.
    pub max_retries: u32,
    /// Base delay before the first retry, in milliseconds.
    pub retry_delay_ms: u64,
    /// Multiplier applied per attempt (exponential backoff).
    pub retry_backoff_multiplier: f64,
    /// Wait applied after a rate-limit response, in milliseconds.
    pub rate_limit_wait_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            retry_backoff_multiplier: DEFAULT_RETRY_BACKOFF_MULTIPLIER,
            rate_limit_wait_ms: DEFAULT_RATE_LIMIT_WAIT_MS,
        }
    }
}

impl RetrySettings {
    /// Retry settings without any waiting between attempts.
    ///
    /// # Arguments
    /// * `max_retries` - Retries after the first attempt
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay_ms: 0,
            retry_backoff_multiplier: 1.0,
            rate_limit_wait_ms: 0,
        }
    }

    /// Delay to apply after a failed attempt.
    ///
    /// # Arguments
    /// * `attempt` - Zero-based index of the attempt that just failed
    /// * `error` - The error it failed with
    pub fn delay_for(&self, attempt: u32, error: &StorageError) -> Duration {
        if error.is_rate_limited() {
            return Duration::from_millis(self.rate_limit_wait_ms);
        }
        let factor: f64 = self.retry_backoff_multiplier.max(1.0).powi(attempt as i32);
        Duration::from_millis((self.retry_delay_ms as f64 * factor) as u64)
    }
}

/// Configuration for the download and upload stages.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Concurrent fetches per download batch.
    pub concurrent_downloads: usize,
    /// Concurrent puts (and sync existence checks) per batch.
    pub concurrent_uploads: usize,
    /// Hex characters kept from the URL digest.
    pub hash_length: usize,
    /// Directory holding downloaded assets awaiting upload.
    pub staging_dir: PathBuf,
    /// Retry policy for every network call.
    pub retry: RetrySettings,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        let cores: usize = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            concurrent_downloads: cores,
            concurrent_uploads: cores,
            hash_length: DEFAULT_HASH_LENGTH,
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            retry: RetrySettings::default(),
        }
    }
}

impl MigrationSettings {
    /// Create settings with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set concurrency for both stages.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrent_downloads = concurrency;
        self.concurrent_uploads = concurrency;
        self
    }

    /// Set the staging directory.
    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Set the hash key length.
    pub fn with_hash_length(mut self, hash_length: usize) -> Self {
        self.hash_length = hash_length;
        self
    }
}

/// Aggregated statistics for one stage run.
#[derive(Debug, Clone, Default)]
pub struct TransferStatistics {
    /// Items attempted.
    pub attempted: u64,
    /// Items that reached their target state.
    pub succeeded: u64,
    /// Items that failed after exhausting retries.
    pub failed: u64,
    /// Uploads skipped because the object was already in the store.
    pub already_present: u64,
    /// Bytes moved over the network.
    pub bytes_transferred: u64,
    /// Errors encountered (non-fatal).
    pub errors: Vec<TransferError>,
}

impl TransferStatistics {
    /// Record a successful item.
    pub fn record_success(&mut self, bytes: u64) {
        self.attempted += 1;
        self.succeeded += 1;
        self.bytes_transferred += bytes;
    }

    /// Record an item whose object was already present.
    pub fn record_already_present(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
        self.already_present += 1;
    }

    /// Record a failed item.
    pub fn record_failure(&mut self, error: TransferError) {
        self.attempted += 1;
        self.failed += 1;
        self.errors.push(error);
    }

    /// Merge another statistics into this one.
    pub fn merge(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.already_present += other.already_present;
        self.bytes_transferred += other.bytes_transferred;
        self.errors.extend(other.errors);
    }
}

impl fmt::Display for TransferStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempted={} succeeded={} failed={} already_present={} bytes={}",
            self.attempted, self.succeeded, self.failed, self.already_present, self.bytes_transferred
        )
    }
}

/// A stage that stopped because the database could not be persisted.
///
/// Carries the statistics gathered up to the failed save so callers can
/// still report them.
#[derive(Error, Debug)]
#[error("{source} (stage stopped after {stats})")]
pub struct StageError {
    /// Statistics for the items processed before the failure.
    pub stats: TransferStatistics,
    #[source]
    pub source: MappingError,
}

/// Pipeline stage reporting progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStage {
    Downloading,
    Uploading,
}

/// Progress snapshot reported after each batch.
#[derive(Debug, Clone)]
pub struct MigrationProgress {
    /// Stage in progress.
    pub stage: MigrationStage,
    /// Items processed so far.
    pub completed: u64,
    /// Items selected for this run.
    pub total: u64,
    /// Successes so far.
    pub succeeded: u64,
    /// Failures so far.
    pub failed: u64,
}
