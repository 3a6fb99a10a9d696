//! Shared constants used across assetsync crates.

/// Number of hex characters kept from the URL digest to form a hash key.
pub const DEFAULT_HASH_LENGTH: usize = 16;

/// Subdirectory of the data root scanned when no path is given.
pub const DEFAULT_SOURCE_SUBDIR: &str = "characters";

/// Host that serves the original assets referenced by scraped documents.
pub const DEFAULT_SOURCE_HOST: &str = "static.wikia.nocookie.net";

/// Extension used when neither the URL nor the response reveals one.
pub const FALLBACK_EXTENSION: &str = "bin";

/// Default maximum retry attempts per item.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between retries in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default exponential backoff multiplier.
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default wait applied after a rate-limit response, in milliseconds.
pub const DEFAULT_RATE_LIMIT_WAIT_MS: u64 = 5000;

/// Number of repaired keys shown in sync summaries.
pub const FIXED_KEYS_PREVIEW_LIMIT: usize = 20;
