//! Shared types and utilities for assetsync.
//!
//! This crate provides common functionality used across all assetsync crates:
//! - Path normalization and root containment checks
//! - URL hashing for content-addressed keys
//! - Generic progress callback trait
//! - Shared constants and error types

pub mod constants;
pub mod error;
pub mod hash;
pub mod path_utils;
pub mod progress;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::PathError;
pub use hash::hash_url;
pub use path_utils::{
    has_extension, is_within_root, lexical_normalize, normalize_separators, to_absolute,
};
pub use progress::{progress_fn, FnProgress, ProgressCallback};
