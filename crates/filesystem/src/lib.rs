//! Source discovery for assetsync.
//!
//! This crate turns a user-supplied path into the set of asset URLs to migrate:
//! - `resolve_sources()` - Safe path resolution and JSON file enumeration
//! - `UrlFilter` - Validity and source-host predicate for candidate strings
//! - `extract_urls_from_files()` - Schema-agnostic URL collection across documents
//! - `rewrite_files()` - Point source documents at migrated assets, with backups

pub mod error;
pub mod extractor;
pub mod resolver;
pub mod rewrite;

// Re-export main types
pub use error::FileSystemError;
pub use extractor::{
    extract_from_value, extract_urls, extract_urls_from_file, extract_urls_from_files,
    ExtractionReport, UrlFilter,
};
pub use resolver::{resolve_sources, ResolvedSources};
pub use rewrite::{
    list_backups, restore_backup, rewrite_files, rewrite_value, FileRewrite, RestoreReport,
    RewriteCounts, RewriteReport,
};
