//! Schema-agnostic extraction of asset URLs from JSON documents.
//!
//! Documents are walked structurally: every string leaf is a candidate,
//! arrays and objects are descended without looking at key names. A candidate
//! is admitted only when it is a well-formed http(s) URL hosted on one of the
//! allowed source hosts. Results accumulate into one ordered set so an asset
//! referenced from many documents is counted once.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use assetsync_common::DEFAULT_SOURCE_HOST;
use serde_json::Value;
use url::Url;

use crate::error::FileSystemError;

/// Predicate deciding which strings are asset URLs worth migrating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFilter {
    /// Lower-case hosts; subdomains of these are accepted too.
    allowed_hosts: Vec<String>,
}

impl UrlFilter {
    /// Create a filter accepting the given hosts and their subdomains.
    ///
    /// # Arguments
    /// * `hosts` - Host names such as `static.wikia.nocookie.net`
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Hosts accepted by this filter.
    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// Test whether a string is a valid URL on an allowed host.
    ///
    /// # Arguments
    /// * `candidate` - Any string value found in a document
    pub fn matches(&self, candidate: &str) -> bool {
        let Ok(parsed) = Url::parse(candidate) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.allowed_hosts.iter().any(|allowed: &String| {
            host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix: &str| prefix.ends_with('.'))
        })
    }
}

impl Default for UrlFilter {
    fn default() -> Self {
        Self::new([DEFAULT_SOURCE_HOST])
    }
}

/// Outcome of scanning a batch of documents.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// Distinct URLs across every readable document.
    pub urls: BTreeSet<String>,
    /// Documents that were read and parsed successfully.
    pub files_scanned: usize,
    /// Documents that were skipped, with the reason.
    pub failed_files: Vec<FileSystemError>,
}

/// Walk a JSON value and add every matching URL to `found`.
///
/// # Arguments
/// * `value` - Any JSON value
/// * `filter` - URL predicate
/// * `found` - Accumulator shared across documents
pub fn extract_urls(value: &Value, filter: &UrlFilter, found: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            if !found.contains(s) && filter.matches(s) {
                found.insert(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                extract_urls(item, filter, found);
            }
        }
        Value::Object(fields) => {
            for field in fields.values() {
                extract_urls(field, filter, found);
            }
        }
        Value::Number(_) | Value::Bool(_) | Value::Null => {}
    }
}

/// Extract matching URLs from a single JSON value.
///
/// # Arguments
/// * `value` - Any JSON value
/// * `filter` - URL predicate
///
/// # Returns
/// The distinct URLs found in `value`.
pub fn extract_from_value(value: &Value, filter: &UrlFilter) -> BTreeSet<String> {
    let mut found: BTreeSet<String> = BTreeSet::new();
    extract_urls(value, filter, &mut found);
    found
}

/// Read one JSON document and add its URLs to `found`.
///
/// # Arguments
/// * `path` - Path to the JSON document
/// * `filter` - URL predicate
/// * `found` - Accumulator shared across documents
///
/// # Returns
/// Number of URLs that were new to `found`.
///
/// # Errors
/// Returns `Io` if the file cannot be read and `Parse` if it is not valid JSON.
pub fn extract_urls_from_file(
    path: &Path,
    filter: &UrlFilter,
    found: &mut BTreeSet<String>,
) -> Result<usize, FileSystemError> {
    let contents: String = std::fs::read_to_string(path)
        .map_err(|e| FileSystemError::io(path.display().to_string(), &e))?;
    let value: Value = serde_json::from_str(&contents).map_err(|e| FileSystemError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let before: usize = found.len();
    extract_urls(&value, filter, found);
    Ok(found.len() - before)
}

/// Extract URLs from a batch of documents into one global set.
///
/// A document that cannot be read or parsed is logged and recorded in the
/// report; it never aborts the batch.
///
/// # Arguments
/// * `files` - JSON documents to scan
/// * `filter` - URL predicate
pub fn extract_urls_from_files(files: &[PathBuf], filter: &UrlFilter) -> ExtractionReport {
    let mut report: ExtractionReport = ExtractionReport::default();

    for path in files {
        match extract_urls_from_file(path, filter, &mut report.urls) {
            Ok(added) => {
                report.files_scanned += 1;
                log::debug!("{}: {} new URL(s)", path.display(), added);
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                report.failed_files.push(e);
            }
        }
    }

    log::info!(
        "Extracted {} distinct URL(s) from {} file(s), {} skipped",
        report.urls.len(),
        report.files_scanned,
        report.failed_files.len()
    );

    report
}
