//! Bucket audit: compare the store's listing with the mapping database.
//!
//! Reports objects nobody tracks (left behind by retyped or abandoned
//! assets) and tracked objects that are gone. Nothing is modified; `sync`
//! is the command that repairs missing objects.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StorageError;
use crate::mapping::{AssetCategory, MappingDatabase};
use crate::traits::{ObjectInfo, StorageClient};

/// Key prefix reserved for metadata such as the mapping backup.
pub const METADATA_PREFIX: &str = "_meta/";

/// Bucket for keys whose first segment is not a known category.
const UNKNOWN_CATEGORY: &str = "unknown";

/// Result of comparing a bucket listing with the mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Asset objects in the store, metadata excluded.
    pub total_objects: u64,
    /// Entries claiming to be uploaded.
    pub total_mapped: u64,
    /// Keys in the store that no entry claims, sorted.
    pub untracked: Vec<String>,
    /// Keys claimed by an entry but absent from the store, sorted.
    pub missing: Vec<String>,
    /// Untracked keys counted by category prefix.
    pub untracked_by_category: BTreeMap<String, u64>,
}

impl AuditReport {
    /// Whether the store and the mapping agree.
    pub fn is_clean(&self) -> bool {
        self.untracked.is_empty() && self.missing.is_empty()
    }
}

/// List the whole bucket and compare it with the mapping.
///
/// # Arguments
/// * `client` - Store to list
/// * `db` - Loaded mapping database
///
/// # Errors
/// Returns the first listing error.
pub async fn audit_store<C: StorageClient + ?Sized>(
    client: &C,
    db: &MappingDatabase,
) -> Result<AuditReport, StorageError> {
    log::info!("Listing bucket {}", client.bucket());
    let listed: BTreeSet<String> = client
        .list_all_objects("")
        .await?
        .into_iter()
        .map(|object: ObjectInfo| object.key)
        .filter(|key: &String| !key.starts_with(METADATA_PREFIX))
        .collect();

    let mapped: BTreeSet<String> = db
        .entries()
        .filter(|asset| asset.is_claimed_uploaded())
        .filter_map(|asset| asset.object_key.clone())
        .collect();

    let untracked: Vec<String> = listed.difference(&mapped).cloned().collect();
    let missing: Vec<String> = mapped.difference(&listed).cloned().collect();

    let mut untracked_by_category: BTreeMap<String, u64> = BTreeMap::new();
    for key in &untracked {
        *untracked_by_category
            .entry(category_of_key(key).to_string())
            .or_insert(0) += 1;
    }

    log::info!(
        "Audit of {}: {} objects, {} mapped, {} untracked, {} missing",
        client.bucket(),
        listed.len(),
        mapped.len(),
        untracked.len(),
        missing.len()
    );

    Ok(AuditReport {
        total_objects: listed.len() as u64,
        total_mapped: mapped.len() as u64,
        untracked,
        missing,
        untracked_by_category,
    })
}

fn category_of_key(key: &str) -> &str {
    match key.split_once('/') {
        Some((prefix, _)) if AssetCategory::ALL.iter().any(|c| c.as_str() == prefix) => prefix,
        _ => UNKNOWN_CATEGORY,
    }
}
