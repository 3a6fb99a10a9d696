//! Durable index of every discovered asset.
//!
//! The database is a single JSON document keyed by hash key. It is loaded
//! fully into memory, mutated by the orchestrating task only, and persisted
//! atomically through [`MappingStore`].

mod entry;
mod error;
mod store;

use std::collections::BTreeMap;

use assetsync_common::hash_url;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use entry::{AssetCategory, AssetMapping, LifecycleState};
pub use error::MappingError;
pub use store::MappingStore;

/// Document version written by this crate.
pub const MAPPING_VERSION: &str = "1.0.0";

/// Aggregate statistics stored alongside the mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingStats {
    pub total_assets: u64,
    pub total_size_bytes: u64,
    pub by_category: BTreeMap<AssetCategory, u64>,
}

/// Counts of entries in each lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSummary {
    pub total: u64,
    pub discovered: u64,
    pub downloaded: u64,
    pub uploaded: u64,
}

impl ProgressSummary {
    /// Percentage of entries that have been downloaded (including uploaded ones).
    pub fn downloaded_percent(&self) -> f64 {
        percent(self.downloaded + self.uploaded, self.total)
    }

    /// Percentage of entries that have been uploaded.
    pub fn uploaded_percent(&self) -> f64 {
        percent(self.uploaded, self.total)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// The in-memory mapping document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingDatabase {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub mappings: BTreeMap<String, AssetMapping>,
    #[serde(default)]
    pub stats: MappingStats,
}

impl Default for MappingDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self {
            version: MAPPING_VERSION.to_string(),
            last_updated: Utc::now(),
            mappings: BTreeMap::new(),
            stats: MappingStats::default(),
        }
    }

    /// Number of indexed assets.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the database has no entries.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Insert or overwrite the record for `hash_key`.
    pub fn upsert(&mut self, hash_key: impl Into<String>, asset: AssetMapping) {
        self.mappings.insert(hash_key.into(), asset);
    }

    /// Look up a record.
    pub fn get(&self, hash_key: &str) -> Option<&AssetMapping> {
        self.mappings.get(hash_key)
    }

    /// Look up a record for mutation.
    pub fn get_mut(&mut self, hash_key: &str) -> Option<&mut AssetMapping> {
        self.mappings.get_mut(hash_key)
    }

    /// Index newly discovered URLs.
    ///
    /// URLs whose hash key is already present are left untouched, so a
    /// re-scan never resets lifecycle state.
    ///
    /// # Arguments
    /// * `urls` - Discovered URLs
    /// * `hash_length` - Hex characters kept from the digest
    ///
    /// # Returns
    /// Number of records created.
    pub fn register_urls<'u, I>(&mut self, urls: I, hash_length: usize) -> usize
    where
        I: IntoIterator<Item = &'u String>,
    {
        let now: DateTime<Utc> = Utc::now();
        let mut added: usize = 0;

        for url in urls {
            let asset: AssetMapping = AssetMapping::discovered(url, hash_length, now);
            if let Some(existing) = self.mappings.get(&asset.hash_key) {
                if existing.original_url != *url {
                    log::warn!(
                        "Hash key {} already maps {}; skipping {}",
                        asset.hash_key,
                        existing.original_url,
                        url
                    );
                }
                continue;
            }
            self.mappings.insert(asset.hash_key.clone(), asset);
            added += 1;
        }

        added
    }

    /// Public URL an uploaded source URL now lives at.
    ///
    /// # Arguments
    /// * `url` - Source URL as found in a document
    /// * `hash_length` - Hex characters kept from the digest
    ///
    /// # Returns
    /// `None` unless the URL is indexed and claimed uploaded.
    pub fn public_url_for(&self, url: &str, hash_length: usize) -> Option<&str> {
        self.mappings
            .get(&hash_url(url, hash_length))
            .filter(|asset| asset.original_url == url && asset.is_claimed_uploaded())
            .and_then(|asset| asset.public_url.as_deref())
    }

    /// All records, ordered by hash key.
    pub fn entries(&self) -> impl Iterator<Item = &AssetMapping> {
        self.mappings.values()
    }

    /// Hash keys of records that have not been downloaded yet.
    pub fn pending_download(&self) -> Vec<String> {
        self.keys_in_state(LifecycleState::Discovered)
    }

    /// Hash keys of records downloaded but not uploaded.
    pub fn pending_upload(&self) -> Vec<String> {
        self.keys_in_state(LifecycleState::Downloaded)
    }

    /// Hash keys of records claiming to be in the store.
    pub fn claimed_uploaded(&self) -> Vec<String> {
        self.mappings
            .iter()
            .filter(|(_, asset)| asset.is_claimed_uploaded())
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn keys_in_state(&self, state: LifecycleState) -> Vec<String> {
        self.mappings
            .iter()
            .filter(|(_, asset)| asset.state() == state)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Lifecycle counts across the database.
    pub fn progress(&self) -> ProgressSummary {
        let mut summary: ProgressSummary = ProgressSummary {
            total: self.mappings.len() as u64,
            ..Default::default()
        };
        for asset in self.mappings.values() {
            match asset.state() {
                LifecycleState::Discovered => summary.discovered += 1,
                LifecycleState::Downloaded => summary.downloaded += 1,
                LifecycleState::Uploaded => summary.uploaded += 1,
            }
        }
        summary
    }

    /// Compute aggregate statistics from the current records.
    pub fn compute_stats(&self) -> MappingStats {
        let mut stats: MappingStats = MappingStats {
            total_assets: self.mappings.len() as u64,
            ..Default::default()
        };
        for asset in self.mappings.values() {
            stats.total_size_bytes += asset.size_bytes;
            *stats.by_category.entry(asset.category).or_insert(0) += 1;
        }
        stats
    }

    /// Recompute `stats` in place.
    pub fn refresh_stats(&mut self) {
        self.stats = self.compute_stats();
    }

    /// Serialize the document as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns `MappingError::Serialization` if encoding fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, MappingError> {
        serde_json::to_vec_pretty(self).map_err(|e| MappingError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_register_urls_is_idempotent() {
        let mut db: MappingDatabase = MappingDatabase::new();
        let found: Vec<String> = urls(&[
            "https://static.wikia.nocookie.net/a/Icon.png",
            "https://static.wikia.nocookie.net/b/Talent.png",
        ]);

        assert_eq!(db.register_urls(&found, 16), 2);
        let key: String = db.pending_download()[0].clone();
        db.get_mut(&key)
            .unwrap()
            .mark_downloaded(10, "png", Utc::now());

        assert_eq!(db.register_urls(&found, 16), 0);
        assert_eq!(db.len(), 2);
        assert_eq!(db.get(&key).unwrap().state(), LifecycleState::Downloaded);
    }

    #[test]
    fn test_public_url_only_for_uploaded_entries() {
        let mut db: MappingDatabase = MappingDatabase::new();
        let found: Vec<String> = urls(&["https://x.net/1.png", "https://x.net/2.png"]);
        db.register_urls(&found, 16);
        let now: DateTime<Utc> = Utc::now();

        let asset: &mut AssetMapping = db.get_mut(&hash_url(&found[0], 16)).unwrap();
        asset.mark_downloaded(1, "png", now);
        let object_key: String = asset.storage_key();
        asset
            .mark_uploaded(object_key, "https://cdn/one.png".into(), now)
            .unwrap();

        assert_eq!(db.public_url_for(&found[0], 16), Some("https://cdn/one.png"));
        assert_eq!(db.public_url_for(&found[1], 16), None);
        assert_eq!(db.public_url_for("https://x.net/unknown.png", 16), None);
    }

    #[test]
    fn test_state_queries_and_progress() {
        let mut db: MappingDatabase = MappingDatabase::new();
        db.register_urls(
            &urls(&[
                "https://x.net/1.png",
                "https://x.net/2.png",
                "https://x.net/3.png",
            ]),
            16,
        );
        let keys: Vec<String> = db.pending_download();
        let now: DateTime<Utc> = Utc::now();

        db.get_mut(&keys[0]).unwrap().mark_downloaded(1, "png", now);
        let asset: &mut AssetMapping = db.get_mut(&keys[1]).unwrap();
        asset.mark_downloaded(2, "png", now);
        let object_key: String = asset.storage_key();
        asset
            .mark_uploaded(object_key, "https://cdn/x".into(), now)
            .unwrap();

        assert_eq!(db.pending_download(), vec![keys[2].clone()]);
        assert_eq!(db.pending_upload(), vec![keys[0].clone()]);
        assert_eq!(db.claimed_uploaded(), vec![keys[1].clone()]);

        let progress: ProgressSummary = db.progress();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.discovered, 1);
        assert_eq!(progress.downloaded, 1);
        assert_eq!(progress.uploaded, 1);
        assert!((progress.uploaded_percent() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_stats() {
        let mut db: MappingDatabase = MappingDatabase::new();
        db.register_urls(
            &urls(&[
                "https://x.net/Amber_Icon.png",
                "https://x.net/Lisa_Icon.png",
                "https://x.net/Clip.mp4",
            ]),
            16,
        );
        for key in db.pending_download() {
            db.get_mut(&key).unwrap().size_bytes = 100;
        }

        let stats: MappingStats = db.compute_stats();
        assert_eq!(stats.total_assets, 3);
        assert_eq!(stats.total_size_bytes, 300);
        assert_eq!(stats.by_category.get(&AssetCategory::Icons), Some(&2));
        assert_eq!(stats.by_category.get(&AssetCategory::Videos), Some(&1));
        assert_eq!(stats.by_category.get(&AssetCategory::Misc), None);
    }

    #[test]
    fn test_empty_progress_percentages() {
        let db: MappingDatabase = MappingDatabase::new();
        assert_eq!(db.progress().uploaded_percent(), 0.0);
        assert!(db.is_empty());
    }
}
