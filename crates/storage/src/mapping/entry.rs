//! Mapping entry types and lifecycle transitions.

use std::fmt;
use std::path::{Path, PathBuf};

use assetsync_common::{hash_url, FALLBACK_EXTENSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::MappingError;
use crate::content_type::is_known_extension;

/// Fixed set of object-store categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetCategory {
    Icons,
    Talents,
    Videos,
    Stickers,
    Misc,
}

impl AssetCategory {
    /// Every category, in key-prefix order.
    pub const ALL: [AssetCategory; 5] = [
        AssetCategory::Icons,
        AssetCategory::Talents,
        AssetCategory::Videos,
        AssetCategory::Stickers,
        AssetCategory::Misc,
    ];

    /// Key prefix used in the object store.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetCategory::Icons => "icons",
            AssetCategory::Talents => "talents",
            AssetCategory::Videos => "videos",
            AssetCategory::Stickers => "stickers",
            AssetCategory::Misc => "misc",
        }
    }

    /// Infer a category from a source URL and its extension.
    ///
    /// Rules are checked in order against the lowercased URL: icon hints,
    /// then talent hints, then video hints, then sticker hints. An asset
    /// whose extension is a video format is a video unless an icon or
    /// talent hint matched first.
    ///
    /// # Arguments
    /// * `url` - Original asset URL
    /// * `extension` - Extension inferred for the asset
    pub fn infer(url: &str, extension: &str) -> Self {
        const ICON_HINTS: [&str; 4] = ["_icon", "element_", "weapon-class", "_emblem"];
        const TALENT_HINTS: [&str; 6] = [
            "talent",
            "normal_attack",
            "elemental_skill",
            "elemental_burst",
            "passive",
            "constellation",
        ];
        const STICKER_HINTS: [&str; 3] = ["emoji", "sticker", "expression"];

        let lower: String = url.to_ascii_lowercase();
        let has_any = |hints: &[&str]| hints.iter().any(|hint| lower.contains(hint));

        if has_any(&ICON_HINTS) {
            AssetCategory::Icons
        } else if has_any(&TALENT_HINTS) {
            AssetCategory::Talents
        } else if lower.ends_with(".mp4")
            || lower.contains("video")
            || matches!(extension, "mp4" | "webm" | "mov")
        {
            AssetCategory::Videos
        } else if has_any(&STICKER_HINTS) {
            AssetCategory::Stickers
        } else {
            AssetCategory::Misc
        }
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state, derived from which timestamps are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Discovered,
    Downloaded,
    Uploaded,
}

/// One record per unique source URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMapping {
    /// The discovered source URL; never changes.
    pub original_url: String,
    /// Truncated digest of `original_url`; primary key.
    pub hash_key: String,
    /// Storage key, present once uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    /// Public URL for `object_key`, present once uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub category: AssetCategory,
    pub extension: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl AssetMapping {
    /// Create a freshly discovered record.
    ///
    /// # Arguments
    /// * `url` - Source URL
    /// * `hash_length` - Hex characters kept from the digest
    /// * `now` - Discovery time
    pub fn discovered(url: &str, hash_length: usize, now: DateTime<Utc>) -> Self {
        let extension: String = infer_extension(url);
        Self {
            original_url: url.to_string(),
            hash_key: hash_url(url, hash_length),
            object_key: None,
            public_url: None,
            category: AssetCategory::infer(url, &extension),
            extension,
            size_bytes: 0,
            discovered_at: Some(now),
            downloaded_at: None,
            uploaded_at: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        match (self.downloaded_at, self.uploaded_at) {
            (_, Some(_)) => LifecycleState::Uploaded,
            (Some(_), None) => LifecycleState::Downloaded,
            (None, None) => LifecycleState::Discovered,
        }
    }

    /// Whether the database claims this asset is in the store.
    pub fn is_claimed_uploaded(&self) -> bool {
        self.uploaded_at.is_some() && self.object_key.is_some()
    }

    /// Deterministic storage key: `<category>/<hash_key>.<extension>`.
    pub fn storage_key(&self) -> String {
        format!("{}/{}.{}", self.category, self.hash_key, self.extension)
    }

    /// Where the downloaded bytes are staged before upload.
    ///
    /// # Arguments
    /// * `staging_dir` - Staging root
    pub fn staging_path(&self, staging_dir: &Path) -> PathBuf {
        staging_dir
            .join(self.category.as_str())
            .join(format!("{}.{}", self.hash_key, self.extension))
    }

    /// Record a completed download.
    ///
    /// A changed extension re-derives the category, since video extensions
    /// decide it.
    ///
    /// # Arguments
    /// * `size_bytes` - Downloaded size
    /// * `extension` - Extension to use from now on
    /// * `at` - Completion time
    pub fn mark_downloaded(&mut self, size_bytes: u64, extension: &str, at: DateTime<Utc>) {
        if self.extension != extension {
            self.extension = extension.to_string();
            self.category = AssetCategory::infer(&self.original_url, extension);
        }
        self.size_bytes = size_bytes;
        self.downloaded_at = Some(at);
    }

    /// Record a confirmed upload.
    ///
    /// # Errors
    /// Returns `InvalidTransition` if the asset was never downloaded.
    pub fn mark_uploaded(
        &mut self,
        object_key: String,
        public_url: String,
        at: DateTime<Utc>,
    ) -> Result<(), MappingError> {
        if self.downloaded_at.is_none() {
            return Err(MappingError::InvalidTransition {
                hash_key: self.hash_key.clone(),
                message: "cannot mark uploaded before it is downloaded".to_string(),
            });
        }
        self.object_key = Some(object_key);
        self.public_url = Some(public_url);
        self.uploaded_at = Some(at);
        Ok(())
    }

    /// Correct the extension of a downloaded asset.
    ///
    /// The category is re-derived and any upload is stripped, since the
    /// object key and content type depend on the extension.
    ///
    /// # Returns
    /// The object key that was stripped, if any.
    pub fn retype(&mut self, extension: &str) -> Option<String> {
        self.extension = extension.to_string();
        self.category = AssetCategory::infer(&self.original_url, extension);
        self.strip_upload()
    }

    /// Repair transition `Uploaded → Downloaded`.
    ///
    /// # Returns
    /// The object key that was stripped, if any.
    pub fn strip_upload(&mut self) -> Option<String> {
        self.uploaded_at = None;
        self.public_url = None;
        self.object_key.take()
    }
}

/// Infer an extension from a URL.
///
/// Hosts such as Fandom append `/revision/latest` after the file name, so
/// path segments are scanned from the end for the first known extension.
fn infer_extension(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return FALLBACK_EXTENSION.to_string();
    };
    let Some(segments) = parsed.path_segments() else {
        return FALLBACK_EXTENSION.to_string();
    };

    segments
        .rev()
        .filter_map(|segment: &str| segment.rsplit_once('.').map(|(_, ext)| ext))
        .map(|ext: &str| ext.to_ascii_lowercase())
        .find(|ext: &String| is_known_extension(ext))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}
