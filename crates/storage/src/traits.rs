//! Storage traits/interfaces for object store operations.

use async_trait::async_trait;

use crate::error::StorageError;

/// Page size used when following continuation tokens.
const LIST_PAGE_SIZE: usize = 1000;

/// Information about an object from list/head operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub last_modified: Option<i64>,
    /// ETag as reported by the store.
    pub etag: Option<String>,
}

/// One page of a list operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects on this page.
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page; `None` when this is the last page.
    pub next_continuation_token: Option<String>,
}

/// Aggregate object count and size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketStats {
    /// Number of objects.
    pub total_objects: u64,
    /// Sum of object sizes in bytes.
    pub total_size_bytes: u64,
}

/// Operations against a single bucket - implemented by each backend.
///
/// Implementations must not cache results: every call reflects the remote
/// state at the time of the call.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Name of the bucket this client operates on.
    fn bucket(&self) -> &str;

    /// Externally reachable URL for an object key.
    fn public_url(&self, key: &str) -> String;

    /// Upload bytes.
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Fetch object metadata.
    ///
    /// Returns `Ok(None)` only when the store confirms the object does not
    /// exist. Any other failure is returned as an error.
    async fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError>;

    /// Download object to bytes.
    ///
    /// Returns `StorageError::NotFound` when the object does not exist.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// List a single page of objects under a prefix.
    ///
    /// # Arguments
    /// * `prefix` - Key prefix (empty for the whole bucket)
    /// * `max_keys` - Maximum objects on this page
    /// * `continuation_token` - Token from the previous page
    async fn list_objects_page(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StorageError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// Check whether an object exists.
    ///
    /// Only a confirmed not-found maps to `false`; network and permission
    /// failures are propagated so callers never mistake them for absence.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.head_object(key).await?.is_some())
    }

    /// List up to `max_keys` object keys under a prefix (first page only).
    async fn list_objects(&self, prefix: &str, max_keys: usize) -> Result<Vec<String>, StorageError> {
        let page: ListPage = self.list_objects_page(prefix, max_keys, None).await?;
        Ok(page.objects.into_iter().map(|o| o.key).collect())
    }

    /// List every object under a prefix, following continuation tokens.
    async fn list_all_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects: Vec<ObjectInfo> = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page: ListPage = self
                .list_objects_page(prefix, LIST_PAGE_SIZE, token.as_deref())
                .await?;
            objects.extend(page.objects);

            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(objects)
    }

    /// Exact object count and total size under a prefix.
    async fn prefix_stats(&self, prefix: &str) -> Result<BucketStats, StorageError> {
        let mut stats: BucketStats = BucketStats::default();
        let mut token: Option<String> = None;

        loop {
            let page: ListPage = self
                .list_objects_page(prefix, LIST_PAGE_SIZE, token.as_deref())
                .await?;
            stats.total_objects += page.objects.len() as u64;
            stats.total_size_bytes += page.objects.iter().map(|o| o.size).sum::<u64>();

            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(stats)
    }

    /// Exact object count and total size for the whole bucket.
    async fn bucket_stats(&self) -> Result<BucketStats, StorageError> {
        self.prefix_stats("").await
    }
}
