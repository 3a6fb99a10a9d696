//! In-process `StorageClient` backed by a sorted map.
//!
//! Used by tests. Errors can be injected per key so callers can
//! exercise the "store check failed" paths without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::traits::{ListPage, ObjectInfo, StorageClient};

/// An object held in memory.
#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: Option<String>,
}

/// In-memory storage client for a single bucket.
pub struct MemoryStorageClient {
    bucket: String,
    public_base_url: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    /// Errors returned for any operation on a key.
    failures: Mutex<HashMap<String, StorageError>>,
    head_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

impl MemoryStorageClient {
    /// Create an empty in-memory bucket.
    ///
    /// # Arguments
    /// * `bucket` - Bucket name
    /// * `public_base_url` - Base used to build public URLs
    pub fn new(bucket: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            head_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
        }
    }

    /// Insert an object directly, bypassing call counters.
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.lock_objects().insert(
            key.into(),
            StoredObject {
                data,
                content_type: None,
            },
        );
    }

    /// Remove an object directly, simulating out-of-band deletion.
    pub fn remove(&self, key: &str) -> bool {
        self.lock_objects().remove(key).is_some()
    }

    /// Whether an object is present.
    pub fn contains(&self, key: &str) -> bool {
        self.lock_objects().contains_key(key)
    }

    /// Bytes stored under a key.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.lock_objects().get(key).map(|o| o.data.clone())
    }

    /// Content type recorded for a key.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock_objects()
            .get(key)
            .and_then(|o| o.content_type.clone())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.lock_objects().len()
    }

    /// Whether the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every operation on `key` fail with `error`.
    pub fn fail_key(&self, key: impl Into<String>, error: StorageError) {
        self.lock_failures().insert(key.into(), error);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.lock_failures().clear();
    }

    /// Number of `head_object` calls made so far.
    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    /// Number of `put_object` calls made so far.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    fn lock_objects(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failures(&self) -> MutexGuard<'_, HashMap<String, StorageError>> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn injected_failure(&self, key: &str) -> Result<(), StorageError> {
        match self.lock_failures().get(key) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageClient for MemoryStorageClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_failure(key)?;
        self.lock_objects().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_failure(key)?;
        Ok(self.lock_objects().get(key).map(|o| ObjectInfo {
            key: key.to_string(),
            size: o.data.len() as u64,
            last_modified: None,
            etag: None,
        }))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.injected_failure(key)?;
        self.object(key).ok_or_else(|| StorageError::NotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }

    async fn list_objects_page(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let objects = self.lock_objects();
        let page_size: usize = max_keys.max(1);

        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation_token.map_or(true, |token| key.as_str() > token));

        let page: Vec<ObjectInfo> = matching
            .by_ref()
            .take(page_size)
            .map(|(key, o)| ObjectInfo {
                key: key.clone(),
                size: o.data.len() as u64,
                last_modified: None,
                etag: None,
            })
            .collect();

        let next_continuation_token: Option<String> = if matching.next().is_some() {
            page.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects: page,
            next_continuation_token,
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.injected_failure(key)?;
        self.lock_objects().remove(key);
        Ok(())
    }
}
