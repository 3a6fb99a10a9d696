//! AWS SDK S3 client for Cloudflare R2.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use assetsync_storage::{ListPage, ObjectInfo, StorageClient, StorageError};

use crate::config::R2Config;
use crate::error::classify_sdk_error;

/// Region name R2 expects from SigV4 clients.
const R2_REGION: &str = "auto";

/// `StorageClient` for one R2 bucket, built on the AWS SDK for Rust.
///
/// The client is constructed once and passed by reference to every stage;
/// there is no shared global connection.
pub struct R2StorageClient {
    s3_client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl R2StorageClient {
    /// Create a client from validated configuration.
    ///
    /// Uses the account endpoint, region `auto`, path-style addressing and
    /// static credentials.
    ///
    /// # Arguments
    /// * `config` - Validated R2 settings
    pub async fn new(config: &R2Config) -> Self {
        let credentials: Credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "assetsync",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(R2_REGION))
            .endpoint_url(config.endpoint())
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        log::debug!(
            "Connecting to bucket {} at {}",
            config.bucket_name,
            config.endpoint()
        );

        Self::from_client(
            S3Client::from_conf(s3_config),
            config.bucket_name.clone(),
            config.public_url.clone(),
        )
    }

    /// Create a client from an existing S3Client (for testing).
    ///
    /// # Arguments
    /// * `s3_client` - Pre-configured S3 client
    /// * `bucket` - Bucket to operate on
    /// * `public_base_url` - Base used to build public URLs
    pub fn from_client(
        s3_client: S3Client,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            s3_client,
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StorageClient for R2StorageClient {
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
        let mut request = self
            .s3_client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .map_err(|err| classify_sdk_error(err, &self.bucket, key))?;

        log::debug!("Put {}/{} ({} bytes)", self.bucket, key, data.len());
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        let result = self
            .s3_client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(ObjectInfo {
                key: key.to_string(),
                size: output.content_length().map(|l| l as u64).unwrap_or(0),
                last_modified: output.last_modified().map(|dt| dt.secs()),
                etag: output.e_tag().map(str::to_string),
            })),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    return Ok(None);
                }
                match classify_sdk_error(err, &self.bucket, key) {
                    StorageError::NotFound { .. } => Ok(None),
                    other => Err(other),
                }
            }
        }
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .s3_client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StorageError::NotFound {
                        bucket: self.bucket.clone(),
                        key: key.to_string(),
                    }
                } else {
                    classify_sdk_error(err, &self.bucket, key)
                }
            })?;

        let data: Vec<u8> = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::NetworkError {
                message: e.to_string(),
                retryable: true,
            })?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn list_objects_page(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let page_size: i32 = max_keys.clamp(1, i32::MAX as usize) as i32;
        let mut request = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(page_size);

        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }
        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| classify_sdk_error(err, &self.bucket, prefix))?;

        let objects: Vec<ObjectInfo> = response
            .contents()
            .iter()
            .map(|obj| ObjectInfo {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().map(|s| s as u64).unwrap_or(0),
                last_modified: obj.last_modified().map(|dt| dt.secs()),
                etag: obj.e_tag().map(str::to_string),
            })
            .collect();

        let next_continuation_token: Option<String> = if response.is_truncated() == Some(true) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_continuation_token,
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.s3_client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify_sdk_error(err, &self.bucket, key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> R2StorageClient {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(R2_REGION))
            .endpoint_url("https://account.r2.cloudflarestorage.com")
            .force_path_style(true)
            .build();
        R2StorageClient::from_client(
            S3Client::from_conf(config),
            "genshin-assets",
            "https://assets.example.com/",
        )
    }

    #[test]
    fn test_r2_client_implements_storage_client() {
        fn assert_storage_client<T: StorageClient>() {}
        assert_storage_client::<R2StorageClient>();
    }

    #[test]
    fn test_public_url_and_bucket() {
        let client: R2StorageClient = offline_client();
        assert_eq!(client.bucket(), "genshin-assets");
        assert_eq!(
            client.public_url("icons/abc.png"),
            "https://assets.example.com/icons/abc.png"
        );
    }

    #[tokio::test]
    async fn test_new_builds_client_from_config() {
        let config: R2Config = R2Config::from_lookup(|name: &str| {
            let value: &str = match name {
                "R2_ACCOUNT_ID" => "account",
                "R2_ACCESS_KEY_ID" => "key-id",
                "R2_SECRET_ACCESS_KEY" => "secret",
                "R2_BUCKET_NAME" => "genshin-assets",
                "R2_PUBLIC_URL" => "https://assets.example.com",
                _ => return None,
            };
            Some(value.to_string())
        })
        .unwrap();

        let client: R2StorageClient = R2StorageClient::new(&config).await;

        assert_eq!(client.bucket(), "genshin-assets");
        assert_eq!(
            client.public_url("talents/abc.png"),
            "https://assets.example.com/talents/abc.png"
        );
    }
}
