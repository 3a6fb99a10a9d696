//! Fetching source assets over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use crate::error::StorageError;
use crate::retry::retry_with_backoff;
use crate::types::RetrySettings;

/// Default per-request timeout for source fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Bytes of one fetched asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    /// `Content-Type` reported by the source, if any.
    pub content_type: Option<String>,
}

/// Source of asset bytes.
///
/// Implementations classify failures with `StorageError` so the retry
/// policy can tell transient failures from permanent ones.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch the asset at `url`.
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, StorageError>;

    /// Whether `url` answers with a success status.
    ///
    /// A permanent HTTP status such as 404 is `Ok(false)`; transient
    /// failures are errors so callers can retry them. The default fetches
    /// the body; `HttpFetcher` issues a `HEAD` instead.
    async fn is_reachable(&self, url: &str) -> Result<bool, StorageError> {
        match self.fetch(url).await {
            Ok(_) => Ok(true),
            Err(StorageError::HttpStatus { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Outcome of checking a set of URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlCheckReport {
    /// URLs that answered with a success status.
    pub reachable: u64,
    /// URLs that did not, with the reason.
    pub unreachable: Vec<(String, String)>,
}

impl UrlCheckReport {
    /// Number of URLs checked.
    pub fn checked(&self) -> u64 {
        self.reachable + self.unreachable.len() as u64
    }
}

/// Check that each URL answers, `batch_size` at a time.
///
/// # Arguments
/// * `fetcher` - Client used for the checks
/// * `urls` - URLs to check
/// * `retry` - Retry policy for transient failures
/// * `batch_size` - Concurrent checks per batch
pub async fn check_urls<F: AssetFetcher + ?Sized>(
    fetcher: &F,
    urls: &[String],
    retry: &RetrySettings,
    batch_size: usize,
) -> UrlCheckReport {
    let mut report: UrlCheckReport = UrlCheckReport::default();

    for batch in urls.chunks(batch_size.max(1)) {
        let outcomes: Vec<Result<bool, StorageError>> = join_all(batch.iter().map(|url| {
            let url: &str = url;
            retry_with_backoff(retry, url, move || fetcher.is_reachable(url))
        }))
        .await;

        for (url, outcome) in batch.iter().zip(outcomes) {
            match outcome {
                Ok(true) => report.reachable += 1,
                Ok(false) => report
                    .unreachable
                    .push((url.clone(), "non-success status".to_string())),
                Err(e) => report.unreachable.push((url.clone(), e.to_string())),
            }
        }
    }

    report
}

/// `AssetFetcher` backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidConfig` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, StorageError> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a fetcher with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, StorageError> {
        let client: reqwest::Client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("assetsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::InvalidConfig {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, StorageError> {
        let response: reqwest::Response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;

        let status: StatusCode = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        let content_type: Option<String> = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes: Vec<u8> = response
            .bytes()
            .await
            .map_err(transport_error)?
            .to_vec();

        log::debug!("Fetched {} ({} bytes)", url, bytes.len());
        Ok(FetchedAsset {
            bytes,
            content_type,
        })
    }

    async fn is_reachable(&self, url: &str) -> Result<bool, StorageError> {
        let response: reqwest::Response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(transport_error)?;

        let status: StatusCode = response.status();
        if status.is_success() {
            return Ok(true);
        }
        match classify_status(url, status) {
            StorageError::HttpStatus { .. } => Ok(false),
            transient => Err(transient),
        }
    }
}

/// Map a non-success HTTP status to a storage error.
fn classify_status(url: &str, status: StatusCode) -> StorageError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        StorageError::RateLimited {
            message: format!("{} returned {}", url, status),
        }
    } else if status.is_server_error() {
        StorageError::NetworkError {
            message: format!("{} returned {}", url, status),
            retryable: true,
        }
    } else {
        StorageError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
    }
}

/// Transport failures (connect, timeout, truncated body) are always retryable.
fn transport_error(err: reqwest::Error) -> StorageError {
    StorageError::NetworkError {
        message: err.to_string(),
        retryable: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};

    const URL: &str = "https://static.wikia.nocookie.net/a.png";

    #[test]
    fn test_rate_limit_status() {
        let err: StorageError = classify_status(URL, StatusCode::TOO_MANY_REQUESTS);
        assert!(err.is_rate_limited());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY] {
            assert_eq!(classify_status(URL, status).kind(), ErrorKind::Transient);
        }
    }

    #[test]
    fn test_client_errors_are_permanent() {
        let err: StorageError = classify_status(URL, StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert_eq!(
            err,
            StorageError::HttpStatus {
                url: URL.to_string(),
                status: 404
            }
        );
    }

    /// Answers 404 for URLs containing "gone" and fails once for "flaky".
    struct StubFetcher {
        flaky_failed: AtomicBool,
    }

    #[async_trait]
    impl AssetFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedAsset, StorageError> {
            if url.contains("gone") {
                return Err(classify_status(url, StatusCode::NOT_FOUND));
            }
            if url.contains("flaky") && !self.flaky_failed.swap(true, Ordering::SeqCst) {
                return Err(classify_status(url, StatusCode::SERVICE_UNAVAILABLE));
            }
            Ok(FetchedAsset {
                bytes: Vec::new(),
                content_type: None,
            })
        }
    }

    #[tokio::test]
    async fn test_check_urls() {
        let fetcher = StubFetcher {
            flaky_failed: AtomicBool::new(false),
        };
        let urls: Vec<String> = vec![
            "https://cdn.test/icons/a.png".to_string(),
            "https://cdn.test/icons/gone.png".to_string(),
            "https://cdn.test/icons/flaky.png".to_string(),
        ];

        let report: UrlCheckReport =
            check_urls(&fetcher, &urls, &RetrySettings::immediate(1), 2).await;

        assert_eq!(report.checked(), 3);
        assert_eq!(report.reachable, 2);
        assert_eq!(report.unreachable.len(), 1);
        assert_eq!(report.unreachable[0].0, "https://cdn.test/icons/gone.png");
    }

    #[test]
    fn test_fetcher_builds() {
        assert!(HttpFetcher::new().is_ok());
    }
}
