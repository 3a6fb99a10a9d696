//! Classification of AWS SDK errors into storage errors.

use assetsync_storage::StorageError;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

/// Error codes S3-compatible stores use to ask clients to back off.
const THROTTLING_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "TooManyRequests",
    "RequestLimitExceeded",
];

/// Classify an SDK error for an operation on `bucket/key`.
///
/// # Arguments
/// * `err` - The SDK error
/// * `bucket` - Bucket the operation targeted
/// * `key` - Key or prefix the operation targeted
pub(crate) fn classify_sdk_error<E>(
    err: SdkError<E, HttpResponse>,
    bucket: &str,
    key: &str,
) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status: Option<u16> = err.raw_response().map(|r| r.status().as_u16());
    let code: Option<String> = err.code().map(str::to_string);
    let transport: bool = matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_)
    );
    let message: String = DisplayErrorContext(&err).to_string();

    classify(status, code.as_deref(), transport, message, bucket, key)
}

/// Map the observable parts of a failed request to a storage error.
fn classify(
    status: Option<u16>,
    code: Option<&str>,
    transport: bool,
    message: String,
    bucket: &str,
    key: &str,
) -> StorageError {
    if status == Some(429) || code.is_some_and(|c| THROTTLING_CODES.contains(&c)) {
        return StorageError::RateLimited { message };
    }
    if transport || status.is_some_and(|s| s >= 500) {
        return StorageError::NetworkError {
            message,
            retryable: true,
        };
    }
    if status == Some(404) || matches!(code, Some("NoSuchKey") | Some("NotFound")) {
        return StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
    }
    if status == Some(403) || code == Some("AccessDenied") {
        return StorageError::AccessDenied {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };
    }
    StorageError::NetworkError {
        message,
        retryable: false,
    }
}
