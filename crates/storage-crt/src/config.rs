//! Credentials and endpoint configuration for Cloudflare R2.

use std::fmt;

use assetsync_storage::StorageError;
use thiserror::Error;
use url::Url;

/// Environment variable holding the Cloudflare account id.
pub const ENV_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
/// Environment variable holding the access key id.
pub const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
/// Environment variable holding the secret access key.
pub const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
/// Environment variable holding the bucket name.
pub const ENV_BUCKET_NAME: &str = "R2_BUCKET_NAME";
/// Environment variable holding the public base URL of the bucket.
pub const ENV_PUBLIC_URL: &str = "R2_PUBLIC_URL";

/// Errors raised while validating store configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// One or more required variables are unset or empty.
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    /// The public URL is not an absolute http(s) URL.
    #[error("Invalid public URL {value:?}: {message}")]
    InvalidPublicUrl { value: String, message: String },
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::InvalidConfig {
            message: err.to_string(),
        }
    }
}

/// Validated connection settings for an R2 bucket.
#[derive(Clone, PartialEq, Eq)]
pub struct R2Config {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// Public base URL without a trailing slash.
    pub public_url: String,
}

impl fmt::Debug for R2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("R2Config")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .field("public_url", &self.public_url)
            .finish()
    }
}

impl R2Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    /// See [`R2Config::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name: &str| std::env::var(name).ok())
    }

    /// Load configuration through a variable lookup function.
    ///
    /// Every missing variable is collected before failing, so the error
    /// lists all of them at once.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of a variable, if set
    ///
    /// # Errors
    /// - `ConfigError::MissingVariables` if any variable is unset or blank
    /// - `ConfigError::InvalidPublicUrl` if `R2_PUBLIC_URL` is not an http(s) URL
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing: Vec<String> = Vec::new();
        let mut require = |name: &str| -> String {
            match lookup(name).map(|v| v.trim().to_string()) {
                Some(value) if !value.is_empty() => value,
                _ => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        };

        let account_id: String = require(ENV_ACCOUNT_ID);
        let access_key_id: String = require(ENV_ACCESS_KEY_ID);
        let secret_access_key: String = require(ENV_SECRET_ACCESS_KEY);
        let bucket_name: String = require(ENV_BUCKET_NAME);
        let public_url: String = require(ENV_PUBLIC_URL);

        if !missing.is_empty() {
            return Err(ConfigError::MissingVariables(missing));
        }

        Ok(Self {
            account_id,
            access_key_id,
            secret_access_key,
            bucket_name,
            public_url: validate_public_url(&public_url)?,
        })
    }

    /// S3-compatible endpoint for the account.
    pub fn endpoint(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }

    /// Host of the public URL, used to recognise migrated links.
    pub fn public_host(&self) -> Option<String> {
        Url::parse(&self.public_url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
    }
}

fn validate_public_url(value: &str) -> Result<String, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidPublicUrl {
        value: value.to_string(),
        message,
    };

    let parsed: Url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }

    Ok(value.trim_end_matches('/').to_string())
}
