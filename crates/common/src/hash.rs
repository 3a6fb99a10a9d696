//! URL hashing for content-addressed keys.

use sha2::{Digest, Sha256};

/// Length of a full SHA-256 digest in hex characters.
const FULL_DIGEST_HEX_LEN: usize = 64;

/// Compute the content-addressed key for an asset URL.
///
/// The key is the SHA-256 digest of the URL's UTF-8 bytes, hex encoded and
/// truncated to `length` characters. No collision detection is performed.
///
/// # Arguments
/// * `url` - The original asset URL
/// * `length` - Number of hex characters to keep (clamped to 1..=64)
///
/// # Returns
/// Lowercase hex string of `length` characters.
pub fn hash_url(url: &str, length: usize) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut key: String = hex::encode(digest);
    key.truncate(length.clamp(1, FULL_DIGEST_HEX_LEN));
    key
}
