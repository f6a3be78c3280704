// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Display, Write};

use http::{Method, Uri};
use sha1::{Digest, Sha1};

/// A stable, content-addressed cache key.
///
/// The key is the lowercase hex SHA-1 digest of `"{METHOD} {URI}"`. Headers and bodies
/// do not participate, so only idempotent requests should share a key. The same
/// request produces the same key in every process, which keeps persisted entries
/// addressable across restarts.
///
/// # Examples
///
/// ```
/// use errand::CacheKey;
/// use http::{Method, Uri};
///
/// let key = CacheKey::for_request(&Method::GET, &Uri::from_static("https://example.com/users/7"));
/// assert_eq!(key.as_str().len(), 40);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key identifying a request.
    #[must_use]
    pub fn for_request(method: &Method, uri: &Uri) -> Self {
        let digest = Sha1::new()
            .chain_update(method.as_str())
            .chain_update(b" ")
            .chain_update(uri.to_string())
            .finalize();

        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            // writing into a String cannot fail
            let _ = write!(hex, "{byte:02x}");
        }

        Self(hex)
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps a hex digest previously obtained from [`as_str`][Self::as_str].
    ///
    /// Returns `None` unless `value` is 40 lowercase hex characters.
    #[must_use]
    pub fn from_hex(value: &str) -> Option<Self> {
        let valid = value.len() == 40 && value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_owned()))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_digest() {
        let key = CacheKey::for_request(&Method::GET, &Uri::from_static("https://example.com/"));

        // sha1("GET https://example.com/")
        assert_eq!(key.as_str(), "23f2ff449b2e5a09a08bad5819bd22455cc5dabc");
    }

    #[test]
    fn stable_and_distinct() {
        let uri = Uri::from_static("https://example.com/feed?page=2");

        let first = CacheKey::for_request(&Method::GET, &uri);
        let second = CacheKey::for_request(&Method::GET, &uri);
        let other_method = CacheKey::for_request(&Method::POST, &uri);
        let other_uri = CacheKey::for_request(&Method::GET, &Uri::from_static("https://example.com/feed?page=3"));

        assert_eq!(first, second);
        assert_ne!(first, other_method);
        assert_ne!(first, other_uri);
    }

    #[test]
    fn lowercase_hex_of_fixed_length() {
        let key = CacheKey::for_request(&Method::GET, &Uri::from_static("/relative"));

        assert_eq!(key.as_str().len(), 40);
        assert_eq!(CacheKey::from_hex(key.as_str()), Some(key.clone()));
        assert_eq!(key.to_string(), key.as_str());
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(CacheKey::from_hex("not-a-key").is_none());
        assert!(CacheKey::from_hex(&"A".repeat(40)).is_none());
        assert!(CacheKey::from_hex(&"0".repeat(41)).is_none());
    }
}
