//! Cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

/// Hex digest of `data`, used to address cache entries.
pub fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Opaque, deterministic identifier of a cacheable request.
///
/// Lowercase hex, which keeps it valid as a disk-cache file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `"<METHOD> <URL>[ <user>:<password>]"`.
    pub fn derive(method: &str, url: &str, credentials: Option<(&str, &str)>) -> Self {
        let mut identity = format!("{} {}", method, url);
        if let Some((username, password)) = credentials {
            identity.push(' ');
            identity.push_str(username);
            identity.push(':');
            identity.push_str(password);
        }
        Self(digest(identity.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable() {
        let first = CacheKey::derive("GET", "http://h/a", None);
        let second = CacheKey::derive("GET", "http://h/a", None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_key_differs_by_url_and_method() {
        let base = CacheKey::derive("GET", "http://h/a", None);
        assert_ne!(base, CacheKey::derive("GET", "http://h/b", None));
        assert_ne!(base, CacheKey::derive("POST", "http://h/a", None));
    }

    #[test]
    fn test_key_includes_credentials() {
        let anonymous = CacheKey::derive("GET", "http://h/a", None);
        let alice = CacheKey::derive("GET", "http://h/a", Some(("alice", "secret")));
        let bob = CacheKey::derive("GET", "http://h/a", Some(("bob", "secret")));
        assert_ne!(anonymous, alice);
        assert_ne!(alice, bob);
    }

    #[test]
    fn test_key_matches_digest_of_identity() {
        let key = CacheKey::derive("GET", "http://localhost", Some(("u", "p")));
        assert_eq!(key.as_str(), digest(b"GET http://localhost u:p"));
    }

    #[test]
    fn test_digest_format() {
        let hash = digest(b"hello");
        assert_eq!(hash.len(), 64);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
