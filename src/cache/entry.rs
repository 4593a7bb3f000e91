//! Cache Entry Module
//!
//! Defines the immutable {headers, body} pair stored by both cache tiers.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

use crate::cache::codec;
use crate::http::CacheHeaders;

// == Cache Entry ==
/// A cached response: validators/expiry plus the raw body.
///
/// Entries are never mutated; a cache update replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    headers: CacheHeaders,
    body: Bytes,
}

impl CacheEntry {
    // == Constructor ==
    pub fn new(headers: CacheHeaders, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    pub fn headers(&self) -> &CacheHeaders {
        &self.headers
    }

    /// Cheap handle to the body bytes.
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    // == Size ==
    /// Serialized byte length: encoded metadata slot plus body slot.
    pub fn size(&self) -> usize {
        codec::encode_metadata(&self.headers).len() + self.body.len()
    }

    // == Freshness ==
    /// Remaining lifetime at `now`, zero or negative once stale.
    pub fn freshness_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.headers.freshness_remaining(now)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.headers.is_fresh(now)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn headers_expiring(expires: &str) -> CacheHeaders {
        CacheHeaders {
            etag: Some("\"v1\"".to_string()),
            last_modified: None,
            expires: Some(expires.to_string()),
        }
    }

    #[test]
    fn test_entry_size_counts_metadata_and_body() {
        let entry = CacheEntry::new(CacheHeaders::default(), &b"hello"[..]);
        // "0\n" + 5 body bytes
        assert_eq!(entry.size(), 7);

        let entry = CacheEntry::new(headers_expiring("x"), Bytes::from_static(b"OK"));
        // "2\nETag\n\"v1\"\nExpires\nx\n" + "OK"
        assert_eq!(entry.size(), 22 + 2);
    }

    #[test]
    fn test_entry_freshness() {
        let entry = CacheEntry::new(
            headers_expiring("Wed, 01 May 2024 12:00:10 GMT"),
            Bytes::from_static(b"body"),
        );
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert!(entry.is_fresh(now));
        assert_eq!(entry.freshness_remaining(now), Duration::seconds(10));
        assert!(!entry.is_fresh(now + Duration::seconds(10)));
    }

    #[test]
    fn test_entry_without_expiry_is_stale() {
        let entry = CacheEntry::new(CacheHeaders::default(), Bytes::new());
        assert!(!entry.is_fresh(Utc::now()));
    }

    #[test]
    fn test_body_shares_bytes() {
        let entry = CacheEntry::new(CacheHeaders::default(), vec![1u8, 2, 3]);
        assert_eq!(entry.body(), Bytes::from_static(&[1, 2, 3]));
        assert_eq!(entry.body().as_ptr(), entry.body().as_ptr());
    }
}
