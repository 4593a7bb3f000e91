//! Freshness evaluation.
//!
//! Turns response headers into the canonical [`CacheHeaders`] kept with a
//! cache entry, decides how long an entry stays fresh, and builds the
//! conditional headers used to revalidate it.

use chrono::{DateTime, Duration, Utc};
use http::header::{
    HeaderMap, HeaderValue, CACHE_CONTROL, ETAG, EXPIRES, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED,
};

use crate::http::date::{ceil_to_seconds, format_http_date, parse_http_date, truncate_to_seconds};

/// Stored header names, as written to the metadata slot.
pub const ETAG_NAME: &str = "ETag";
pub const LAST_MODIFIED_NAME: &str = "Last-Modified";
pub const EXPIRES_NAME: &str = "Expires";

// == Cache Headers ==
/// Validators and expiry kept alongside a cached body.
///
/// `expires` is always an absolute HTTP date, even when it was derived from
/// a relative `max-age`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub expires: Option<String>,
}

impl CacheHeaders {
    // == From Response ==
    /// Derives cache headers from a response received at `now`.
    ///
    /// `ETag` and `Last-Modified` are copied verbatim. `Expires` comes from
    /// `Cache-Control` when it carries `max-age` or `no-cache` (the last such
    /// directive wins), otherwise from a literal `Expires` header.
    pub fn from_response(headers: &HeaderMap, now: DateTime<Utc>) -> Self {
        let expires = headers
            .get(CACHE_CONTROL)
            .and_then(header_str)
            .and_then(|value| expiry_from_cache_control(value, now))
            .map(format_http_date)
            .or_else(|| headers.get(EXPIRES).and_then(header_str).map(str::to_string));

        Self {
            etag: headers.get(ETAG).and_then(header_str).map(str::to_string),
            last_modified: headers
                .get(LAST_MODIFIED)
                .and_then(header_str)
                .map(str::to_string),
            expires,
        }
    }

    // == Name/Value Pairs ==
    /// Present headers as `(name, value)` pairs, in a fixed order.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            (ETAG_NAME, self.etag.as_deref()),
            (LAST_MODIFIED_NAME, self.last_modified.as_deref()),
            (EXPIRES_NAME, self.expires.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)))
        .collect()
    }

    /// Sets a header by its stored name. Unknown names are ignored and
    /// reported with `false`.
    pub fn set(&mut self, name: &str, value: String) -> bool {
        let slot = if name.eq_ignore_ascii_case(ETAG_NAME) {
            &mut self.etag
        } else if name.eq_ignore_ascii_case(LAST_MODIFIED_NAME) {
            &mut self.last_modified
        } else if name.eq_ignore_ascii_case(EXPIRES_NAME) {
            &mut self.expires
        } else {
            return false;
        };
        *slot = Some(value);
        true
    }

    pub fn len(&self) -> usize {
        self.pairs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none() && self.expires.is_none()
    }

    // == Freshness ==
    /// Remaining lifetime at `now`: `Expires - now`, at one-second
    /// resolution. Missing or unparseable `Expires` yields zero.
    pub fn freshness_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires
            .as_deref()
            .and_then(parse_http_date)
            .map(|expires| expires - truncate_to_seconds(now))
            .unwrap_or_else(Duration::zero)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.freshness_remaining(now) > Duration::zero()
    }

    // == Conditional Headers ==
    /// Adds `If-Modified-Since` / `If-None-Match` for the stored validators.
    pub fn apply_conditional(&self, request: &mut HeaderMap) {
        if let Some(value) = self.last_modified.as_deref().and_then(to_header_value) {
            request.insert(IF_MODIFIED_SINCE, value);
        }
        if let Some(value) = self.etag.as_deref().and_then(to_header_value) {
            request.insert(IF_NONE_MATCH, value);
        }
    }
}

/// Scans every directive; later matches override earlier ones.
fn expiry_from_cache_control(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut expires = None;
    for directive in value.split(',') {
        let directive = directive.trim().to_ascii_lowercase();
        if directive.contains("max-age") {
            if let Some(expiry) = parse_max_age(&directive)
                .and_then(|seconds| Duration::try_seconds(seconds.max(0)))
                .and_then(|lifetime| now.checked_add_signed(lifetime))
                // HTTP dates carry whole seconds; never shorten the lifetime
                .map(|expiry| if expiry > now { ceil_to_seconds(expiry) } else { expiry })
            {
                expires = Some(expiry);
            }
        }
        if directive.contains("no-cache") {
            expires = Some(now);
        }
    }
    expires
}

fn parse_max_age(directive: &str) -> Option<i64> {
    let (_, seconds) = directive.split_once('=')?;
    seconds.trim().trim_matches('"').parse().ok()
}

fn header_str(value: &HeaderValue) -> Option<&str> {
    value.to_str().ok()
}

fn to_header_value(value: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(value).ok()
}
