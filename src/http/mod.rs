//! HTTP Caching Semantics Module
//!
//! Cache-key derivation, HTTP dates, and freshness evaluation.

pub mod date;
mod freshness;
mod key;

pub use freshness::{CacheHeaders, ETAG_NAME, EXPIRES_NAME, LAST_MODIFIED_NAME};
pub use key::{digest, CacheKey};
