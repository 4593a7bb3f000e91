//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::io;

use thiserror::Error;

// == Cache Error Enum ==
/// Errors raised by the disk cache and the entry codec.
///
/// The engine never surfaces these to callers: an affected entry is treated
/// as absent, and I/O failures take the disk tier offline.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key contains characters the disk layout cannot address
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Stored entry could not be decoded
    #[error("Corrupt cache entry: {0}")]
    CorruptEntry(String),

    /// Slot index outside `0..VALUE_COUNT`
    #[error("No value slot {0}")]
    InvalidSlot(usize),

    /// Commit attempted before every value slot was written
    #[error("Edit of {key} did not write slot {slot}")]
    IncompleteEdit { key: String, slot: usize },

    /// Editor no longer owns the entry (removed, evicted or store cleared)
    #[error("Stale editor for key: {0}")]
    StaleEditor(String),

    /// Store has been closed or deleted
    #[error("Cache is closed")]
    Closed,
}

impl CacheError {
    /// Returns true when the failure concerns the store as a whole rather
    /// than a single entry.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, CacheError::Io(_))
    }
}

// == Transport Error Enum ==
/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connect or read deadline elapsed
    #[error("Transport timed out: {0}")]
    Timeout(String),

    /// Network or protocol failure
    #[error("Transport I/O error: {0}")]
    Io(String),

    /// The operation could not be turned into a request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

// == Engine Error Enum ==
/// Errors from the engine's asynchronous dispatch path.
#[derive(Error, Debug)]
pub enum EngineError {
    /// `enqueue_operation` requires a listener on the operation
    #[error("Operation has no listener attached")]
    MissingListener,

    /// The worker dropped the completion channel without replying
    #[error("Worker pool is unavailable")]
    WorkerLost,
}

// == Result Type Alias ==
/// Convenience Result type for cache-layer operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_store_failure() {
        let err = CacheError::from(io::Error::new(io::ErrorKind::Other, "disk gone"));
        assert!(err.is_store_failure());
        assert!(!CacheError::CorruptEntry("x".to_string()).is_store_failure());
        assert!(!CacheError::Closed.is_store_failure());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Timeout("read".to_string());
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Transport timed out: read");
        assert!(!TransportError::Io("reset".to_string()).is_timeout());
    }
}
