//! Cache Module
//!
//! The two storage tiers behind the engine: a size-bounded in-memory LRU and
//! a journaled LRU store on disk, plus the entry type and codec they share.

pub mod codec;
mod disk;
mod entry;
mod lru;
mod stats;


// Re-export public types
pub use disk::{
    DiskCacheOptions, DiskLruCache, DiskStats, Editor, JournalRecord, Snapshot,
    DEFAULT_COMPACTION_THRESHOLD, MAX_KEY_LENGTH, VALUE_COUNT,
};
pub use entry::CacheEntry;
pub use lru::{LruCache, LruTracker, Sizer};
pub use stats::CacheStats;
