//! Configuration Module
//!
//! Handles loading and managing engine configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::DEFAULT_COMPACTION_THRESHOLD;

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Serve from and populate the caches at all
    pub use_cache: bool,
    /// Memory tier budget in bytes
    pub memory_cache_size: usize,
    /// Disk tier budget in bytes; 0 disables the disk tier
    pub disk_cache_size: u64,
    /// Directory holding the disk tier
    pub cache_dir: PathBuf,
    /// Worker tasks serving enqueued operations
    pub workers: usize,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Default `User-Agent` stamped on created operations
    pub user_agent: String,
    /// Stored in the disk journal header; changing it discards the disk tier
    pub app_version: u32,
    /// Redundant journal records tolerated before compaction
    pub journal_compaction_threshold: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `NETCACHE_USE_CACHE` - Enable caching (default: true)
    /// - `NETCACHE_MEMORY_CACHE_SIZE` - Memory budget in bytes (default: 2 MiB)
    /// - `NETCACHE_DISK_CACHE_SIZE` - Disk budget in bytes (default: 10 MiB)
    /// - `NETCACHE_CACHE_DIR` - Disk cache directory (default: `<tmp>/netcache`)
    /// - `NETCACHE_WORKERS` - Worker pool size, at least 1 (default: 2)
    /// - `NETCACHE_CONNECT_TIMEOUT_MS` - Connect timeout (default: 5000)
    /// - `NETCACHE_REQUEST_TIMEOUT_MS` - Whole-request timeout (default: 5000)
    /// - `NETCACHE_USER_AGENT` - User agent (default: `netcache/<version>`)
    /// - `NETCACHE_JOURNAL_COMPACTION_THRESHOLD` - (default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            use_cache: env_or("NETCACHE_USE_CACHE", defaults.use_cache),
            memory_cache_size: env_or("NETCACHE_MEMORY_CACHE_SIZE", defaults.memory_cache_size),
            disk_cache_size: env_or("NETCACHE_DISK_CACHE_SIZE", defaults.disk_cache_size),
            cache_dir: env::var_os("NETCACHE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            workers: env_or("NETCACHE_WORKERS", defaults.workers).max(1),
            connect_timeout_ms: env_or("NETCACHE_CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
            request_timeout_ms: env_or("NETCACHE_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            user_agent: env::var("NETCACHE_USER_AGENT").unwrap_or(defaults.user_agent),
            app_version: defaults.app_version,
            journal_compaction_threshold: env_or(
                "NETCACHE_JOURNAL_COMPACTION_THRESHOLD",
                defaults.journal_compaction_threshold,
            ),
        }
    }

    /// Default configuration with the disk tier rooted at `cache_dir`.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_cache: true,
            memory_cache_size: 2 * 1024 * 1024,
            disk_cache_size: 10 * 1024 * 1024,
            cache_dir: env::temp_dir().join("netcache"),
            workers: 2,
            connect_timeout_ms: 5000,
            request_timeout_ms: 5000,
            user_agent: format!("netcache/{}", env!("CARGO_PKG_VERSION")),
            app_version: 1,
            journal_compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
