//! Engine Module
//!
//! Ties the caches to the transport. For each operation the engine looks up
//! the cache key (memory first, then disk), serves fresh entries without any
//! I/O, revalidates stale ones with conditional headers, and stores every
//! successful cacheable response in both tiers.
//!
//! Cache-layer failures never reach the caller: unreadable entries are
//! dropped and a failing disk tier is switched off.
//!
//! Disk-tier calls block on the filesystem, so they run on Tokio's blocking
//! pool. Memory hits never leave the calling task.

mod handle;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use http::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{codec, CacheEntry, CacheStats, DiskCacheOptions, DiskLruCache, DiskStats, LruCache};
use crate::config::Config;
use crate::error::{self, CacheError, EngineError, TransportError};
use crate::http::{CacheHeaders, CacheKey};
use crate::operation::{HttpMethod, Operation, OperationStatus};
use crate::tasks::spawn_worker_pool;
use crate::transport::{Transport, TransportRequest};

pub use handle::{CancellationToken, OperationHandle};

// == Stats ==
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub use_cache: bool,
    pub memory: CacheStats,
    /// `None` while the disk tier is disabled or unavailable
    pub disk: Option<DiskStats>,
}

// == Job ==
/// One enqueued operation travelling to a worker and back.
pub(crate) struct Job {
    pub(crate) operation: Operation,
    pub(crate) force_reload: bool,
    pub(crate) cancel: CancellationToken,
    pub(crate) reply: oneshot::Sender<Operation>,
}

// == Engine ==
/// Runs operations against a transport through a memory and a disk cache.
///
/// Must be created inside a Tokio runtime: the worker pool is spawned on
/// construction and stops when the engine is dropped or shut down. The disk
/// tier is opened synchronously here, before any operation can run.
pub struct Engine {
    shared: Arc<EngineShared>,
    default_headers: HeaderMap,
    queue: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
}

/// State reachable from both the caller and the workers.
pub(crate) struct EngineShared {
    transport: Arc<dyn Transport>,
    use_cache: AtomicBool,
    memory: LruCache<CacheKey, CacheEntry>,
    disk: RwLock<Option<DiskLruCache>>,
    disk_options: Mutex<DiskCacheOptions>,
    cache_dir: PathBuf,
}

impl Engine {
    // == Constructor ==
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let disk_options = DiskCacheOptions {
            max_size: config.disk_cache_size,
            app_version: config.app_version,
            compaction_threshold: config.journal_compaction_threshold,
        };

        let shared = Arc::new(EngineShared {
            transport,
            use_cache: AtomicBool::new(config.use_cache),
            memory: LruCache::with_sizer(config.memory_cache_size, |_, entry: &CacheEntry| {
                entry.size()
            }),
            disk: RwLock::new(None),
            disk_options: Mutex::new(disk_options),
            cache_dir: config.cache_dir.clone(),
        });
        if let Some((directory, options)) = shared.disk_open_args() {
            shared.install_disk(DiskLruCache::open(directory, options));
        }

        let mut default_headers = HeaderMap::new();
        match HeaderValue::from_str(&config.user_agent) {
            Ok(value) => {
                default_headers.insert(USER_AGENT, value);
            }
            Err(_) => warn!(user_agent = %config.user_agent, "Ignoring invalid user agent"),
        }

        let (queue, receiver) = mpsc::unbounded_channel();
        let workers = spawn_worker_pool(shared.clone(), receiver, config.workers.max(1));

        info!(
            memory_cache_size = config.memory_cache_size,
            disk_cache_size = config.disk_cache_size,
            workers = workers.len(),
            "Engine started"
        );

        Self {
            shared,
            default_headers,
            queue,
            workers,
        }
    }

    // == Operations ==
    /// Creates an operation carrying the engine's default headers.
    pub fn create_operation<I, K, V>(&self, url: impl Into<String>, params: I, method: HttpMethod) -> Operation
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut operation = Operation::new(url, params, method);
        operation.add_default_headers(&self.default_headers);
        operation
    }

    /// Sets a header stamped on every operation created from now on.
    pub fn set_default_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        let name = HeaderName::try_from(name)
            .map_err(|e| TransportError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
        self.default_headers.insert(name, value);
        Ok(())
    }

    /// Runs `operation` to a terminal state on the calling task.
    ///
    /// `force_reload` skips serving from the cache; a successful response
    /// still repopulates it. Passing an operation that already ran is a no-op.
    pub async fn execute_operation(&self, operation: &mut Operation, force_reload: bool) {
        self.shared.execute(operation, force_reload, None).await;
    }

    /// Hands `operation` to the worker pool.
    ///
    /// The operation must carry a listener; it is invoked when the returned
    /// handle is awaited. The cache lookup happens on the worker.
    pub fn enqueue_operation(
        &self,
        mut operation: Operation,
        force_reload: bool,
    ) -> Result<OperationHandle, EngineError> {
        let listener = operation
            .take_listener()
            .ok_or(EngineError::MissingListener)?;

        let (reply, receiver) = oneshot::channel();
        let cancel = CancellationToken::new();
        self.queue
            .send(Job {
                operation,
                force_reload,
                cancel: cancel.clone(),
                reply,
            })
            .map_err(|_| EngineError::WorkerLost)?;

        Ok(OperationHandle {
            receiver,
            cancel,
            listener,
        })
    }

    // == Settings ==
    pub fn set_use_cache(&self, use_cache: bool) {
        self.shared.use_cache.store(use_cache, Ordering::Relaxed);
    }

    pub fn use_cache(&self) -> bool {
        self.shared.use_cache.load(Ordering::Relaxed)
    }

    /// Resizes the memory tier, evicting at once if it shrank.
    pub fn set_memory_cache_size(&self, bytes: usize) {
        self.shared.memory.resize(bytes);
    }

    /// Resizes the disk tier. Zero closes it; a positive size reopens a
    /// tier that was closed or unavailable.
    pub async fn set_disk_cache_size(&self, bytes: u64) {
        self.shared.disk_options.lock().max_size = bytes;

        let current = self.shared.disk.read().clone();
        match current {
            Some(disk) if bytes == 0 => {
                *self.shared.disk.write() = None;
                if let Err(e) = off_runtime(&disk, DiskLruCache::close).await {
                    debug!(error = %e, "Closing disk cache failed");
                }
            }
            Some(disk) => {
                if let Err(e) = off_runtime(&disk, move |disk| disk.set_max_size(bytes)).await {
                    self.shared.handle_disk_error(&disk, None, e).await;
                }
            }
            None => self.shared.open_disk().await,
        }
    }

    /// Evicts the memory tier and recreates the disk tier from scratch.
    pub async fn clear_cache(&self) {
        self.shared.memory.evict_all();

        let previous = self.shared.disk.write().take();
        if let Some(disk) = previous {
            if let Err(e) = off_runtime(&disk, DiskLruCache::delete).await {
                warn!(error = %e, "Failed to delete disk cache");
            }
        }
        self.shared.open_disk().await;
        info!("Cache cleared");
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            use_cache: self.use_cache(),
            memory: self.shared.memory.stats(),
            disk: self.shared.disk.read().as_ref().map(DiskLruCache::stats),
        }
    }

    /// True while the disk tier is open.
    pub fn has_disk_cache(&self) -> bool {
        self.shared.disk.read().is_some()
    }

    /// Stops accepting work and waits for queued operations to finish.
    pub async fn shutdown(self) {
        let Engine { queue, workers, .. } = self;
        drop(queue);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("use_cache", &self.use_cache())
            .field("memory", &self.shared.memory)
            .field("disk", &*self.shared.disk.read())
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl EngineShared {
    /// Looks the operation up in the caches, then runs it. An operation that
    /// already ran is left untouched.
    pub(crate) async fn execute(
        &self,
        operation: &mut Operation,
        force_reload: bool,
        cancel: Option<&CancellationToken>,
    ) {
        if operation.status() != OperationStatus::Pending {
            debug!(url = operation.url(), status = %operation.status(), "Operation already ran");
            return;
        }
        self.prepare(operation, force_reload).await;
        self.run(operation, cancel).await;
    }

    // == Prepare ==
    /// Cache lookup: attaches cached data and conditional headers, and marks
    /// the operation fresh when no request is needed.
    async fn prepare(&self, operation: &mut Operation, force_reload: bool) {
        if !operation.is_cacheable() || !self.use_cache.load(Ordering::Relaxed) || force_reload {
            return;
        }

        let key = operation.cache_key();
        let Some(entry) = self.lookup(&key).await else {
            debug!(url = operation.url(), "Cache miss");
            return;
        };

        operation.update_from_cache_headers(entry.headers());
        operation.cached_data = Some(entry.body());
        if entry.is_fresh(Utc::now()) {
            debug!(url = operation.url(), "Serving fresh cached response");
            operation.fresh = true;
        } else {
            debug!(url = operation.url(), "Revalidating stale cached response");
        }
    }

    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(key) {
            return Some(entry);
        }

        let disk = self.disk.read().clone()?;
        let owned = key.clone();
        match off_runtime(&disk, move |disk| read_disk_entry(disk, &owned)).await {
            Ok(Some(entry)) => {
                debug!(key = %key, "Promoting disk cache hit to memory");
                self.memory.put(key.clone(), entry.clone());
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                self.handle_disk_error(&disk, Some(key), e).await;
                None
            }
        }
    }

    // == Run ==
    /// Drives a prepared operation through `Executing` to its terminal state.
    async fn run(&self, operation: &mut Operation, cancel: Option<&CancellationToken>) {
        let cancelled = || cancel.is_some_and(CancellationToken::is_cancelled);

        if cancelled() {
            operation.set_status(OperationStatus::Cancelled);
            return;
        }
        operation.set_status(OperationStatus::Executing);

        let outcome = self.dispatch(operation).await;
        let outcome = if cancelled() {
            OperationStatus::Cancelled
        } else {
            outcome
        };
        operation.set_status(outcome);
    }

    async fn dispatch(&self, operation: &mut Operation) -> OperationStatus {
        if operation.fresh {
            operation.http_status = Some(200);
            return OperationStatus::Completed;
        }

        let request = TransportRequest::from_operation(operation);
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(error) => {
                warn!(url = operation.url(), error = %error, "Transport failed");
                let status = if error.is_timeout() {
                    OperationStatus::Timeout
                } else {
                    OperationStatus::Error
                };
                operation.error = Some(error);
                return status;
            }
        };

        let status = response.status;
        operation.cache_headers = CacheHeaders::from_response(&response.headers, Utc::now());
        operation.http_status = Some(status);
        operation.response_headers = response.headers;
        operation.response_data = Some(response.body.clone());

        match status {
            200..=299 => {
                operation.cached_data = None;
                if operation.is_cacheable() && self.use_cache.load(Ordering::Relaxed) {
                    let entry = CacheEntry::new(operation.cache_headers.clone(), response.body);
                    self.store(&operation.cache_key(), entry).await;
                }
                OperationStatus::Completed
            }
            400..=599 => {
                operation.cached_data = None;
                OperationStatus::Error
            }
            304 if operation.cached_data.is_some() => {
                debug!(url = operation.url(), "Cached response not modified");
                operation.http_status = Some(200);
                OperationStatus::Completed
            }
            _ => {
                operation.cached_data = None;
                OperationStatus::Completed
            }
        }
    }

    // == Store ==
    async fn store(&self, key: &CacheKey, entry: CacheEntry) {
        self.memory.put(key.clone(), entry.clone());

        let current = self.disk.read().clone();
        let Some(disk) = current else {
            return;
        };
        let owned = key.clone();
        if let Err(e) = off_runtime(&disk, move |disk| write_disk_entry(disk, &owned, &entry)).await {
            self.handle_disk_error(&disk, Some(key), e).await;
        }
    }

    // == Disk Tier ==
    /// Directory and options for opening the disk tier, or `None` while it
    /// is sized to zero.
    fn disk_open_args(&self) -> Option<(PathBuf, DiskCacheOptions)> {
        let options = self.disk_options.lock().clone();
        (options.max_size > 0).then(|| (self.cache_dir.clone(), options))
    }

    async fn open_disk(&self) {
        let Some((directory, options)) = self.disk_open_args() else {
            return;
        };
        let opened = tokio::task::spawn_blocking(move || DiskLruCache::open(directory, options))
            .await
            .unwrap_or_else(|e| Err(join_failure(e)));
        self.install_disk(opened);
    }

    fn install_disk(&self, opened: error::Result<DiskLruCache>) {
        match opened {
            Ok(disk) => *self.disk.write() = Some(disk),
            Err(e) => warn!(
                directory = %self.cache_dir.display(),
                error = %e,
                "Disk cache unavailable, using memory cache only"
            ),
        }
    }

    /// Absorbs a disk-tier failure. Entry-level problems drop the entry; a
    /// store-level failure switches `disk` off unless it was already
    /// replaced.
    async fn handle_disk_error(&self, disk: &DiskLruCache, key: Option<&CacheKey>, error: CacheError) {
        if error.is_store_failure() {
            warn!(error = %error, "Disk cache failed, continuing without it");
            let mut slot = self.disk.write();
            if slot.as_ref().is_some_and(|current| current.same_store(disk)) {
                *slot = None;
            }
            return;
        }

        match (&error, key) {
            (CacheError::Closed, _) | (_, None) => debug!(error = %error, "Disk cache operation skipped"),
            (_, Some(key)) => {
                warn!(key = %key, error = %error, "Dropping unreadable disk cache entry");
                let owned = key.clone();
                if let Err(e) = off_runtime(disk, move |disk| disk.remove(owned.as_str())).await {
                    debug!(key = %key, error = %e, "Could not remove disk cache entry");
                }
            }
        }
    }
}

/// Runs blocking disk-tier work on Tokio's blocking pool.
async fn off_runtime<T, F>(disk: &DiskLruCache, work: F) -> error::Result<T>
where
    F: FnOnce(&DiskLruCache) -> error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let disk = disk.clone();
    tokio::task::spawn_blocking(move || work(&disk))
        .await
        .unwrap_or_else(|e| Err(join_failure(e)))
}

/// A panicked disk task counts as an I/O failure of the tier.
fn join_failure(error: tokio::task::JoinError) -> CacheError {
    CacheError::Io(std::io::Error::other(error))
}

fn read_disk_entry(disk: &DiskLruCache, key: &CacheKey) -> error::Result<Option<CacheEntry>> {
    let Some(mut snapshot) = disk.get(key.as_str())? else {
        return Ok(None);
    };
    codec::read_entry(&mut snapshot).map(Some)
}

fn write_disk_entry(disk: &DiskLruCache, key: &CacheKey, entry: &CacheEntry) -> error::Result<()> {
    let Some(mut editor) = disk.edit(key.as_str())? else {
        debug!(key = %key, "Disk cache entry busy, skipping write");
        return Ok(());
    };
    codec::write_entry(entry, &mut editor)?;
    editor.commit()
}
