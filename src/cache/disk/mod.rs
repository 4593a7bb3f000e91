//! Disk Cache Module
//!
//! A directory-backed, crash-consistent key -> entry store with LRU
//! eviction. Each entry owns one file per value slot (`<key>.<slot>`); edits
//! write `<key>.<slot>.tmp` files that are renamed into place on commit. An
//! append-only journal records every edit, removal and read so the index and
//! its access order can be rebuilt after a restart.
//!
//! At most one edit per key is in flight at any time, and a key with an
//! outstanding edit reads as a miss.

mod journal;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::LruTracker;
use crate::error::{CacheError, Result};

pub use journal::JournalRecord;
use journal::{Replay, JOURNAL_FILE, JOURNAL_FILE_TMP};

// == Public Constants ==
/// Value slots per entry
pub const VALUE_COUNT: usize = 2;

/// Redundant journal records tolerated before the journal is compacted
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 2000;

/// Longest key the disk layout accepts
pub const MAX_KEY_LENGTH: usize = 120;

const TMP_SUFFIX: &str = ".tmp";

// == Options ==
#[derive(Debug, Clone)]
pub struct DiskCacheOptions {
    /// Byte budget across all committed slots
    pub max_size: u64,
    /// Stored in the journal header; a different value invalidates the store
    pub app_version: u32,
    /// See [`DEFAULT_COMPACTION_THRESHOLD`]
    pub compaction_threshold: usize,
}

impl Default for DiskCacheOptions {
    fn default() -> Self {
        Self {
            max_size: 10 * 1024 * 1024,
            app_version: 1,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

// == Stats ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskStats {
    /// Committed entries
    pub entries: usize,
    /// Summed committed slot lengths
    pub size: u64,
    pub max_size: u64,
    /// Entries dropped by size-driven eviction
    pub evictions: u64,
    /// Journal records a compaction would drop
    pub redundant_records: usize,
}

// == Disk LRU Cache ==
/// Handle to an open disk cache. Clones share the same store.
#[derive(Clone)]
pub struct DiskLruCache {
    state: Arc<Mutex<DiskState>>,
    directory: PathBuf,
}

#[derive(Debug, Default, Clone, Copy)]
struct DiskEntry {
    lengths: [u64; VALUE_COUNT],
    /// Has a committed value on disk
    readable: bool,
    /// Id of the editor currently owning this key
    current_edit: Option<u64>,
}

struct DiskState {
    directory: PathBuf,
    options: DiskCacheOptions,
    entries: HashMap<String, DiskEntry>,
    /// Access order of readable entries
    lru: LruTracker<String>,
    size: u64,
    /// `None` once closed
    journal: Option<BufWriter<File>>,
    redundant_records: usize,
    next_edit_id: u64,
    evictions: u64,
}

impl DiskLruCache {
    // == Open ==
    /// Opens the store in `directory`, creating it if needed and replaying
    /// any existing journal.
    ///
    /// Entries whose edit never committed are deleted, as is every leftover
    /// temp file. A journal written with another format or application
    /// version wipes the directory.
    pub fn open(directory: impl Into<PathBuf>, options: DiskCacheOptions) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let mut state = DiskState {
            directory: directory.clone(),
            options,
            entries: HashMap::new(),
            lru: LruTracker::new(),
            size: 0,
            journal: None,
            redundant_records: 0,
            next_edit_id: 0,
            evictions: 0,
        };

        let mut needs_rewrite = true;
        match fs::read(directory.join(JOURNAL_FILE)) {
            Ok(bytes) => {
                let text = String::from_utf8(bytes).ok();
                match text
                    .as_deref()
                    .and_then(|text| journal::strip_header(text, state.options.app_version))
                {
                    Some(records) => {
                        needs_rewrite = state.restore(journal::replay(records))?;
                    }
                    None => {
                        warn!(
                            directory = %directory.display(),
                            "Disk cache journal header mismatch, discarding store"
                        );
                        fs::remove_dir_all(&directory)?;
                        fs::create_dir_all(&directory)?;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        remove_temp_files(&directory)?;

        if needs_rewrite {
            state.rebuild_journal()?;
        } else {
            state.journal = Some(open_append(&state.journal_path())?);
        }
        state.trim_to_size()?;

        info!(
            directory = %directory.display(),
            entries = state.lru.len(),
            size = state.size,
            "Disk cache opened"
        );

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            directory,
        })
    }

    // == Get ==
    /// Returns a snapshot of the committed entry for `key`.
    ///
    /// Misses when the key is unknown, was never committed, or has an edit
    /// outstanding.
    pub fn get(&self, key: &str) -> Result<Option<Snapshot>> {
        validate_key(key)?;
        let mut state = self.state.lock();
        state.check_open()?;

        let lengths = match state.entries.get(key) {
            Some(entry) if entry.readable && entry.current_edit.is_none() => entry.lengths,
            _ => return Ok(None),
        };

        let mut files = Vec::with_capacity(VALUE_COUNT);
        for index in 0..VALUE_COUNT {
            match File::open(state.clean_path(key, index)) {
                Ok(file) => files.push(file),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(key, "Disk cache files missing, dropping entry");
                    state.remove_entry(key)?;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }

        state.redundant_records += 1;
        state.lru.touch(&key.to_string());
        state.append(&JournalRecord::Read(key.to_string()))?;
        state.maybe_compact()?;

        Ok(Some(Snapshot {
            key: key.to_string(),
            files,
            lengths,
        }))
    }

    // == Edit ==
    /// Starts an edit of `key`. Returns `None` if another edit is in flight.
    pub fn edit(&self, key: &str) -> Result<Option<Editor>> {
        validate_key(key)?;
        let mut state = self.state.lock();
        state.check_open()?;

        let busy = state
            .entries
            .get(key)
            .is_some_and(|entry| entry.current_edit.is_some());
        if busy {
            return Ok(None);
        }
        state.append(&JournalRecord::Dirty(key.to_string()))?;

        let edit_id = state.next_edit_id;
        state.next_edit_id += 1;
        state.entries.entry(key.to_string()).or_default().current_edit = Some(edit_id);

        Ok(Some(Editor {
            cache: self.clone(),
            key: key.to_string(),
            edit_id,
            written: [false; VALUE_COUNT],
            done: false,
        }))
    }

    // == Remove ==
    /// Deletes the committed entry for `key`. Returns `false` if there was
    /// nothing to remove or an edit is in flight.
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut state = self.state.lock();
        state.check_open()?;

        let removed = state.remove_entry(key)?;
        if removed {
            state.maybe_compact()?;
        }
        Ok(removed)
    }

    // == Size Management ==
    /// Changes the byte budget, evicting immediately if it shrank.
    pub fn set_max_size(&self, max_size: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.options.max_size = max_size;
        state.trim_to_size()
    }

    pub fn max_size(&self) -> u64 {
        self.state.lock().options.max_size
    }

    /// Summed lengths of all committed slots.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.state.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DiskStats {
        let state = self.state.lock();
        DiskStats {
            entries: state.lru.len(),
            size: state.size,
            max_size: state.options.max_size,
            evictions: state.evictions,
            redundant_records: state.redundant_records,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().journal.is_none()
    }

    /// True when both handles refer to the same open store.
    pub fn same_store(&self, other: &DiskLruCache) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    // == Lifecycle ==
    /// Closes the journal. Later calls fail with [`CacheError::Closed`], and
    /// outstanding editors can no longer commit.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(mut journal) = state.journal.take() {
            journal.flush()?;
        }
        Ok(())
    }

    /// Closes the store and deletes its directory with everything in it.
    pub fn delete(&self) -> Result<()> {
        self.close()?;
        match fs::remove_dir_all(&self.directory) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn complete_edit(
        &self,
        key: &str,
        edit_id: u64,
        written: [bool; VALUE_COUNT],
        commit: bool,
    ) -> Result<()> {
        self.state.lock().complete_edit(key, edit_id, written, commit)
    }
}

impl std::fmt::Debug for DiskLruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskLruCache")
            .field("directory", &self.directory)
            .finish()
    }
}

impl DiskState {
    fn journal_path(&self) -> PathBuf {
        self.directory.join(JOURNAL_FILE)
    }

    fn clean_path(&self, key: &str, index: usize) -> PathBuf {
        self.directory.join(format!("{key}.{index}"))
    }

    fn dirty_path(&self, key: &str, index: usize) -> PathBuf {
        self.directory.join(format!("{key}.{index}{TMP_SUFFIX}"))
    }

    fn check_open(&self) -> Result<()> {
        if self.journal.is_none() {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let journal = self.journal.as_mut().ok_or(CacheError::Closed)?;
        writeln!(journal, "{record}")?;
        journal.flush()?;
        Ok(())
    }

    // == Restore ==
    /// Loads a replayed journal into the index. Returns whether the journal
    /// should be rewritten.
    fn restore(&mut self, replay: Replay) -> Result<bool> {
        let Replay {
            live,
            order,
            discarded,
            record_count,
            needs_rewrite,
        } = replay;

        for key in &discarded {
            warn!(key = %key, "Discarding incomplete disk cache entry");
            for index in 0..VALUE_COUNT {
                remove_if_exists(&self.clean_path(key, index))?;
                remove_if_exists(&self.dirty_path(key, index))?;
            }
        }

        for key in order.iter_oldest() {
            let lengths = live[key];
            self.size += lengths.iter().sum::<u64>();
            self.entries.insert(
                key.clone(),
                DiskEntry {
                    lengths,
                    readable: true,
                    current_edit: None,
                },
            );
        }
        self.lru = order;
        self.redundant_records = record_count.saturating_sub(self.entries.len());

        Ok(needs_rewrite)
    }

    // == Complete Edit ==
    fn complete_edit(
        &mut self,
        key: &str,
        edit_id: u64,
        written: [bool; VALUE_COUNT],
        commit: bool,
    ) -> Result<()> {
        self.check_open()?;
        let owns_entry = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.current_edit == Some(edit_id));
        if !owns_entry {
            return Err(CacheError::StaleEditor(key.to_string()));
        }

        let incomplete = if commit {
            (0..VALUE_COUNT).find(|&index| !written[index] || !self.dirty_path(key, index).exists())
        } else {
            None
        };
        let success = commit && incomplete.is_none();

        let mut lengths = [0u64; VALUE_COUNT];
        for (index, length) in lengths.iter_mut().enumerate() {
            let dirty = self.dirty_path(key, index);
            if success {
                let clean = self.clean_path(key, index);
                fs::rename(&dirty, &clean)?;
                *length = fs::metadata(&clean)?.len();
            } else {
                remove_if_exists(&dirty)?;
            }
        }

        self.redundant_records += 1;
        let Some(entry) = self.entries.get_mut(key) else {
            return Err(CacheError::StaleEditor(key.to_string()));
        };
        entry.current_edit = None;

        if success {
            let previous = if entry.readable {
                entry.lengths.iter().sum()
            } else {
                0
            };
            entry.lengths = lengths;
            entry.readable = true;
            self.size = self.size - previous + lengths.iter().sum::<u64>();
            self.lru.touch(&key.to_string());
            self.append(&JournalRecord::Clean {
                key: key.to_string(),
                lengths,
            })?;
        } else if entry.readable {
            // The previously committed value is still intact
            let lengths = entry.lengths;
            self.append(&JournalRecord::Clean {
                key: key.to_string(),
                lengths,
            })?;
        } else {
            self.entries.remove(key);
            self.append(&JournalRecord::Remove(key.to_string()))?;
        }

        self.trim_to_size()?;
        self.maybe_compact()?;

        match incomplete {
            Some(slot) if commit => Err(CacheError::IncompleteEdit {
                key: key.to_string(),
                slot,
            }),
            _ => Ok(()),
        }
    }

    // == Remove Entry ==
    fn remove_entry(&mut self, key: &str) -> Result<bool> {
        let Some(entry) = self.entries.get(key).copied() else {
            return Ok(false);
        };
        if entry.current_edit.is_some() {
            return Ok(false);
        }

        for index in 0..VALUE_COUNT {
            remove_if_exists(&self.clean_path(key, index))?;
        }
        if entry.readable {
            self.size -= entry.lengths.iter().sum::<u64>();
        }
        self.redundant_records += 1;
        self.entries.remove(key);
        self.lru.remove(key);
        self.append(&JournalRecord::Remove(key.to_string()))?;
        Ok(true)
    }

    // == Trim To Size ==
    /// Evicts least recently used committed entries until within budget.
    /// Entries with an edit in flight are skipped.
    fn trim_to_size(&mut self) -> Result<()> {
        while self.size > self.options.max_size {
            let victim = self
                .lru
                .iter_oldest()
                .find(|key| {
                    self.entries
                        .get(*key)
                        .is_some_and(|entry| entry.current_edit.is_none())
                })
                .cloned();
            let Some(victim) = victim else {
                break;
            };

            debug!(key = %victim, size = self.size, "Evicting disk cache entry");
            self.remove_entry(&victim)?;
            self.evictions += 1;
        }
        Ok(())
    }

    // == Compaction ==
    fn maybe_compact(&mut self) -> Result<()> {
        if self.redundant_records >= self.options.compaction_threshold
            && self.redundant_records >= self.entries.len()
        {
            debug!(
                redundant = self.redundant_records,
                entries = self.entries.len(),
                "Compacting disk cache journal"
            );
            self.rebuild_journal()?;
        }
        Ok(())
    }

    /// Writes the minimal journal for the current index to a temp file and
    /// swaps it in.
    fn rebuild_journal(&mut self) -> Result<()> {
        if let Some(mut journal) = self.journal.take() {
            journal.flush()?;
        }

        let tmp_path = self.directory.join(JOURNAL_FILE_TMP);
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(journal::header(self.options.app_version).as_bytes())?;
            for key in self.lru.iter_oldest() {
                let record = JournalRecord::Clean {
                    key: key.clone(),
                    lengths: self.entries[key].lengths,
                };
                writeln!(writer, "{record}")?;
            }
            for (key, entry) in &self.entries {
                if entry.current_edit.is_some() {
                    writeln!(writer, "{}", JournalRecord::Dirty(key.clone()))?;
                }
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, self.journal_path())?;
        self.journal = Some(open_append(&self.journal_path())?);
        self.redundant_records = 0;
        Ok(())
    }
}

// == Snapshot ==
/// Committed values of one entry, opened at read time.
#[derive(Debug)]
pub struct Snapshot {
    key: String,
    files: Vec<File>,
    lengths: [u64; VALUE_COUNT],
}

impl Snapshot {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Committed length of slot `index`.
    pub fn length(&self, index: usize) -> Result<u64> {
        check_slot(index)?;
        Ok(self.lengths[index])
    }

    /// Reads slot `index` fully.
    pub fn read_value(&mut self, index: usize) -> Result<Vec<u8>> {
        check_slot(index)?;
        let mut value = Vec::with_capacity(self.lengths[index] as usize);
        self.files[index].read_to_end(&mut value)?;
        Ok(value)
    }
}

// == Editor ==
/// Transactional handle for writing the value slots of one entry.
///
/// Every slot must be written before [`commit`](Editor::commit). Dropping an
/// editor without committing aborts the edit.
#[derive(Debug)]
pub struct Editor {
    cache: DiskLruCache,
    key: String,
    edit_id: u64,
    written: [bool; VALUE_COUNT],
    done: bool,
}

impl Editor {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Opens slot `index` for writing, truncating anything written before.
    pub fn new_output(&mut self, index: usize) -> Result<File> {
        check_slot(index)?;
        let path = self.cache.directory.join(format!("{}.{index}{TMP_SUFFIX}", self.key));
        let file = File::create(path)?;
        self.written[index] = true;
        Ok(file)
    }

    /// Writes `value` as the whole content of slot `index`.
    pub fn set(&mut self, index: usize, value: &[u8]) -> Result<()> {
        let mut output = self.new_output(index)?;
        output.write_all(value)?;
        output.flush()?;
        Ok(())
    }

    /// Publishes the written slots. Fails with
    /// [`CacheError::IncompleteEdit`] (and aborts) if a slot is missing.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        self.cache
            .complete_edit(&self.key, self.edit_id, self.written, true)
    }

    /// Discards the written slots.
    pub fn abort(mut self) -> Result<()> {
        self.done = true;
        self.cache
            .complete_edit(&self.key, self.edit_id, self.written, false)
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self
                .cache
                .complete_edit(&self.key, self.edit_id, self.written, false)
            {
                debug!(key = %self.key, error = %e, "Abandoned edit could not be aborted");
            }
        }
    }
}

// == Utility Functions ==
fn check_slot(index: usize) -> Result<()> {
    if index < VALUE_COUNT {
        Ok(())
    } else {
        Err(CacheError::InvalidSlot(index))
    }
}

/// Keys become file names, so only `[a-z0-9_-]` is accepted.
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LENGTH
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn remove_temp_files(directory: &Path) -> io::Result<()> {
    for dir_entry in fs::read_dir(directory)? {
        let path = dir_entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(TMP_SUFFIX));
        if is_temp {
            remove_if_exists(&path)?;
        }
    }
    Ok(())
}
