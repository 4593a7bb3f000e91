//! Journal Module
//!
//! The journal is a header followed by one record per line:
//!
//! ```text
//! netcache.journal
//! 1
//! <app version>
//! 2
//!
//! DIRTY <key>
//! CLEAN <key> <len0> <len1>
//! READ <key>
//! REMOVE <key>
//! ```
//!
//! Replaying it rebuilds the live entry set and its access order.

use std::collections::HashMap;
use std::fmt;

use crate::cache::disk::VALUE_COUNT;
use crate::cache::LruTracker;

pub const JOURNAL_FILE: &str = "journal";
pub const JOURNAL_FILE_TMP: &str = "journal.tmp";
pub const MAGIC: &str = "netcache.journal";
pub const FORMAT_VERSION: &str = "1";

const DIRTY: &str = "DIRTY";
const CLEAN: &str = "CLEAN";
const REMOVE: &str = "REMOVE";
const READ: &str = "READ";

// == Header ==
/// Renders the header for a store with the given application version.
pub fn header(app_version: u32) -> String {
    format!("{MAGIC}\n{FORMAT_VERSION}\n{app_version}\n{VALUE_COUNT}\n\n")
}

/// Splits `text` into its records section if the header matches, `None`
/// otherwise.
pub fn strip_header(text: &str, app_version: u32) -> Option<&str> {
    text.strip_prefix(header(app_version).as_str())
}

// == Journal Record ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// An edit has begun; temp files exist but are not valid yet
    Dirty(String),
    /// The edit committed with these slot lengths
    Clean {
        key: String,
        lengths: [u64; VALUE_COUNT],
    },
    /// The entry was deleted or its first edit abandoned
    Remove(String),
    /// The entry was read
    Read(String),
}

/// Why a journal line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not a recognisable record at all
    Garbled,
    /// A `CLEAN` record whose lengths are missing or invalid
    BadLengths(String),
}

impl JournalRecord {
    pub fn key(&self) -> &str {
        match self {
            JournalRecord::Dirty(key)
            | JournalRecord::Remove(key)
            | JournalRecord::Read(key)
            | JournalRecord::Clean { key, .. } => key,
        }
    }

    // == Parse ==
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.split(' ');
        let opcode = parts.next().ok_or(ParseError::Garbled)?;
        let key = parts
            .next()
            .filter(|key| !key.is_empty())
            .ok_or(ParseError::Garbled)?
            .to_string();

        let record = match opcode {
            CLEAN => {
                let lengths: Vec<u64> = parts
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .map_err(|_| ParseError::BadLengths(key.clone()))?;
                let lengths: [u64; VALUE_COUNT] = lengths
                    .try_into()
                    .map_err(|_| ParseError::BadLengths(key.clone()))?;
                return Ok(JournalRecord::Clean { key, lengths });
            }
            DIRTY => JournalRecord::Dirty(key),
            REMOVE => JournalRecord::Remove(key),
            READ => JournalRecord::Read(key),
            _ => return Err(ParseError::Garbled),
        };

        if parts.next().is_some() {
            return Err(ParseError::Garbled);
        }
        Ok(record)
    }
}

impl fmt::Display for JournalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalRecord::Dirty(key) => write!(f, "{DIRTY} {key}"),
            JournalRecord::Remove(key) => write!(f, "{REMOVE} {key}"),
            JournalRecord::Read(key) => write!(f, "{READ} {key}"),
            JournalRecord::Clean { key, lengths } => {
                write!(f, "{CLEAN} {key}")?;
                for length in lengths {
                    write!(f, " {length}")?;
                }
                Ok(())
            }
        }
    }
}

// == Replay ==
/// Outcome of replaying the records section of a journal.
#[derive(Debug, Default)]
pub struct Replay {
    /// Committed entries and their slot lengths
    pub live: HashMap<String, [u64; VALUE_COUNT]>,
    /// Access order of `live`, oldest first
    pub order: LruTracker<String>,
    /// Keys that must be treated as absent: their files are to be deleted
    pub discarded: Vec<String>,
    /// Number of complete record lines read
    pub record_count: usize,
    /// Set when the journal holds anything a rewrite should drop
    pub needs_rewrite: bool,
}

/// Replays `records`, the journal text after the header.
///
/// A `DIRTY` with no later `CLEAN` or `REMOVE` discards its key, as does a
/// malformed `CLEAN`. A final line without a newline is an interrupted
/// append and is ignored.
pub fn replay(records: &str) -> Replay {
    let mut replay = Replay::default();
    let mut dirty: HashMap<String, bool> = HashMap::new();

    let mut lines: Vec<&str> = records.split('\n').collect();
    // Whatever follows the last newline is either "" or a torn record
    if let Some(tail) = lines.pop() {
        if !tail.is_empty() {
            replay.needs_rewrite = true;
        }
    }

    for line in lines {
        replay.record_count += 1;
        match JournalRecord::parse(line) {
            Ok(JournalRecord::Dirty(key)) => {
                dirty.insert(key, true);
            }
            Ok(JournalRecord::Clean { key, lengths }) => {
                dirty.remove(&key);
                replay.order.touch(&key);
                replay.live.insert(key, lengths);
            }
            Ok(JournalRecord::Remove(key)) => {
                dirty.remove(&key);
                replay.order.remove(&key);
                replay.live.remove(&key);
            }
            Ok(JournalRecord::Read(key)) => {
                if replay.live.contains_key(&key) {
                    replay.order.touch(&key);
                }
            }
            Err(ParseError::BadLengths(key)) => {
                dirty.remove(&key);
                replay.order.remove(&key);
                replay.live.remove(&key);
                replay.discarded.push(key);
                replay.needs_rewrite = true;
            }
            Err(ParseError::Garbled) => {
                replay.needs_rewrite = true;
            }
        }
    }

    for key in dirty.into_keys() {
        replay.order.remove(&key);
        replay.live.remove(&key);
        replay.discarded.push(key);
        replay.needs_rewrite = true;
    }
    replay.discarded.sort();
    replay.discarded.dedup();
    replay
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(key: &str, a: u64, b: u64) -> String {
        JournalRecord::Clean {
            key: key.to_string(),
            lengths: [a, b],
        }
        .to_string()
    }

    #[test]
    fn test_record_format() {
        assert_eq!(JournalRecord::Dirty("k1".into()).to_string(), "DIRTY k1");
        assert_eq!(clean("k1", 12, 3400), "CLEAN k1 12 3400");
        assert_eq!(JournalRecord::Remove("k1".into()).to_string(), "REMOVE k1");
        assert_eq!(JournalRecord::Read("k1".into()).to_string(), "READ k1");
    }

    #[test]
    fn test_record_parse() {
        assert_eq!(
            JournalRecord::parse("CLEAN abc 1 2"),
            Ok(JournalRecord::Clean {
                key: "abc".into(),
                lengths: [1, 2]
            })
        );
        assert_eq!(
            JournalRecord::parse("READ abc"),
            Ok(JournalRecord::Read("abc".into()))
        );
        assert_eq!(JournalRecord::parse("READ"), Err(ParseError::Garbled));
        assert_eq!(JournalRecord::parse("WRITE abc"), Err(ParseError::Garbled));
        assert_eq!(JournalRecord::parse("DIRTY abc extra"), Err(ParseError::Garbled));
        assert_eq!(
            JournalRecord::parse("CLEAN abc 1"),
            Err(ParseError::BadLengths("abc".into()))
        );
        assert_eq!(
            JournalRecord::parse("CLEAN abc 1 x"),
            Err(ParseError::BadLengths("abc".into()))
        );
    }

    #[test]
    fn test_header_round_trip() {
        let text = format!("{}{}\n", header(3), clean("a", 1, 2));
        assert_eq!(strip_header(&text, 3), Some("CLEAN a 1 2\n"));
        assert_eq!(strip_header(&text, 4), None);
        assert_eq!(strip_header("garbage\n", 3), None);
    }

    #[test]
    fn test_replay_rebuilds_entries_and_order() {
        let records = [
            "DIRTY a".to_string(),
            clean("a", 1, 10),
            "DIRTY b".to_string(),
            clean("b", 2, 20),
            "READ a".to_string(),
            "DIRTY c".to_string(),
            clean("c", 3, 30),
            "REMOVE c".to_string(),
        ]
        .join("\n")
            + "\n";

        let replay = replay(&records);
        assert_eq!(replay.record_count, 8);
        assert_eq!(replay.live.len(), 2);
        assert_eq!(replay.live["b"], [2, 20]);
        assert!(!replay.needs_rewrite);
        assert!(replay.discarded.is_empty());

        let order: Vec<_> = replay.order.iter_oldest().cloned().collect();
        assert_eq!(order, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_replay_discards_dangling_dirty() {
        let records = format!("{}\nDIRTY a\nDIRTY b\n", clean("a", 1, 1));
        let replay = replay(&records);

        assert!(replay.live.is_empty());
        assert_eq!(replay.discarded, vec!["a".to_string(), "b".to_string()]);
        assert!(replay.needs_rewrite);
    }

    #[test]
    fn test_replay_discards_malformed_clean() {
        let records = format!("{}\nDIRTY b\nCLEAN b 5\n", clean("a", 1, 1));
        let replay = replay(&records);

        assert_eq!(replay.live.len(), 1);
        assert!(replay.live.contains_key("a"));
        assert_eq!(replay.discarded, vec!["b".to_string()]);
    }

    #[test]
    fn test_replay_ignores_torn_tail() {
        let records = format!("{}\nREAD a\nCLEAN b 1", clean("a", 1, 1));
        let replay = replay(&records);

        assert_eq!(replay.record_count, 2);
        assert_eq!(replay.live.len(), 1);
        assert!(replay.needs_rewrite);
    }

    #[test]
    fn test_replay_skips_garbled_lines() {
        let records = format!("nonsense\n{}\n\n", clean("a", 1, 1));
        let replay = replay(&records);

        assert_eq!(replay.live.len(), 1);
        assert!(replay.needs_rewrite);
    }
}
