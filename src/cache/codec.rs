//! Entry Codec
//!
//! Maps a [`CacheEntry`] onto the two value slots of a disk entry:
//!
//! - slot 0: metadata, a header count line followed by alternating name and
//!   value lines
//! - slot 1: the raw body bytes

use std::io::Write;

use tracing::debug;

use crate::cache::disk::{Editor, Snapshot};
use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};
use crate::http::CacheHeaders;

pub const METADATA_SLOT: usize = 0;
pub const BODY_SLOT: usize = 1;

// == Metadata ==
pub fn encode_metadata(headers: &CacheHeaders) -> String {
    let pairs = headers.pairs();
    let mut out = format!("{}\n", pairs.len());
    for (name, value) in pairs {
        out.push_str(name);
        out.push('\n');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Parses a metadata slot. The declared count must match the lines that
/// follow exactly; header names this build does not store are skipped.
pub fn decode_metadata(text: &str) -> Result<CacheHeaders> {
    let mut lines = text.split('\n');
    let count: usize = lines
        .next()
        .and_then(|line| line.parse().ok())
        .ok_or_else(|| CacheError::CorruptEntry("missing header count".to_string()))?;

    let mut body: Vec<&str> = lines.collect();
    // Text ends with a newline, leaving one empty trailing element
    if body.last() == Some(&"") {
        body.pop();
    }
    if count.checked_mul(2) != Some(body.len()) {
        return Err(CacheError::CorruptEntry(format!(
            "declared {count} headers, found {} lines",
            body.len()
        )));
    }

    let mut headers = CacheHeaders::default();
    for pair in body.chunks_exact(2) {
        if !headers.set(pair[0], pair[1].to_string()) {
            debug!(name = pair[0], "Ignoring unknown stored header");
        }
    }
    Ok(headers)
}

// == Entry ==
/// Writes both slots of `entry` through `editor`. The caller commits.
pub fn write_entry(entry: &CacheEntry, editor: &mut Editor) -> Result<()> {
    editor.set(METADATA_SLOT, encode_metadata(entry.headers()).as_bytes())?;
    let mut body = editor.new_output(BODY_SLOT)?;
    body.write_all(&entry.body())?;
    body.flush()?;
    Ok(())
}

pub fn read_entry(snapshot: &mut Snapshot) -> Result<CacheEntry> {
    let metadata = snapshot.read_value(METADATA_SLOT)?;
    let metadata = String::from_utf8(metadata)
        .map_err(|_| CacheError::CorruptEntry(format!("{}: metadata is not UTF-8", snapshot.key())))?;
    let headers = decode_metadata(&metadata)?;

    let body = snapshot.read_value(BODY_SLOT)?;
    let recorded = snapshot.length(BODY_SLOT)?;
    if body.len() as u64 != recorded {
        return Err(CacheError::CorruptEntry(format!(
            "{}: body is {} bytes, journal recorded {recorded}",
            snapshot.key(),
            body.len(),
        )));
    }
    Ok(CacheEntry::new(headers, body))
}
