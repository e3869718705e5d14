//! Ordered queue of upcoming songs for a lobby.
//!
//! Hashes are unique within the list (case-insensitive) and the list is
//! capped. The pipe-delimited snapshot form is what late joiners receive.

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::protocol::types::SetlistEntry;

/// Hard cap on queued songs.
pub const SETLIST_MAX_ENTRIES: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetlistError {
    #[error("song is already in the setlist")]
    DuplicateSong,
    #[error("setlist is full ({SETLIST_MAX_ENTRIES} entries)")]
    SetlistFull,
    #[error("song is not in the setlist")]
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetlistEvent {
    SongAdded(SetlistEntry),
    SongRemoved(String),
    Cleared,
    /// The whole list was replaced (snapshot applied or reordered).
    Synced(Vec<SetlistEntry>),
}

pub struct SetlistManager {
    entries: Mutex<Vec<SetlistEntry>>,
    max_entries: usize,
}

impl Default for SetlistManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SetlistManager {
    pub fn new() -> Self {
        Self::with_capacity(SETLIST_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_entries,
        }
    }

    /// Append a song. Duplicates (by case-insensitive hash) and adds past
    /// the cap are rejected; removals are always possible at the cap.
    pub fn try_add(&self, entry: SetlistEntry) -> Result<SetlistEvent, SetlistError> {
        let mut entries = self.lock();
        if entries
            .iter()
            .any(|e| e.song_hash.eq_ignore_ascii_case(&entry.song_hash))
        {
            return Err(SetlistError::DuplicateSong);
        }
        if entries.len() >= self.max_entries {
            return Err(SetlistError::SetlistFull);
        }
        let entry = sanitize(entry);
        entries.push(entry.clone());
        Ok(SetlistEvent::SongAdded(entry))
    }

    pub fn try_remove(&self, song_hash: &str) -> Result<SetlistEvent, SetlistError> {
        let mut entries = self.lock();
        let index = entries
            .iter()
            .position(|e| e.song_hash.eq_ignore_ascii_case(song_hash))
            .ok_or(SetlistError::NotFound)?;
        let removed = entries.remove(index);
        Ok(SetlistEvent::SongRemoved(removed.song_hash))
    }

    /// Take the next song off the front of the queue.
    pub fn pop_first(&self) -> Option<SetlistEntry> {
        let mut entries = self.lock();
        if entries.is_empty() {
            None
        } else {
            Some(entries.remove(0))
        }
    }

    pub fn peek_first(&self) -> Option<SetlistEntry> {
        self.lock().first().cloned()
    }

    pub fn clear(&self) -> SetlistEvent {
        self.lock().clear();
        SetlistEvent::Cleared
    }

    /// Replace the whole list, preserving the given order. Duplicate hashes
    /// collapse to their first occurrence; the cap is enforced by truncation.
    pub fn replace_all(&self, new_entries: Vec<SetlistEntry>) -> SetlistEvent {
        let mut deduped: Vec<SetlistEntry> = Vec::new();
        for entry in new_entries {
            if deduped.len() >= self.max_entries {
                break;
            }
            if !deduped
                .iter()
                .any(|e| e.song_hash.eq_ignore_ascii_case(&entry.song_hash))
            {
                deduped.push(sanitize(entry));
            }
        }
        let mut entries = self.lock();
        *entries = deduped.clone();
        SetlistEvent::Synced(deduped)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<SetlistEntry> {
        self.lock().clone()
    }

    /// Pipe-delimited snapshot: one `hash|name|artist|addedBy` line per
    /// entry. Fields were stripped of framing characters on ingest.
    pub fn serialize(&self) -> String {
        self.lock()
            .iter()
            .map(|e| {
                format!(
                    "{}|{}|{}|{}",
                    e.song_hash, e.song_name, e.song_artist, e.added_by
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse the pipe-delimited form and replace the current list with it.
    /// Lines that do not have exactly four fields are skipped.
    pub fn deserialize(&self, serialized: &str) -> SetlistEvent {
        let entries: Vec<SetlistEntry> = serialized
            .lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.split('|').collect();
                if fields.len() != 4 {
                    return None;
                }
                Some(SetlistEntry {
                    song_hash: fields[0].to_string(),
                    song_name: fields[1].to_string(),
                    song_artist: fields[2].to_string(),
                    added_by: fields[3].to_string(),
                })
            })
            .filter(|e| !e.song_hash.is_empty())
            .collect();
        self.replace_all(entries)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SetlistEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Strip the snapshot framing characters so serialize/deserialize stays
/// unambiguous.
fn sanitize(mut entry: SetlistEntry) -> SetlistEntry {
    for field in [
        &mut entry.song_hash,
        &mut entry.song_name,
        &mut entry.song_artist,
        &mut entry.added_by,
    ] {
        if field.contains('|') || field.contains('\n') {
            *field = field.replace(['|', '\n'], " ").trim().to_string();
        }
    }
    entry
}
