//! Live intersection of per-player song libraries.
//!
//! Players stream their hash library up in chunks. The server keeps one hash
//! set per session and recomputes the intersection whenever an upload
//! finishes or a player drops; the result is what the song browser filters
//! against, pushed back down as `SharedSongsChunk` packets.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::packets::SharedSongsChunkPacket;
use crate::protocol::types::{SessionId, SongHash, SONG_HASH_LEN};

/// How many hashes fit into one pushed intersection chunk.
pub const HASHES_PER_CHUNK: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    /// The intersection changed; carries the new shared-song count.
    SharedSongsChanged(usize),
    /// Every in-flight upload finished (or the last uploader left).
    SyncStateChanged { complete: bool },
}

#[derive(Default)]
struct LibraryInner {
    libraries: HashMap<SessionId, HashSet<SongHash>>,
    pending: HashSet<SessionId>,
    shared: HashSet<SongHash>,
}

#[derive(Default)]
pub struct SharedLibraryManager {
    inner: Mutex<LibraryInner>,
}

impl SharedLibraryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one upload chunk from a session.
    ///
    /// The first chunk clears any previous library for the session and marks
    /// the upload in progress. Hash bytes are consumed as fixed-width
    /// 20-byte records; a trailing partial record is ignored. The final
    /// chunk commits the library and recomputes the intersection.
    pub fn ingest_chunk(
        &self,
        session_id: SessionId,
        is_first_chunk: bool,
        is_final_chunk: bool,
        hash_bytes: &[u8],
    ) -> Vec<LibraryEvent> {
        let mut inner = self.lock();

        if is_first_chunk {
            inner.libraries.insert(session_id, HashSet::new());
            inner.pending.insert(session_id);
        }

        let library = inner.libraries.entry(session_id).or_default();
        for chunk in hash_bytes.chunks_exact(SONG_HASH_LEN) {
            let mut hash = [0u8; SONG_HASH_LEN];
            hash.copy_from_slice(chunk);
            library.insert(hash);
        }

        let mut events = Vec::new();
        if is_final_chunk {
            inner.pending.remove(&session_id);
            Self::recompute(&mut inner, &mut events);
            if inner.pending.is_empty() {
                events.push(LibraryEvent::SyncStateChanged { complete: true });
            }
        }
        events
    }

    /// Forget a player's library and recompute.
    pub fn remove_player(&self, session_id: SessionId) -> Vec<LibraryEvent> {
        let mut inner = self.lock();
        let had_library = inner.libraries.remove(&session_id).is_some();
        let was_pending = inner.pending.remove(&session_id);
        if !had_library && !was_pending {
            return Vec::new();
        }

        let mut events = Vec::new();
        Self::recompute(&mut inner, &mut events);
        if was_pending && inner.pending.is_empty() {
            events.push(LibraryEvent::SyncStateChanged { complete: true });
        }
        events
    }

    /// Sessions whose upload is still in progress.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn shared_count(&self) -> usize {
        self.lock().shared.len()
    }

    /// Sorted copy of the live intersection.
    pub fn shared_hashes(&self) -> Vec<SongHash> {
        let inner = self.lock();
        let mut hashes: Vec<SongHash> = inner.shared.iter().copied().collect();
        hashes.sort_unstable();
        hashes
    }

    /// Build the push sequence for the current intersection. An empty
    /// intersection is still announced as a single final chunk of length 0.
    pub fn build_shared_chunks(&self) -> Vec<SharedSongsChunkPacket> {
        let hashes = self.shared_hashes();
        if hashes.is_empty() {
            return vec![SharedSongsChunkPacket {
                is_first_chunk: true,
                is_final_chunk: true,
                hash_bytes: Vec::new(),
            }];
        }

        let chunk_count = hashes.len().div_ceil(HASHES_PER_CHUNK);
        hashes
            .chunks(HASHES_PER_CHUNK)
            .enumerate()
            .map(|(index, chunk)| {
                let mut bytes = Vec::with_capacity(chunk.len() * SONG_HASH_LEN);
                for hash in chunk {
                    bytes.extend_from_slice(hash);
                }
                SharedSongsChunkPacket {
                    is_first_chunk: index == 0,
                    is_final_chunk: index + 1 == chunk_count,
                    hash_bytes: bytes,
                }
            })
            .collect()
    }

    fn recompute(inner: &mut LibraryInner, events: &mut Vec<LibraryEvent>) {
        let mut iter = inner.libraries.values();
        let shared: HashSet<SongHash> = match iter.next() {
            None => HashSet::new(),
            Some(first) => iter.fold(first.clone(), |acc, library| {
                acc.intersection(library).copied().collect()
            }),
        };
        if shared != inner.shared {
            inner.shared = shared;
            events.push(LibraryEvent::SharedSongsChanged(inner.shared.len()));
        }
    }

    fn lock(&self) -> MutexGuard<'_, LibraryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
