//! Per-song score and replay collection.
//!
//! During gameplay the server gathers every player's end-of-song results,
//! the running band score, and the replay frame streams players upload.
//! Late joiners and spectators ask for a stored replay by song hash with a
//! `ReplayRequest`; the collector hands back each player's frames followed
//! by a completion marker.
//!
//! Collections are kept per song hash, newest first, with a bounded history
//! and a per-player cap on buffered replay bytes. State lives under one
//! mutex; reads hand out copies.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::packets::{BandScoreUpdatePacket, ReplayFramesPacket, ScoreResultsPacket};
use crate::protocol::types::PlayerId;

/// Finished songs retained for replay requests.
const MAX_TRACKED_SONGS: usize = 16;

/// Cap on buffered replay bytes per player per song.
pub const MAX_REPLAY_BYTES_PER_PLAYER: usize = 4 * 1024 * 1024;

/// One player's uploaded replay stream for one song.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayRecord {
    pub frame_count: u16,
    pub frames: Vec<u8>,
    pub complete: bool,
}

#[derive(Debug, Clone)]
struct SongCollection {
    song_hash: String,
    scores: HashMap<PlayerId, ScoreResultsPacket>,
    band_score: Option<BandScoreUpdatePacket>,
    replays: HashMap<PlayerId, ReplayRecord>,
}

impl SongCollection {
    fn new(song_hash: String) -> Self {
        Self {
            song_hash,
            scores: HashMap::new(),
            band_score: None,
            replays: HashMap::new(),
        }
    }
}

/// Collects score results and replay streams, one collection per song.
#[derive(Default)]
pub struct ScoreReplayCollector {
    /// Newest collection last; the last entry is the song in progress.
    songs: Mutex<Vec<SongCollection>>,
}

impl ScoreReplayCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a collection for the song that is about to start. An existing
    /// collection for the same hash is replaced; the history is bounded.
    pub fn begin_song(&self, song_hash: &str) {
        let mut songs = self.lock();
        songs.retain(|song| !song.song_hash.eq_ignore_ascii_case(song_hash));
        if songs.len() >= MAX_TRACKED_SONGS {
            songs.remove(0);
        }
        songs.push(SongCollection::new(song_hash.to_string()));
    }

    /// Record one player's end-of-song results for the current song.
    /// Returns `false` when no song is being collected.
    pub fn record_score(&self, packet: ScoreResultsPacket) -> bool {
        let mut songs = self.lock();
        let Some(current) = songs.last_mut() else {
            return false;
        };
        current.scores.insert(packet.player_id, packet);
        true
    }

    /// Track the latest running band score for the current song.
    pub fn record_band_score(&self, packet: BandScoreUpdatePacket) -> bool {
        let mut songs = self.lock();
        let Some(current) = songs.last_mut() else {
            return false;
        };
        current.band_score = Some(packet);
        true
    }

    /// Append one uploaded replay chunk to the current song. Frames past
    /// the per-player byte cap, or after completion, are dropped.
    pub fn append_replay(&self, packet: &ReplayFramesPacket) -> bool {
        let mut songs = self.lock();
        let Some(current) = songs.last_mut() else {
            return false;
        };
        let record = current.replays.entry(packet.player_id).or_default();
        if record.complete {
            return false;
        }
        if record.frames.len() + packet.frames.len() > MAX_REPLAY_BYTES_PER_PLAYER {
            tracing::warn!(
                player_id = %packet.player_id,
                "Replay stream exceeds the per-player cap; dropping frames"
            );
            return false;
        }
        record.frame_count = record.frame_count.saturating_add(packet.frame_count);
        record.frames.extend_from_slice(&packet.frames);
        true
    }

    /// Seal a player's replay stream for the current song.
    pub fn complete_replay(&self, player_id: PlayerId) -> bool {
        let mut songs = self.lock();
        let Some(current) = songs.last_mut() else {
            return false;
        };
        let record = current.replays.entry(player_id).or_default();
        record.complete = true;
        true
    }

    /// Completed replay streams for a song, one entry per player.
    pub fn replays_for(&self, song_hash: &str) -> Vec<(PlayerId, ReplayRecord)> {
        let songs = self.lock();
        let Some(song) = songs
            .iter()
            .find(|song| song.song_hash.eq_ignore_ascii_case(song_hash))
        else {
            return Vec::new();
        };
        let mut replays: Vec<(PlayerId, ReplayRecord)> = song
            .replays
            .iter()
            .filter(|(_, record)| record.complete)
            .map(|(player, record)| (*player, record.clone()))
            .collect();
        replays.sort_by_key(|(player, _)| *player);
        replays
    }

    /// Collected score results for a song.
    pub fn scores_for(&self, song_hash: &str) -> Vec<ScoreResultsPacket> {
        let songs = self.lock();
        songs
            .iter()
            .find(|song| song.song_hash.eq_ignore_ascii_case(song_hash))
            .map(|song| song.scores.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn band_score_for(&self, song_hash: &str) -> Option<BandScoreUpdatePacket> {
        let songs = self.lock();
        songs
            .iter()
            .find(|song| song.song_hash.eq_ignore_ascii_case(song_hash))
            .and_then(|song| song.band_score)
    }

    pub fn tracked_songs(&self) -> usize {
        self.lock().len()
    }

    /// Lobby teardown: forget everything.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SongCollection>> {
        self.songs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn score(player: PlayerId, points: u32) -> ScoreResultsPacket {
        ScoreResultsPacket {
            player_id: player,
            score: points,
            stars: 4,
            best_combo: 120,
            notes_hit: 900,
            notes_total: 1000,
        }
    }

    fn frames(player: PlayerId, count: u16, bytes: &[u8]) -> ReplayFramesPacket {
        ReplayFramesPacket {
            player_id: player,
            frame_count: count,
            frames: bytes.to_vec(),
        }
    }

    #[test]
    fn nothing_is_recorded_without_a_song() {
        let collector = ScoreReplayCollector::new();
        let player = Uuid::new_v4();
        assert!(!collector.record_score(score(player, 100)));
        assert!(!collector.append_replay(&frames(player, 1, &[1])));
        assert!(!collector.complete_replay(player));
    }

    #[test]
    fn scores_accumulate_per_player_with_latest_winning() {
        let collector = ScoreReplayCollector::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        collector.begin_song("hash-a");

        assert!(collector.record_score(score(a, 100)));
        assert!(collector.record_score(score(b, 200)));
        assert!(collector.record_score(score(a, 150)));

        let mut totals: Vec<u32> = collector
            .scores_for("HASH-A")
            .iter()
            .map(|s| s.score)
            .collect();
        totals.sort_unstable();
        assert_eq!(totals, vec![150, 200]);
    }

    #[test]
    fn band_score_keeps_the_latest_update() {
        let collector = ScoreReplayCollector::new();
        collector.begin_song("hash-a");
        collector.record_band_score(BandScoreUpdatePacket {
            total_score: 500,
            multiplier: 2,
        });
        collector.record_band_score(BandScoreUpdatePacket {
            total_score: 900,
            multiplier: 4,
        });
        let band = collector.band_score_for("hash-a").unwrap();
        assert_eq!(band.total_score, 900);
        assert_eq!(band.multiplier, 4);
    }

    #[test]
    fn replay_streams_chunk_and_seal() {
        let collector = ScoreReplayCollector::new();
        let player = Uuid::new_v4();
        collector.begin_song("hash-a");

        assert!(collector.append_replay(&frames(player, 2, &[1, 2])));
        assert!(collector.append_replay(&frames(player, 3, &[3, 4, 5])));
        // Incomplete streams are not served.
        assert!(collector.replays_for("hash-a").is_empty());

        assert!(collector.complete_replay(player));
        let replays = collector.replays_for("hash-a");
        assert_eq!(replays.len(), 1);
        assert_eq!(replays[0].0, player);
        assert_eq!(replays[0].1.frame_count, 5);
        assert_eq!(replays[0].1.frames, vec![1, 2, 3, 4, 5]);

        // Frames after completion are dropped.
        assert!(!collector.append_replay(&frames(player, 1, &[9])));
        assert_eq!(collector.replays_for("hash-a")[0].1.frames.len(), 5);
    }

    #[test]
    fn replay_byte_cap_is_enforced() {
        let collector = ScoreReplayCollector::new();
        let player = Uuid::new_v4();
        collector.begin_song("hash-a");

        let big = vec![0u8; MAX_REPLAY_BYTES_PER_PLAYER];
        assert!(collector.append_replay(&frames(player, 1, &big)));
        assert!(!collector.append_replay(&frames(player, 1, &[0])));
    }

    #[test]
    fn restarting_a_song_replaces_its_collection() {
        let collector = ScoreReplayCollector::new();
        let player = Uuid::new_v4();
        collector.begin_song("hash-a");
        collector.record_score(score(player, 100));

        collector.begin_song("hash-a");
        assert!(collector.scores_for("hash-a").is_empty());
        assert_eq!(collector.tracked_songs(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let collector = ScoreReplayCollector::new();
        for i in 0..MAX_TRACKED_SONGS + 4 {
            collector.begin_song(&format!("hash-{i}"));
        }
        assert_eq!(collector.tracked_songs(), MAX_TRACKED_SONGS);
        // The oldest collections were evicted; the newest still records.
        let player = Uuid::new_v4();
        collector.record_score(score(player, 1));
        let newest = format!("hash-{}", MAX_TRACKED_SONGS + 3);
        assert_eq!(collector.scores_for(&newest).len(), 1);
        assert!(collector.scores_for("hash-0").is_empty());
    }

    #[test]
    fn clear_forgets_everything() {
        let collector = ScoreReplayCollector::new();
        collector.begin_song("hash-a");
        collector.clear();
        assert_eq!(collector.tracked_songs(), 0);
    }
}
