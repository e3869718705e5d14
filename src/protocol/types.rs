//! Identifier aliases and shared protocol data types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated logical player on a server; spans one transport connection.
pub type SessionId = Uuid;
/// Persistent player profile identifier carried by the binary auth variant.
pub type PlayerId = Uuid;
/// Hosted game room identifier.
pub type LobbyId = Uuid;

/// Song fingerprints are fixed-width 20-byte hashes.
pub const SONG_HASH_LEN: usize = 20;
pub type SongHash = [u8; SONG_HASH_LEN];

/// Role of a session inside a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    Host,
    Member,
    Spectator,
}

impl PlayerRole {
    /// Spectators sit outside the active roster: they never hold a ready
    /// flag and never count toward lobby capacity.
    pub fn is_spectator(self) -> bool {
        matches!(self, PlayerRole::Spectator)
    }
}

/// Lobby room status, recomputed after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Idle,
    SelectingSong,
    ReadyToPlay,
    InCountdown,
}

/// One player slot inside a song selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionAssignment {
    pub player_id: SessionId,
    pub instrument: String,
    pub difficulty: String,
}

/// The current song pick plus per-player instrument assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongSelection {
    pub song_id: String,
    pub assignments: Vec<SelectionAssignment>,
}

/// A member of the lobby roster as mirrored by the lobby state manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyPlayer {
    pub session_id: SessionId,
    pub display_name: String,
    pub role: PlayerRole,
    pub is_ready: bool,
}

/// One queued song in the setlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetlistEntry {
    pub song_hash: String,
    pub song_name: String,
    pub song_artist: String,
    pub added_by: String,
}

/// Render a song hash as lowercase hex for logs and JSON payloads.
pub fn hash_to_hex(hash: &SongHash) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(SONG_HASH_LEN * 2);
    for byte in hash {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
