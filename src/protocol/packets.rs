//! Typed packet payloads.
//!
//! Control and lobby traffic travels as JSON envelope payloads; hot-path
//! gameplay traffic and large blobs travel as binary frames. Every binary
//! packet must round-trip bit-exact through its builder and parser.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::envelope::PacketType;
use super::types::{PlayerId, PlayerRole, SessionId, SetlistEntry, SONG_HASH_LEN};
use super::wire::{WireError, WireReader, WireWriter};

// ===========================================================================
// JSON envelope payloads
// ===========================================================================

/// Opening packet of every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub client_version: String,
    pub player_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Server verdict on a handshake. `session_id` is nil when rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub session_id: SessionId,
}

/// Keepalive; carries no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeartbeatPayload {}

/// Host is tearing the lobby down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDisconnectPayload {
    pub reason: String,
}

/// Player readiness toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReadyPayload {
    pub ready: bool,
}

/// Countdown announcement preceding the lobby-state broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameplayCountdownPayload {
    pub seconds: u32,
}

/// Role reassignment notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChangePayload {
    pub session_id: SessionId,
    pub role: PlayerRole,
}

/// Queue a song onto the setlist; `added_by` is stamped server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetlistAddPayload {
    pub song_hash: String,
    pub song_name: String,
    pub song_artist: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetlistRemovePayload {
    pub song_hash: String,
}

/// Full setlist snapshot in the pipe-delimited form, for late joiners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetlistSyncPayload {
    pub serialized: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetlistReplacePayload {
    pub entries: Vec<SetlistEntry>,
}

// ===========================================================================
// Binary packets
// ===========================================================================

/// A packet with a fixed binary layout. `encode` emits the full frame
/// including the leading type ordinal; `decode` verifies it.
pub trait BinaryPacket: Sized {
    const PACKET_TYPE: PacketType;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError>;
    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError>;

    fn encode(&self) -> Result<Bytes, WireError> {
        let mut writer = WireWriter::with_type(Self::PACKET_TYPE);
        self.write_body(&mut writer)?;
        Ok(writer.finish())
    }

    fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(frame);
        reader.expect_type(Self::PACKET_TYPE)?;
        Self::read_body(&mut reader)
    }
}

/// Richer handshake variant: one transport connection, multiple local
/// profiles. The first identity is the acting player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuthPacket {
    pub player_id: PlayerId,
    pub display_name: String,
    pub identities: Vec<(PlayerId, String)>,
}

impl BinaryPacket for ClientAuthPacket {
    const PACKET_TYPE: PacketType = PacketType::ClientAuth;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_uuid(self.player_id);
        writer.put_str(&self.display_name)?;
        writer.put_u8(self.identities.len() as u8);
        for (id, name) in &self.identities {
            writer.put_uuid(*id);
            writer.put_str(name)?;
        }
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let player_id = reader.get_uuid()?;
        let display_name = reader.get_str()?;
        let count = reader.get_u8()? as usize;
        let mut identities = Vec::with_capacity(count);
        for _ in 0..count {
            let id = reader.get_uuid()?;
            let name = reader.get_str()?;
            identities.push((id, name));
        }
        Ok(Self {
            player_id,
            display_name,
            identities,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuthResponsePacket {
    pub accepted: bool,
    pub reason: String,
    pub session_id: SessionId,
}

impl BinaryPacket for ClientAuthResponsePacket {
    const PACKET_TYPE: PacketType = PacketType::ClientAuthResponse;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_bool(self.accepted);
        writer.put_str(&self.reason)?;
        writer.put_uuid(self.session_id);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            accepted: reader.get_bool()?,
            reason: reader.get_str()?,
            session_id: reader.get_uuid()?,
        })
    }
}

/// Peer-relayed readiness mirror used on the gameplay plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobbyReadyStatePacket {
    pub player_id: PlayerId,
    pub is_ready: bool,
}

impl BinaryPacket for LobbyReadyStatePacket {
    const PACKET_TYPE: PacketType = PacketType::LobbyReadyState;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_uuid(self.player_id);
        writer.put_bool(self.is_ready);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            player_id: reader.get_uuid()?,
            is_ready: reader.get_bool()?,
        })
    }
}

/// Opaque per-player preset blob, relayed untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerPresetSyncPacket {
    pub player_id: PlayerId,
    pub blob: Vec<u8>,
}

impl BinaryPacket for PlayerPresetSyncPacket {
    const PACKET_TYPE: PacketType = PacketType::PlayerPresetSync;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_uuid(self.player_id);
        writer.put_blob(&self.blob)
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            player_id: reader.get_uuid()?,
            blob: reader.get_blob()?.to_vec(),
        })
    }
}

/// One chunk of a song-hash library transfer, in either direction.
///
/// The hash blob is a concatenation of fixed-width 20-byte records; the
/// parser tolerates a trailing partial record by ignoring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongLibraryChunkPacket {
    pub is_first_chunk: bool,
    pub is_final_chunk: bool,
    pub hash_bytes: Vec<u8>,
}

impl SongLibraryChunkPacket {
    /// Split the blob into whole 20-byte hashes, dropping any partial tail.
    pub fn hashes(&self) -> impl Iterator<Item = crate::protocol::types::SongHash> + '_ {
        self.hash_bytes.chunks_exact(SONG_HASH_LEN).map(|chunk| {
            let mut hash = [0u8; SONG_HASH_LEN];
            hash.copy_from_slice(chunk);
            hash
        })
    }
}

impl BinaryPacket for SongLibraryChunkPacket {
    const PACKET_TYPE: PacketType = PacketType::SongLibraryChunk;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_bool(self.is_first_chunk);
        writer.put_bool(self.is_final_chunk);
        writer.put_blob(&self.hash_bytes)
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            is_first_chunk: reader.get_bool()?,
            is_final_chunk: reader.get_bool()?,
            hash_bytes: reader.get_blob()?.to_vec(),
        })
    }
}

/// Server push of the live library intersection. Same layout as the upload
/// chunk; an empty intersection is still one final chunk of length zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSongsChunkPacket {
    pub is_first_chunk: bool,
    pub is_final_chunk: bool,
    pub hash_bytes: Vec<u8>,
}

impl BinaryPacket for SharedSongsChunkPacket {
    const PACKET_TYPE: PacketType = PacketType::SharedSongsChunk;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_bool(self.is_first_chunk);
        writer.put_bool(self.is_final_chunk);
        writer.put_blob(&self.hash_bytes)
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            is_first_chunk: reader.get_bool()?,
            is_final_chunk: reader.get_bool()?,
            hash_bytes: reader.get_blob()?.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedSongsSyncStatePacket {
    pub complete: bool,
    pub shared_count: u32,
}

impl BinaryPacket for SharedSongsSyncStatePacket {
    const PACKET_TYPE: PacketType = PacketType::SharedSongsSyncState;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_bool(self.complete);
        writer.put_u32(self.shared_count);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            complete: reader.get_bool()?,
            shared_count: reader.get_u32()?,
        })
    }
}

/// Opaque gameplay snapshot, relayed untouched to the other players.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameplayStatePacket {
    pub player_id: PlayerId,
    pub snapshot: Vec<u8>,
}

impl BinaryPacket for GameplayStatePacket {
    const PACKET_TYPE: PacketType = PacketType::GameplayState;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_uuid(self.player_id);
        writer.put_blob(&self.snapshot)
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            player_id: reader.get_uuid()?,
            snapshot: reader.get_blob()?.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameplayStartPacket {
    pub song_hash: String,
    pub start_at: f64,
}

impl BinaryPacket for GameplayStartPacket {
    const PACKET_TYPE: PacketType = PacketType::GameplayStart;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_str(&self.song_hash)?;
        writer.put_f64(self.start_at);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            song_hash: reader.get_str()?,
            start_at: reader.get_f64()?,
        })
    }
}

/// Shared gameplay clock beat from the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameplayClockSyncPacket {
    pub host_time: f64,
    pub song_time: f64,
}

impl BinaryPacket for GameplayClockSyncPacket {
    const PACKET_TYPE: PacketType = PacketType::GameplayClockSync;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_f64(self.host_time);
        writer.put_f64(self.song_time);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            host_time: reader.get_f64()?,
            song_time: reader.get_f64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRequestPacket {
    pub song_hash: String,
}

impl BinaryPacket for ReplayRequestPacket {
    const PACKET_TYPE: PacketType = PacketType::ReplayRequest;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_str(&self.song_hash)
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            song_hash: reader.get_str()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFramesPacket {
    pub player_id: PlayerId,
    pub frame_count: u16,
    pub frames: Vec<u8>,
}

impl BinaryPacket for ReplayFramesPacket {
    const PACKET_TYPE: PacketType = PacketType::ReplayFrames;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_uuid(self.player_id);
        writer.put_u16(self.frame_count);
        writer.put_blob(&self.frames)
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            player_id: reader.get_uuid()?,
            frame_count: reader.get_u16()?,
            frames: reader.get_blob()?.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayCompletePacket {
    pub player_id: PlayerId,
}

impl BinaryPacket for ReplayCompletePacket {
    const PACKET_TYPE: PacketType = PacketType::ReplayComplete;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_uuid(self.player_id);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            player_id: reader.get_uuid()?,
        })
    }
}

/// End-of-song per-player results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreResultsPacket {
    pub player_id: PlayerId,
    pub score: u32,
    pub stars: u8,
    pub best_combo: u16,
    pub notes_hit: u32,
    pub notes_total: u32,
}

impl BinaryPacket for ScoreResultsPacket {
    const PACKET_TYPE: PacketType = PacketType::ScoreResults;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_uuid(self.player_id);
        writer.put_u32(self.score);
        writer.put_u8(self.stars);
        writer.put_u16(self.best_combo);
        writer.put_u32(self.notes_hit);
        writer.put_u32(self.notes_total);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            player_id: reader.get_uuid()?,
            score: reader.get_u32()?,
            stars: reader.get_u8()?,
            best_combo: reader.get_u16()?,
            notes_hit: reader.get_u32()?,
            notes_total: reader.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandScoreUpdatePacket {
    pub total_score: u32,
    pub multiplier: u8,
}

impl BinaryPacket for BandScoreUpdatePacket {
    const PACKET_TYPE: PacketType = PacketType::BandScoreUpdate;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_u32(self.total_score);
        writer.put_u8(self.multiplier);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            total_score: reader.get_u32()?,
            multiplier: reader.get_u8()?,
        })
    }
}

/// A player finished a unison phrase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnisonPhraseHitPacket {
    pub player_id: PlayerId,
    pub band_id: u8,
    pub phrase_time: f64,
    pub phrase_end_time: f64,
}

impl BinaryPacket for UnisonPhraseHitPacket {
    const PACKET_TYPE: PacketType = PacketType::UnisonPhraseHit;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_uuid(self.player_id);
        writer.put_u8(self.band_id);
        writer.put_f64(self.phrase_time);
        writer.put_f64(self.phrase_end_time);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            player_id: reader.get_uuid()?,
            band_id: reader.get_u8()?,
            phrase_time: reader.get_f64()?,
            phrase_end_time: reader.get_f64()?,
        })
    }
}

/// The whole band completed a phrase; awarded at most once per phrase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnisonBonusAwardPacket {
    pub band_id: u8,
    pub phrase_time: f64,
}

impl BinaryPacket for UnisonBonusAwardPacket {
    const PACKET_TYPE: PacketType = PacketType::UnisonBonusAward;

    fn write_body(&self, writer: &mut WireWriter) -> Result<(), WireError> {
        writer.put_u8(self.band_id);
        writer.put_f64(self.phrase_time);
        Ok(())
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            band_id: reader.get_u8()?,
            phrase_time: reader.get_f64()?,
        })
    }
}
