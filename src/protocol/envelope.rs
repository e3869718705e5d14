//! JSON packet envelope and the type-ordinal registry.
//!
//! Two framings share every channel. A frame whose first byte is `{` or `[`
//! is a JSON envelope `{type, payload, version}`; anything else is a binary
//! frame whose first byte is the packet-type ordinal. Ordinals are restricted
//! to `1..=99` so they can never collide with `{` (0x7B) or `[` (0x5B).

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// First byte of a JSON object frame.
const JSON_OBJECT_BYTE: u8 = b'{';
/// First byte of a JSON array frame.
const JSON_ARRAY_BYTE: u8 = b'[';

/// Stable one-byte packet-type ordinals. These never change across protocol
/// versions; new types extend the reserved ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    // Handshake and connection lifecycle (1-9)
    HandshakeRequest = 1,
    HandshakeResponse = 2,
    Heartbeat = 3,
    HostDisconnect = 4,
    ClientAuth = 5,
    ClientAuthResponse = 6,
    // Lobby room state (10-16)
    LobbyState = 10,
    SetReady = 11,
    SongSelection = 12,
    GameplayCountdown = 13,
    LobbyReadyState = 14,
    PlayerPresetSync = 15,
    RoleChange = 16,
    // Setlist and song library (20-27)
    SetlistAdd = 20,
    SetlistRemove = 21,
    SetlistClear = 22,
    SetlistSync = 23,
    SetlistReplace = 24,
    SongLibraryChunk = 25,
    SharedSongsChunk = 26,
    SharedSongsSyncState = 27,
    // Gameplay (30-39)
    GameplayState = 30,
    GameplayStart = 31,
    GameplayClockSync = 32,
    // Replay sync (40-42)
    ReplayRequest = 40,
    ReplayFrames = 41,
    ReplayComplete = 42,
    // Scores (50-51)
    ScoreResults = 50,
    BandScoreUpdate = 51,
    // Unison phrases (60-61)
    UnisonPhraseHit = 60,
    UnisonBonusAward = 61,
}

impl PacketType {
    pub const ALL: [PacketType; 31] = [
        PacketType::HandshakeRequest,
        PacketType::HandshakeResponse,
        PacketType::Heartbeat,
        PacketType::HostDisconnect,
        PacketType::ClientAuth,
        PacketType::ClientAuthResponse,
        PacketType::LobbyState,
        PacketType::SetReady,
        PacketType::SongSelection,
        PacketType::GameplayCountdown,
        PacketType::LobbyReadyState,
        PacketType::PlayerPresetSync,
        PacketType::RoleChange,
        PacketType::SetlistAdd,
        PacketType::SetlistRemove,
        PacketType::SetlistClear,
        PacketType::SetlistSync,
        PacketType::SetlistReplace,
        PacketType::SongLibraryChunk,
        PacketType::SharedSongsChunk,
        PacketType::SharedSongsSyncState,
        PacketType::GameplayState,
        PacketType::GameplayStart,
        PacketType::GameplayClockSync,
        PacketType::ReplayRequest,
        PacketType::ReplayFrames,
        PacketType::ReplayComplete,
        PacketType::ScoreResults,
        PacketType::BandScoreUpdate,
        PacketType::UnisonPhraseHit,
        PacketType::UnisonBonusAward,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PacketType::HandshakeRequest => "HandshakeRequest",
            PacketType::HandshakeResponse => "HandshakeResponse",
            PacketType::Heartbeat => "Heartbeat",
            PacketType::HostDisconnect => "HostDisconnect",
            PacketType::ClientAuth => "ClientAuth",
            PacketType::ClientAuthResponse => "ClientAuthResponse",
            PacketType::LobbyState => "LobbyState",
            PacketType::SetReady => "SetReady",
            PacketType::SongSelection => "SongSelection",
            PacketType::GameplayCountdown => "GameplayCountdown",
            PacketType::LobbyReadyState => "LobbyReadyState",
            PacketType::PlayerPresetSync => "PlayerPresetSync",
            PacketType::RoleChange => "RoleChange",
            PacketType::SetlistAdd => "SetlistAdd",
            PacketType::SetlistRemove => "SetlistRemove",
            PacketType::SetlistClear => "SetlistClear",
            PacketType::SetlistSync => "SetlistSync",
            PacketType::SetlistReplace => "SetlistReplace",
            PacketType::SongLibraryChunk => "SongLibraryChunk",
            PacketType::SharedSongsChunk => "SharedSongsChunk",
            PacketType::SharedSongsSyncState => "SharedSongsSyncState",
            PacketType::GameplayState => "GameplayState",
            PacketType::GameplayStart => "GameplayStart",
            PacketType::GameplayClockSync => "GameplayClockSync",
            PacketType::ReplayRequest => "ReplayRequest",
            PacketType::ReplayFrames => "ReplayFrames",
            PacketType::ReplayComplete => "ReplayComplete",
            PacketType::ScoreResults => "ScoreResults",
            PacketType::BandScoreUpdate => "BandScoreUpdate",
            PacketType::UnisonPhraseHit => "UnisonPhraseHit",
            PacketType::UnisonBonusAward => "UnisonBonusAward",
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| *ty as u8 == ordinal)
    }

    /// Case-insensitive name lookup, matching the envelope contract.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for PacketType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for PacketType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PacketTypeVisitor;

        impl Visitor<'_> for PacketTypeVisitor {
            type Value = PacketType;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a packet type name or ordinal")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                u8::try_from(value)
                    .ok()
                    .and_then(PacketType::from_ordinal)
                    .ok_or_else(|| E::custom(format!("unknown packet type ordinal {value}")))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                let unsigned = u64::try_from(value)
                    .map_err(|_| E::custom(format!("unknown packet type ordinal {value}")))?;
                self.visit_u64(unsigned)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                PacketType::from_name(value)
                    .ok_or_else(|| E::custom(format!("unknown packet type `{value}`")))
            }
        }

        deserializer.deserialize_any(PacketTypeVisitor)
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("envelope is missing the `type` field")]
    MissingType,
    #[error("unknown packet type `{0}`")]
    UnknownType(serde_json::Value),
    #[error("frame is not a JSON envelope")]
    NotAnEnvelope,
}

/// Control-plane packet envelope. The `type` field is accepted as either the
/// case-insensitive enum name or the numeric ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub packet_type: PacketType,
    pub payload: serde_json::Value,
    pub version: String,
}

/// Raw mirror used for decoding so that a syntactically-valid-but-unknown
/// `type` can be distinguished from a malformed document.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    packet_type: Option<serde_json::Value>,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    version: String,
}

impl Envelope {
    pub fn new<T: Serialize>(
        packet_type: PacketType,
        payload: &T,
        version: &str,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            packet_type,
            payload: serde_json::to_value(payload)?,
            version: version.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Result<bytes::Bytes, serde_json::Error> {
        Ok(bytes::Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Decode a JSON frame. `UnknownType` is returned for a well-formed
    /// envelope whose `type` does not resolve; the dispatcher treats that as
    /// a non-event rather than a decode failure.
    pub fn from_slice(frame: &[u8]) -> Result<Self, EnvelopeError> {
        if !is_envelope_frame(frame) {
            return Err(EnvelopeError::NotAnEnvelope);
        }
        let raw: RawEnvelope = serde_json::from_slice(frame)?;
        let type_value = raw.packet_type.ok_or(EnvelopeError::MissingType)?;
        let packet_type = resolve_type(&type_value)
            .ok_or_else(|| EnvelopeError::UnknownType(type_value.clone()))?;
        Ok(Self {
            packet_type,
            payload: raw.payload,
            version: raw.version,
        })
    }
}

fn resolve_type(value: &serde_json::Value) -> Option<PacketType> {
    match value {
        serde_json::Value::String(name) => PacketType::from_name(name),
        serde_json::Value::Number(number) => number
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(PacketType::from_ordinal),
        _ => None,
    }
}

/// True when the first byte marks a JSON envelope rather than a binary frame.
pub fn is_envelope_frame(frame: &[u8]) -> bool {
    matches!(
        frame.first(),
        Some(&JSON_OBJECT_BYTE) | Some(&JSON_ARRAY_BYTE)
    )
}
