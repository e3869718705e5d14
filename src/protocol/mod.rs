//! Wire protocol: envelope + binary framings, typed payloads, and the
//! inbound packet dispatcher.
//!
//! # Module structure
//!
//! - [`types`]: identifier aliases and shared data types
//! - [`wire`]: big-endian binary primitives
//! - [`envelope`]: JSON envelope and the packet-type registry
//! - [`packets`]: typed payloads for both framings
//! - [`dispatcher`]: routes inbound frames to typed handlers
//! - [`validation`]: player-name rules

pub mod dispatcher;
pub mod envelope;
pub mod packets;
pub mod types;
pub mod validation;
pub mod wire;

pub use dispatcher::{DispatchError, EndpointRole, PacketContext, PacketDispatcher};

pub use envelope::{is_envelope_frame, Envelope, EnvelopeError, PacketType};

pub use packets::{
    BandScoreUpdatePacket, BinaryPacket, ClientAuthPacket, ClientAuthResponsePacket,
    GameplayClockSyncPacket, GameplayCountdownPayload, GameplayStartPacket, GameplayStatePacket,
    HandshakeRequest, HandshakeResponse, HeartbeatPayload, HostDisconnectPayload,
    LobbyReadyStatePacket, PlayerPresetSyncPacket, ReplayCompletePacket, ReplayFramesPacket,
    ReplayRequestPacket, RoleChangePayload, ScoreResultsPacket, SetReadyPayload,
    SetlistAddPayload, SetlistRemovePayload, SetlistReplacePayload, SetlistSyncPayload,
    SharedSongsChunkPacket, SharedSongsSyncStatePacket, SongLibraryChunkPacket,
    UnisonBonusAwardPacket, UnisonPhraseHitPacket,
};

pub use types::{
    hash_to_hex, LobbyId, LobbyPlayer, LobbyStatus, PlayerId, PlayerRole, SelectionAssignment,
    SessionId, SetlistEntry, SongHash, SongSelection, SONG_HASH_LEN,
};

pub use validation::validate_player_name;

pub use wire::{WireError, WireReader, WireWriter};
