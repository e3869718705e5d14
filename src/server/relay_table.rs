//! Binary frame handling: the server-side relay table plus the packets the
//! server itself consumes or answers.
//!
//! Relay behavior by type: {GameplayState, UnisonPhraseHit, ScoreResults,
//! LobbyReadyState, PlayerPresetSync, BandScoreUpdate} go to every *other*
//! authenticated client on the channel they arrived on; {UnisonBonusAward}
//! is broadcast to everyone. Score and unison frames are also fed to their
//! server-side accounting, replay frames go to the collector, a
//! `ReplayRequest` is answered from it, and the shared-clock frames
//! ({GameplayClockSync, GameplayStart}) are honored only from the host.
//! JSON envelopes never reach this path.

use std::sync::Arc;

use uuid::Uuid;

use super::{upgrade, GameServer};
use crate::protocol::dispatcher::PacketContext;
use crate::protocol::envelope::PacketType;
use crate::protocol::packets::{
    BandScoreUpdatePacket, BinaryPacket, ClientAuthPacket, ClientAuthResponsePacket,
    ReplayCompletePacket, ReplayFramesPacket, ReplayRequestPacket, ScoreResultsPacket,
    SongLibraryChunkPacket, UnisonBonusAwardPacket, UnisonPhraseHitPacket,
};
use crate::protocol::types::PlayerRole;
use crate::protocol::validation::validate_player_name;
use crate::session::manager::SessionError;
use crate::transport::DeliveryChannel;

pub(super) fn install(server: &Arc<GameServer>) {
    let weak = Arc::downgrade(server);
    server.dispatcher().set_binary_sink(move |frame, ctx| {
        let Some(server) = upgrade(&weak) else {
            return;
        };
        handle_binary(&server, frame, ctx);
    });
}

fn handle_binary(server: &GameServer, frame: &[u8], ctx: &PacketContext) {
    let Some(packet_type) = frame.first().copied().and_then(PacketType::from_ordinal) else {
        tracing::trace!(
            connection_id = ctx.connection.id(),
            "Dropping binary frame with unknown ordinal"
        );
        return;
    };

    // The binary auth variant is the only frame a pending connection may
    // send; everything else requires an authenticated sender.
    if packet_type == PacketType::ClientAuth {
        handle_client_auth(server, frame, ctx);
        return;
    }
    if !server.connections().is_authenticated(ctx.connection.id()) {
        tracing::debug!(
            connection_id = ctx.connection.id(),
            %packet_type,
            "Dropping binary frame from unauthenticated connection"
        );
        return;
    }

    match packet_type {
        PacketType::SongLibraryChunk => handle_library_chunk(server, frame, ctx),
        PacketType::UnisonPhraseHit => handle_unison_hit(server, frame, ctx),
        PacketType::UnisonBonusAward => {
            // Award frames go to everyone, sender included.
            server.connections().to_all(frame, ctx.channel);
        }
        PacketType::ScoreResults => handle_score_results(server, frame, ctx),
        PacketType::BandScoreUpdate => handle_band_score(server, frame, ctx),
        PacketType::ReplayFrames => handle_replay_frames(server, frame, ctx),
        PacketType::ReplayComplete => handle_replay_complete(server, frame, ctx),
        PacketType::ReplayRequest => handle_replay_request(server, frame, ctx),
        PacketType::GameplayClockSync | PacketType::GameplayStart => {
            // Only the host owns the shared gameplay clock.
            if sender_is_host(server, ctx) {
                server
                    .connections()
                    .to_all_except(ctx.connection.id(), frame, ctx.channel);
            } else {
                tracing::debug!(
                    connection_id = ctx.connection.id(),
                    %packet_type,
                    "Dropping clock frame from a non-host sender"
                );
            }
        }
        PacketType::GameplayState
        | PacketType::LobbyReadyState
        | PacketType::PlayerPresetSync => {
            server
                .connections()
                .to_all_except(ctx.connection.id(), frame, ctx.channel);
        }
        _ => {
            tracing::trace!(%packet_type, "Binary frame not in the relay table; ignored");
        }
    }
}

fn sender_is_host(server: &GameServer, ctx: &PacketContext) -> bool {
    server
        .sessions()
        .get_by_connection(ctx.connection.id())
        .and_then(|record| server.lobby().player(record.session_id))
        .is_some_and(|player| player.role == PlayerRole::Host)
}

/// Richer handshake: persistent player id plus local profiles on one
/// transport connection. Carries no version or password fields; the name
/// rules and capacity checks still apply.
fn handle_client_auth(server: &GameServer, frame: &[u8], ctx: &PacketContext) {
    let packet = match ClientAuthPacket::decode(frame) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::warn!(
                connection_id = ctx.connection.id(),
                error = %err,
                "Malformed client auth frame"
            );
            return;
        }
    };

    let rejection = |reason: String| ClientAuthResponsePacket {
        accepted: false,
        reason,
        session_id: Uuid::nil(),
    };

    let response = if let Err(reason) =
        validate_player_name(&packet.display_name, server.protocol_config())
    {
        rejection(reason)
    } else {
        match server
            .sessions()
            .try_create_session(ctx.connection.clone(), packet.display_name.trim())
        {
            Ok(record) => {
                server.connections().promote(record.connection_id);
                server
                    .connections()
                    .bind_player(packet.player_id, record.connection_id);
                ClientAuthResponsePacket {
                    accepted: true,
                    reason: String::new(),
                    session_id: record.session_id,
                }
            }
            Err(SessionError::AlreadyRegistered) => {
                rejection("Connection already has a session".to_string())
            }
            Err(SessionError::ServerFull) => rejection("Server is full".to_string()),
        }
    };

    let accepted = response.accepted;
    let session_id = response.session_id;
    if let Ok(reply) = response.encode() {
        let _ = ctx
            .connection
            .send(&reply, DeliveryChannel::ReliableOrdered);
    }
    if !accepted {
        if server.handshake().disconnect_on_reject() {
            ctx.connection.disconnect("authentication rejected");
        }
        return;
    }

    match server.lobby().join(session_id, packet.display_name.trim()) {
        Ok(events) => server.publish_lobby_events(&events),
        Err(err) => {
            tracing::warn!(%session_id, error = %err, "Authenticated session could not join the lobby");
            server.sessions().remove(&session_id);
            ctx.connection.disconnect("lobby is full");
        }
    }
}

fn handle_library_chunk(server: &GameServer, frame: &[u8], ctx: &PacketContext) {
    let packet = match SongLibraryChunkPacket::decode(frame) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::warn!(
                connection_id = ctx.connection.id(),
                error = %err,
                "Malformed song library chunk"
            );
            return;
        }
    };
    let Some(record) = server.sessions().get_by_connection(ctx.connection.id()) else {
        return;
    };

    let events = server.shared_library().ingest_chunk(
        record.session_id,
        packet.is_first_chunk,
        packet.is_final_chunk,
        &packet.hash_bytes,
    );
    server.publish_library_events(&events);
}

/// Phrase hits are both relayed to the other players and accounted
/// server-side; a completed phrase broadcasts the bonus award once.
fn handle_unison_hit(server: &GameServer, frame: &[u8], ctx: &PacketContext) {
    server
        .connections()
        .to_all_except(ctx.connection.id(), frame, ctx.channel);

    let packet = match UnisonPhraseHitPacket::decode(frame) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::warn!(
                connection_id = ctx.connection.id(),
                error = %err,
                "Malformed unison phrase hit"
            );
            return;
        }
    };

    let awarded = server.unison().record_phrase_hit(
        packet.player_id,
        packet.band_id,
        packet.phrase_time,
        packet.phrase_end_time,
    );
    if awarded {
        let award = UnisonBonusAwardPacket {
            band_id: packet.band_id,
            phrase_time: packet.phrase_time,
        };
        if let Ok(frame) = award.encode() {
            server
                .connections()
                .to_all(&frame, DeliveryChannel::ReliableOrdered);
        }
    }
}

/// End-of-song results are relayed to the other players and kept by the
/// collector for the current song.
fn handle_score_results(server: &GameServer, frame: &[u8], ctx: &PacketContext) {
    server
        .connections()
        .to_all_except(ctx.connection.id(), frame, ctx.channel);

    match ScoreResultsPacket::decode(frame) {
        Ok(packet) => {
            server.collector().record_score(packet);
        }
        Err(err) => {
            tracing::warn!(
                connection_id = ctx.connection.id(),
                error = %err,
                "Malformed score results"
            );
        }
    }
}

fn handle_band_score(server: &GameServer, frame: &[u8], ctx: &PacketContext) {
    server
        .connections()
        .to_all_except(ctx.connection.id(), frame, ctx.channel);

    match BandScoreUpdatePacket::decode(frame) {
        Ok(packet) => {
            server.collector().record_band_score(packet);
        }
        Err(err) => {
            tracing::warn!(
                connection_id = ctx.connection.id(),
                error = %err,
                "Malformed band score update"
            );
        }
    }
}

/// Replay uploads are collected, not relayed; spectators and late joiners
/// pull them on demand with a `ReplayRequest`.
fn handle_replay_frames(server: &GameServer, frame: &[u8], ctx: &PacketContext) {
    match ReplayFramesPacket::decode(frame) {
        Ok(packet) => {
            server.collector().append_replay(&packet);
        }
        Err(err) => {
            tracing::warn!(
                connection_id = ctx.connection.id(),
                error = %err,
                "Malformed replay frames"
            );
        }
    }
}

fn handle_replay_complete(server: &GameServer, frame: &[u8], ctx: &PacketContext) {
    match ReplayCompletePacket::decode(frame) {
        Ok(packet) => {
            server.collector().complete_replay(packet.player_id);
        }
        Err(err) => {
            tracing::warn!(
                connection_id = ctx.connection.id(),
                error = %err,
                "Malformed replay complete"
            );
        }
    }
}

/// Answer a replay request from the collector: every sealed stream for the
/// song, each followed by its completion marker, sent only to the asker.
fn handle_replay_request(server: &GameServer, frame: &[u8], ctx: &PacketContext) {
    let packet = match ReplayRequestPacket::decode(frame) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::warn!(
                connection_id = ctx.connection.id(),
                error = %err,
                "Malformed replay request"
            );
            return;
        }
    };

    let replays = server.collector().replays_for(&packet.song_hash);
    tracing::debug!(
        song_hash = %packet.song_hash,
        streams = replays.len(),
        connection_id = ctx.connection.id(),
        "Serving replay request"
    );
    for (player_id, record) in replays {
        let frames = ReplayFramesPacket {
            player_id,
            frame_count: record.frame_count,
            frames: record.frames,
        };
        if let Ok(reply) = frames.encode() {
            let _ = ctx
                .connection
                .send(&reply, DeliveryChannel::ReliableOrdered);
        }
        if let Ok(done) = (ReplayCompletePacket { player_id }).encode() {
            let _ = ctx
                .connection
                .send(&done, DeliveryChannel::ReliableOrdered);
        }
    }
}
