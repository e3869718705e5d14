//! Envelope packet handlers.
//!
//! Registered once at server construction; each closure holds a weak server
//! handle so the dispatcher inside the server never keeps it alive.

use std::sync::{Arc, Weak};

use anyhow::Context as _;

use super::{upgrade, GameServer};
use crate::protocol::envelope::PacketType;
use crate::protocol::packets::{
    GameplayCountdownPayload, HandshakeRequest, HeartbeatPayload, HostDisconnectPayload,
    RoleChangePayload, SetReadyPayload, SetlistAddPayload, SetlistRemovePayload,
    SetlistReplacePayload, SetlistSyncPayload,
};
use crate::protocol::types::{PlayerRole, SetlistEntry, SongSelection};
use crate::session::manager::SessionRecord;

pub(super) fn install(server: &Arc<GameServer>) {
    let weak = Arc::downgrade(server);
    let dispatcher = server.dispatcher();

    register(dispatcher, PacketType::HandshakeRequest, &weak, handle_handshake);
    register(dispatcher, PacketType::Heartbeat, &weak, handle_heartbeat);
    register(dispatcher, PacketType::SetReady, &weak, handle_set_ready);
    register(dispatcher, PacketType::SongSelection, &weak, handle_song_selection);
    register(dispatcher, PacketType::GameplayCountdown, &weak, handle_countdown_request);
    register(dispatcher, PacketType::RoleChange, &weak, handle_role_change);
    register(dispatcher, PacketType::HostDisconnect, &weak, handle_host_disconnect);
    register(dispatcher, PacketType::SetlistAdd, &weak, handle_setlist_add);
    register(dispatcher, PacketType::SetlistRemove, &weak, handle_setlist_remove);
    register(dispatcher, PacketType::SetlistClear, &weak, handle_setlist_clear);
    register(dispatcher, PacketType::SetlistSync, &weak, handle_setlist_sync);
    register(dispatcher, PacketType::SetlistReplace, &weak, handle_setlist_replace);
}

/// Bind a typed handler to a weak server reference.
fn register<T, F>(
    dispatcher: &crate::protocol::dispatcher::PacketDispatcher,
    packet_type: PacketType,
    weak: &Weak<GameServer>,
    handler: F,
) where
    T: serde::de::DeserializeOwned + 'static,
    F: Fn(&GameServer, T, &crate::protocol::dispatcher::PacketContext) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
{
    let weak = weak.clone();
    // Registration happens exactly once per type at construction time.
    dispatcher
        .register_typed::<T, _>(packet_type, move |payload, ctx| {
            let Some(server) = upgrade(&weak) else {
                return Ok(());
            };
            handler(&server, payload, ctx)
        })
        .unwrap_or_else(|err| unreachable!("duplicate handler registration: {err}"));
}

/// The session behind a packet, or an error for unauthenticated senders.
fn sender_session(
    server: &GameServer,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<SessionRecord> {
    server
        .sessions()
        .get_by_connection(ctx.connection.id())
        .context("packet from a connection without a session")
}

fn sender_is_host(server: &GameServer, record: &SessionRecord) -> bool {
    server
        .lobby()
        .player(record.session_id)
        .is_some_and(|p| p.role == PlayerRole::Host)
}

fn handle_handshake(
    server: &GameServer,
    request: HandshakeRequest,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let outcome = server.handshake().process(&request, ctx.connection.clone());
    server.send_envelope(&ctx.connection, PacketType::HandshakeResponse, &outcome.response);

    let Some(record) = outcome.session else {
        if server.handshake().disconnect_on_reject() {
            ctx.connection.disconnect(
                outcome
                    .response
                    .reason
                    .as_deref()
                    .unwrap_or("handshake rejected"),
            );
        }
        return Ok(());
    };

    server.connections().promote(record.connection_id);
    match server.lobby().join(record.session_id, &record.player_name) {
        Ok(events) => {
            // Late joiners get the setlist before the room snapshot lands.
            let payload = SetlistSyncPayload {
                serialized: server.setlist().serialize(),
            };
            server.send_envelope(&ctx.connection, PacketType::SetlistSync, &payload);
            server.publish_lobby_events(&events);
        }
        Err(err) => {
            tracing::warn!(
                session_id = %record.session_id,
                error = %err,
                "Accepted session could not join the lobby"
            );
            server.sessions().remove(&record.session_id);
            ctx.connection.disconnect("lobby is full");
        }
    }
    Ok(())
}

fn handle_heartbeat(
    _server: &GameServer,
    _payload: HeartbeatPayload,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    tracing::trace!(connection_id = ctx.connection.id(), "Heartbeat");
    Ok(())
}

fn handle_set_ready(
    server: &GameServer,
    payload: SetReadyPayload,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let record = sender_session(server, ctx)?;
    let events = server.lobby().set_ready(record.session_id, payload.ready)?;
    server.publish_lobby_events(&events);
    Ok(())
}

fn handle_song_selection(
    server: &GameServer,
    selection: SongSelection,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let _ = sender_session(server, ctx)?;
    let events = server.lobby().apply_song_selection(selection)?;
    server.publish_lobby_events(&events);
    Ok(())
}

fn handle_countdown_request(
    server: &GameServer,
    payload: GameplayCountdownPayload,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let record = sender_session(server, ctx)?;
    anyhow::ensure!(
        sender_is_host(server, &record),
        "only the host can start the countdown"
    );
    let seconds = if payload.seconds == 0 {
        server.protocol_config().countdown_seconds
    } else {
        payload.seconds
    };
    let events = server.lobby().start_countdown(seconds)?;
    server.publish_lobby_events(&events);
    Ok(())
}

fn handle_role_change(
    server: &GameServer,
    payload: RoleChangePayload,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let record = sender_session(server, ctx)?;
    anyhow::ensure!(
        payload.session_id == record.session_id || sender_is_host(server, &record),
        "only the host may change other players' roles"
    );
    let events = server.lobby().set_role(payload.session_id, payload.role)?;
    server.publish_lobby_events(&events);
    Ok(())
}

fn handle_host_disconnect(
    server: &GameServer,
    payload: HostDisconnectPayload,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let record = sender_session(server, ctx)?;
    anyhow::ensure!(
        sender_is_host(server, &record),
        "only the host can close the lobby"
    );
    tracing::info!(reason = %payload.reason, "Host is closing the lobby");
    server.broadcast_envelope(PacketType::HostDisconnect, &payload);

    for session in server.sessions().snapshot() {
        if session.session_id != record.session_id {
            session.connection.disconnect("host closed the lobby");
        }
    }
    server.setlist().clear();
    server.unison().full_reset();
    server.collector().clear();
    Ok(())
}

fn handle_setlist_add(
    server: &GameServer,
    payload: SetlistAddPayload,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let record = sender_session(server, ctx)?;
    server.setlist().try_add(SetlistEntry {
        song_hash: payload.song_hash,
        song_name: payload.song_name,
        song_artist: payload.song_artist,
        added_by: record.player_name,
    })?;
    server.broadcast_setlist();
    Ok(())
}

fn handle_setlist_remove(
    server: &GameServer,
    payload: SetlistRemovePayload,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let _ = sender_session(server, ctx)?;
    server.setlist().try_remove(&payload.song_hash)?;
    server.broadcast_setlist();
    Ok(())
}

fn handle_setlist_clear(
    server: &GameServer,
    _payload: serde_json::Value,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let record = sender_session(server, ctx)?;
    anyhow::ensure!(
        sender_is_host(server, &record),
        "only the host can clear the setlist"
    );
    server.setlist().clear();
    server.broadcast_setlist();
    Ok(())
}

/// Client-sent `SetlistSync` is a snapshot request; the reply goes only to
/// the asking connection.
fn handle_setlist_sync(
    server: &GameServer,
    _payload: SetlistSyncPayload,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let _ = sender_session(server, ctx)?;
    let payload = SetlistSyncPayload {
        serialized: server.setlist().serialize(),
    };
    server.send_envelope(&ctx.connection, PacketType::SetlistSync, &payload);
    Ok(())
}

fn handle_setlist_replace(
    server: &GameServer,
    payload: SetlistReplacePayload,
    ctx: &crate::protocol::dispatcher::PacketContext,
) -> anyhow::Result<()> {
    let record = sender_session(server, ctx)?;
    anyhow::ensure!(
        sender_is_host(server, &record),
        "only the host can replace the setlist"
    );
    server.setlist().replace_all(payload.entries);
    server.broadcast_setlist();
    Ok(())
}
