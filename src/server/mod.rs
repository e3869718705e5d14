//! Game-server runtime glue.
//!
//! Owns the protocol-core components and drives them from a transport poll
//! loop: payload callbacks go through the dispatcher, connect/disconnect
//! callbacks maintain the connection manager and the lobby, and every lobby
//! mutation fans out as a single serialized `LobbyState` broadcast.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ProtocolConfig;
use crate::lobby::collector::ScoreReplayCollector;
use crate::lobby::library::{LibraryEvent, SharedLibraryManager};
use crate::lobby::setlist::SetlistManager;
use crate::lobby::state::{LobbyEvent, LobbyStateManager};
use crate::lobby::unison::UnisonCoordinator;
use crate::protocol::dispatcher::{EndpointRole, PacketContext, PacketDispatcher};
use crate::protocol::envelope::{Envelope, PacketType};
use crate::protocol::packets::{
    BinaryPacket, GameplayStartPacket, SetlistSyncPayload, SharedSongsSyncStatePacket,
};
use crate::session::handshake::HandshakeValidator;
use crate::session::manager::SessionManager;
use crate::transport::{
    ConnectionId, DeliveryChannel, DisconnectReason, PeerConnection, Transport, TransportEvent,
};

mod connection_manager;
mod handlers;
mod relay_table;

pub use connection_manager::ConnectionManager;

/// Transport poll cadence.
pub const POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Head start given to clients between the start announcement and the
/// moment playback must begin, so everyone lands on the same beat.
const GAMEPLAY_START_LEAD: Duration = Duration::from_millis(500);

pub struct GameServer {
    protocol_config: ProtocolConfig,
    dispatcher: PacketDispatcher,
    sessions: Arc<SessionManager>,
    handshake: HandshakeValidator,
    lobby: LobbyStateManager,
    setlist: SetlistManager,
    shared_library: SharedLibraryManager,
    unison: UnisonCoordinator,
    collector: ScoreReplayCollector,
    connections: ConnectionManager,
    /// Wall-clock deadline of the running countdown, if any.
    countdown_deadline: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl GameServer {
    pub fn new(protocol_config: ProtocolConfig) -> Arc<Self> {
        let sessions = Arc::new(SessionManager::new(protocol_config.max_sessions));
        let handshake = HandshakeValidator::new(protocol_config.clone(), sessions.clone());
        let server = Arc::new(Self {
            lobby: LobbyStateManager::new(protocol_config.max_sessions),
            setlist: SetlistManager::new(),
            shared_library: SharedLibraryManager::new(),
            unison: UnisonCoordinator::new(1),
            collector: ScoreReplayCollector::new(),
            dispatcher: PacketDispatcher::new(),
            connections: ConnectionManager::new(),
            countdown_deadline: Mutex::new(None),
            cancel: CancellationToken::new(),
            protocol_config,
            sessions,
            handshake,
        });
        handlers::install(&server);
        relay_table::install(&server);
        server
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn lobby(&self) -> &LobbyStateManager {
        &self.lobby
    }

    pub fn setlist(&self) -> &SetlistManager {
        &self.setlist
    }

    pub fn shared_library(&self) -> &SharedLibraryManager {
        &self.shared_library
    }

    pub fn unison(&self) -> &UnisonCoordinator {
        &self.unison
    }

    pub fn collector(&self) -> &ScoreReplayCollector {
        &self.collector
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn protocol_config(&self) -> &ProtocolConfig {
        &self.protocol_config
    }

    pub(crate) fn dispatcher(&self) -> &PacketDispatcher {
        &self.dispatcher
    }

    pub(crate) fn handshake(&self) -> &HandshakeValidator {
        &self.handshake
    }

    /// Drive the transport until shutdown: poll, 15 ms sleep, repeat.
    pub async fn run(self: Arc<Self>, mut transport: Box<dyn Transport>) {
        tracing::info!(
            capacity = self.protocol_config.max_sessions,
            version = %self.protocol_config.protocol_version,
            "Game server loop started"
        );
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(POLL_INTERVAL) => self.pump(transport.as_mut()),
            }
        }
        // Bounded drain so in-flight frames still land before teardown.
        let drain_deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < drain_deadline {
            self.pump(transport.as_mut());
            tokio::time::sleep(POLL_INTERVAL).await;
            if self.connections.pending_count() == 0 && self.connections.authenticated_count() == 0
            {
                break;
            }
        }
        tracing::info!("Game server loop stopped");
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// One poll step: advance the transport and handle everything it yields.
    /// Synchronous so tests can drive the server deterministically.
    pub fn pump(&self, transport: &mut dyn Transport) {
        for event in transport.poll() {
            match event {
                TransportEvent::Connected(connection) => self.handle_connect(connection),
                TransportEvent::Disconnected(connection_id, reason) => {
                    self.handle_disconnect(connection_id, &reason);
                }
                TransportEvent::Payload {
                    connection_id,
                    channel,
                    data,
                } => self.handle_payload(connection_id, channel, &data),
            }
        }
        self.complete_countdown_if_due();
    }

    fn handle_connect(&self, connection: Arc<dyn PeerConnection>) {
        tracing::debug!(connection_id = connection.id(), "Connection opened");
        self.connections.add_pending(connection);
    }

    fn handle_disconnect(&self, connection_id: ConnectionId, reason: &DisconnectReason) {
        tracing::debug!(connection_id, ?reason, "Connection closed");
        self.connections.remove(connection_id);
        let Some(record) = self.sessions.remove_by_connection(connection_id) else {
            return;
        };
        tracing::info!(
            session_id = %record.session_id,
            player_name = %record.player_name,
            "Session ended"
        );
        let events = self.lobby.remove(record.session_id);
        self.publish_lobby_events(&events);
        let library_events = self.shared_library.remove_player(record.session_id);
        self.publish_library_events(&library_events);
        if self.sessions.is_empty() {
            // Last player gone: tear lobby-scoped state down.
            self.unison.full_reset();
            self.collector.clear();
        }
    }

    fn handle_payload(&self, connection_id: ConnectionId, channel: DeliveryChannel, data: &[u8]) {
        let Some(connection) = self.connections.get(connection_id) else {
            return;
        };
        let ctx = PacketContext {
            connection,
            channel,
            role: EndpointRole::Server,
        };
        match self.dispatcher.dispatch(data, &ctx) {
            Ok(_) => {}
            Err(err) => {
                // A malformed envelope is logged but never drops the peer.
                tracing::warn!(connection_id, error = %err, "Failed to dispatch inbound frame");
            }
        }
    }

    // =======================================================================
    // Broadcast helpers
    // =======================================================================

    pub(crate) fn envelope_bytes<T: Serialize>(
        &self,
        packet_type: PacketType,
        payload: &T,
    ) -> Option<bytes::Bytes> {
        match Envelope::new(packet_type, payload, &self.protocol_config.protocol_version)
            .and_then(|envelope| envelope.to_bytes())
        {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::error!(%packet_type, error = %err, "Failed to serialize envelope");
                None
            }
        }
    }

    pub(crate) fn broadcast_envelope<T: Serialize>(&self, packet_type: PacketType, payload: &T) {
        if let Some(bytes) = self.envelope_bytes(packet_type, payload) {
            self.connections
                .to_all(&bytes, DeliveryChannel::ReliableOrdered);
        }
    }

    pub(crate) fn send_envelope<T: Serialize>(
        &self,
        connection: &Arc<dyn PeerConnection>,
        packet_type: PacketType,
        payload: &T,
    ) {
        if let Some(bytes) = self.envelope_bytes(packet_type, payload) {
            let _ = connection.send(&bytes, DeliveryChannel::ReliableOrdered);
        }
    }

    /// Serialize the room snapshot once and send it to every session.
    pub(crate) fn broadcast_lobby_state(&self) {
        let snapshot = self.lobby.snapshot();
        self.broadcast_envelope(PacketType::LobbyState, &snapshot);
    }

    /// Broadcast the setlist in its snapshot form.
    pub(crate) fn broadcast_setlist(&self) {
        let payload = SetlistSyncPayload {
            serialized: self.setlist.serialize(),
        };
        self.broadcast_envelope(PacketType::SetlistSync, &payload);
    }

    /// React to committed lobby events, then broadcast the new room state
    /// exactly once.
    pub(crate) fn publish_lobby_events(&self, events: &[LobbyEvent]) {
        if events.is_empty() {
            return;
        }
        for event in events {
            match event {
                LobbyEvent::CountdownStarted(seconds) => {
                    *self.lock_deadline() =
                        Some(Instant::now() + Duration::from_secs(u64::from(*seconds)));
                    // The countdown announcement precedes the state broadcast.
                    self.broadcast_envelope(
                        PacketType::GameplayCountdown,
                        &crate::protocol::packets::GameplayCountdownPayload { seconds: *seconds },
                    );
                }
                LobbyEvent::CountdownCancelled => {
                    *self.lock_deadline() = None;
                }
                LobbyEvent::CountdownCompleted => {
                    *self.lock_deadline() = None;
                    self.start_gameplay();
                }
                _ => {}
            }
        }
        self.broadcast_lobby_state();
    }

    /// Push shared-library updates down to the clients.
    pub(crate) fn publish_library_events(&self, events: &[LibraryEvent]) {
        for event in events {
            match event {
                LibraryEvent::SharedSongsChanged(count) => {
                    tracing::debug!(shared = count, "Shared song intersection changed");
                    for chunk in self.shared_library.build_shared_chunks() {
                        if let Ok(frame) = chunk.encode() {
                            self.connections
                                .to_all(&frame, DeliveryChannel::ReliableOrdered);
                        }
                    }
                }
                LibraryEvent::SyncStateChanged { complete } => {
                    let packet = SharedSongsSyncStatePacket {
                        complete: *complete,
                        shared_count: self.shared_library.shared_count() as u32,
                    };
                    if let Ok(frame) = packet.encode() {
                        self.connections
                            .to_all(&frame, DeliveryChannel::ReliableOrdered);
                    }
                }
            }
        }
    }

    /// Countdown finished: arm the unison accounting, open a score/replay
    /// collection, and announce the synchronized start deadline.
    fn start_gameplay(&self) {
        let snapshot = self.lobby.snapshot();
        let active = snapshot
            .players
            .iter()
            .filter(|p| !p.role.is_spectator())
            .count();
        self.unison.reset();
        self.unison.set_expected_players(0, active.max(1));

        let song_hash = snapshot
            .selection
            .map(|sel| sel.song_id)
            .unwrap_or_default();
        self.collector.begin_song(&song_hash);

        // Everyone starts playback at the same shared-clock instant.
        let start_at = unix_time_secs() + GAMEPLAY_START_LEAD.as_secs_f64();
        tracing::info!(%song_hash, players = active, start_at, "Gameplay starting");
        let packet = GameplayStartPacket {
            song_hash,
            start_at,
        };
        match packet.encode() {
            Ok(frame) => self
                .connections
                .to_all(&frame, DeliveryChannel::ReliableOrdered),
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode gameplay start");
            }
        }
    }

    fn complete_countdown_if_due(&self) {
        let due = {
            let deadline = self.lock_deadline();
            matches!(*deadline, Some(at) if Instant::now() >= at)
        };
        if due {
            if let Ok(events) = self.lobby.complete_countdown() {
                self.publish_lobby_events(&events);
            } else {
                *self.lock_deadline() = None;
            }
        }
    }

    fn lock_deadline(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.countdown_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Grab a strong server handle inside a dispatcher closure, or bail out
/// quietly if the server is already gone.
pub(crate) fn upgrade(server: &Weak<GameServer>) -> Option<Arc<GameServer>> {
    server.upgrade()
}

/// Seconds since the Unix epoch, the protocol's shared-clock basis.
fn unix_time_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}
