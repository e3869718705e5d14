//! Connection bookkeeping for the game server.
//!
//! Connections arrive as *pending* and are promoted to *authenticated* once
//! their handshake is accepted. A reverse index maps persistent player ids
//! (from the binary auth variant) to their current connection. Broadcast
//! helpers swallow send failures; the disconnect event that follows cleans
//! the state up.

use std::sync::Arc;

use dashmap::DashMap;

use crate::protocol::types::PlayerId;
use crate::transport::{ConnectionId, DeliveryChannel, PeerConnection};

#[derive(Default)]
pub struct ConnectionManager {
    pending: DashMap<ConnectionId, Arc<dyn PeerConnection>>,
    authenticated: DashMap<ConnectionId, Arc<dyn PeerConnection>>,
    players: DashMap<PlayerId, ConnectionId>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a fresh, not-yet-handshaken connection.
    pub fn add_pending(&self, connection: Arc<dyn PeerConnection>) {
        self.pending.insert(connection.id(), connection);
    }

    /// Promote a pending connection after an accepted handshake.
    pub fn promote(&self, connection_id: ConnectionId) -> bool {
        match self.pending.remove(&connection_id) {
            Some((id, connection)) => {
                self.authenticated.insert(id, connection);
                true
            }
            None => false,
        }
    }

    /// Associate a persistent player id with a connection. A newer login
    /// for the same player displaces the old mapping.
    pub fn bind_player(&self, player_id: PlayerId, connection_id: ConnectionId) {
        self.players.insert(player_id, connection_id);
    }

    /// Forget a connection in whichever state it is in.
    pub fn remove(&self, connection_id: ConnectionId) {
        self.pending.remove(&connection_id);
        self.authenticated.remove(&connection_id);
        self.players.retain(|_, bound| *bound != connection_id);
    }

    pub fn is_authenticated(&self, connection_id: ConnectionId) -> bool {
        self.authenticated.contains_key(&connection_id)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<Arc<dyn PeerConnection>> {
        self.authenticated
            .get(&connection_id)
            .or_else(|| self.pending.get(&connection_id))
            .map(|conn| conn.clone())
    }

    pub fn connection_for_player(&self, player_id: &PlayerId) -> Option<Arc<dyn PeerConnection>> {
        let connection_id = *self.players.get(player_id)?;
        self.get(connection_id)
    }

    pub fn authenticated_count(&self) -> usize {
        self.authenticated.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send to every authenticated connection.
    pub fn to_all(&self, payload: &[u8], channel: DeliveryChannel) {
        for entry in &self.authenticated {
            let _ = entry.value().send(payload, channel);
        }
    }

    /// Send to every authenticated connection except one.
    pub fn to_all_except(
        &self,
        excluded: ConnectionId,
        payload: &[u8],
        channel: DeliveryChannel,
    ) {
        for entry in &self.authenticated {
            if *entry.key() != excluded {
                let _ = entry.value().send(payload, channel);
            }
        }
    }

    /// Send to every authenticated connection except the one bound to a
    /// persistent player id.
    pub fn to_all_except_player(
        &self,
        player_id: &PlayerId,
        payload: &[u8],
        channel: DeliveryChannel,
    ) {
        let excluded = self.players.get(player_id).map(|bound| *bound);
        for entry in &self.authenticated {
            if Some(*entry.key()) != excluded {
                let _ = entry.value().send(payload, channel);
            }
        }
    }
}
