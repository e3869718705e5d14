//! Framed relay dialect, spoken over the reliable-datagram transport.
//!
//! Same host/client slot model as the raw-UDP dialect, but peers are
//! transport connections rather than UDP endpoints and frames carry the
//! session id only at registration:
//!
//! ```text
//! peer -> relay   [1][sessionId:16][isHost:1]   Register
//! peer -> relay   [2][payload...]               Data
//! relay -> peer   [10][sessionId:16][isHost:1]  Registered
//! relay -> peer   [11][sessionId:16]            PeerConnected
//! relay -> peer   [12][sessionId:16]            PeerDisconnected
//! relay -> peer   [20][utf8 message...]         Error
//! ```
//!
//! Data is forwarded to the opposite slot on the same delivery channel it
//! arrived on. Sessions are created on first registration and die when both
//! slots are empty.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::transport::{ConnectionId, DeliveryChannel, PeerConnection};

pub const OP_REGISTER: u8 = 1;
pub const OP_DATA: u8 = 2;
pub const OP_REGISTERED: u8 = 10;
pub const OP_PEER_CONNECTED: u8 = 11;
pub const OP_PEER_DISCONNECTED: u8 = 12;
pub const OP_ERROR: u8 = 20;

/// `[opcode][sessionId:16][isHost:1]` is the longest fixed layout.
const REGISTER_FRAME_LEN: usize = 18;

struct FramedSlot {
    connection_id: ConnectionId,
    connection: Arc<dyn PeerConnection>,
}

struct FramedSession {
    host: Option<FramedSlot>,
    client: Option<FramedSlot>,
}

/// Relay endpoint multiplexing framed sessions over peer connections.
#[derive(Default)]
pub struct FramedRelay {
    sessions: DashMap<Uuid, FramedSession>,
    by_connection: DashMap<ConnectionId, Uuid>,
}

impl FramedRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Route one inbound frame from a peer connection.
    pub fn handle_frame(
        &self,
        connection: &Arc<dyn PeerConnection>,
        channel: DeliveryChannel,
        frame: &[u8],
    ) {
        match frame.first() {
            Some(&OP_REGISTER) => self.handle_register(connection, frame),
            Some(&OP_DATA) => self.handle_data(connection, channel, frame),
            Some(other) => {
                send_error(connection, &format!("unsupported relay opcode {other}"));
            }
            None => {}
        }
    }

    fn handle_register(&self, connection: &Arc<dyn PeerConnection>, frame: &[u8]) {
        if frame.len() < REGISTER_FRAME_LEN {
            send_error(connection, "malformed register frame");
            return;
        }
        let mut raw_id = [0u8; 16];
        raw_id.copy_from_slice(&frame[1..17]);
        let session_id = Uuid::from_bytes(raw_id);
        let is_host = frame[17] == 1;
        let connection_id = connection.id();

        let notify = {
            let mut session = self
                .sessions
                .entry(session_id)
                .or_insert_with(|| FramedSession {
                    host: None,
                    client: None,
                });
            let slot = if is_host {
                &mut session.host
            } else {
                &mut session.client
            };
            if matches!(slot, Some(existing) if existing.connection_id != connection_id) {
                None // handled below; the slot belongs to someone else
            } else {
                *slot = Some(FramedSlot {
                    connection_id,
                    connection: connection.clone(),
                });
                let other = if is_host {
                    session.client.as_ref()
                } else {
                    session.host.as_ref()
                };
                Some(other.map(|slot| slot.connection.clone()))
            }
        };

        let Some(other) = notify else {
            send_error(connection, "slot already taken");
            return;
        };
        self.by_connection.insert(connection_id, session_id);

        let mut reply = Vec::with_capacity(REGISTER_FRAME_LEN);
        reply.push(OP_REGISTERED);
        reply.extend_from_slice(session_id.as_bytes());
        reply.push(u8::from(is_host));
        let _ = connection.send(&reply, DeliveryChannel::ReliableOrdered);

        if let Some(other) = other {
            let mut frame = Vec::with_capacity(17);
            frame.push(OP_PEER_CONNECTED);
            frame.extend_from_slice(session_id.as_bytes());
            let _ = other.send(&frame, DeliveryChannel::ReliableOrdered);
            let _ = connection.send(&frame, DeliveryChannel::ReliableOrdered);
            tracing::info!(%session_id, "Framed relay session peers connected");
        }
    }

    /// Forward an opaque data frame to the opposite slot, preserving the
    /// delivery channel it arrived on.
    fn handle_data(
        &self,
        connection: &Arc<dyn PeerConnection>,
        channel: DeliveryChannel,
        frame: &[u8],
    ) {
        let connection_id = connection.id();
        let Some(session_id) = self.by_connection.get(&connection_id).map(|id| *id) else {
            send_error(connection, "not registered with a relay session");
            return;
        };

        let destination = {
            let Some(session) = self.sessions.get(&session_id) else {
                return;
            };
            let from_host = session
                .host
                .as_ref()
                .is_some_and(|slot| slot.connection_id == connection_id);
            let other = if from_host {
                session.client.as_ref()
            } else {
                session.host.as_ref()
            };
            other.map(|slot| slot.connection.clone())
        };

        if let Some(destination) = destination {
            // Send failures are swallowed; disconnect cleanup follows.
            let _ = destination.send(frame, channel);
        }
    }

    /// Connection-level disconnect: free the slot, notify the peer, and
    /// destroy the session once both slots are empty.
    pub fn handle_disconnect(&self, connection_id: ConnectionId) {
        let Some((_, session_id)) = self.by_connection.remove(&connection_id) else {
            return;
        };
        let (other, destroy) = {
            let Some(mut session) = self.sessions.get_mut(&session_id) else {
                return;
            };
            if session
                .host
                .as_ref()
                .is_some_and(|slot| slot.connection_id == connection_id)
            {
                session.host = None;
            } else if session
                .client
                .as_ref()
                .is_some_and(|slot| slot.connection_id == connection_id)
            {
                session.client = None;
            }
            let other = session
                .host
                .as_ref()
                .or(session.client.as_ref())
                .map(|slot| slot.connection.clone());
            let destroy = other.is_none();
            (other, destroy)
        };

        if let Some(other) = other {
            let mut frame = Vec::with_capacity(17);
            frame.push(OP_PEER_DISCONNECTED);
            frame.extend_from_slice(session_id.as_bytes());
            let _ = other.send(&frame, DeliveryChannel::ReliableOrdered);
        }
        if destroy {
            self.sessions.remove(&session_id);
            tracing::info!(%session_id, "Framed relay session destroyed");
        }
    }
}

fn send_error(connection: &Arc<dyn PeerConnection>, message: &str) {
    let mut frame = Vec::with_capacity(1 + message.len());
    frame.push(OP_ERROR);
    frame.extend_from_slice(message.as_bytes());
    let _ = connection.send(&frame, DeliveryChannel::ReliableOrdered);
}
