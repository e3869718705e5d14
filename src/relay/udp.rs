//! Raw-UDP relay dialect.
//!
//! Every frame is `[opcode:1][sessionId:16][payload...]` — anything shorter
//! than 17 bytes is dropped without a reply. A session has one host slot and
//! one client slot; data is forwarded only when the source endpoint matches
//! the registered slot exactly, and only to the opposite slot.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::protocol::types::LobbyId;

/// Minimum well-formed frame: opcode + session id.
pub const MIN_FRAME_LEN: usize = 17;

// Peer -> relay opcodes.
pub const OP_HOST_REGISTER: u8 = 1;
pub const OP_CLIENT_REGISTER: u8 = 2;
pub const OP_DATA: u8 = 3;
pub const OP_HEARTBEAT: u8 = 4;
pub const OP_DISCONNECT: u8 = 5;
// Relay -> peer opcodes.
pub const OP_ACK: u8 = 10;
pub const OP_PEER_CONNECTED: u8 = 11;
pub const OP_PEER_DISCONNECTED: u8 = 12;

#[derive(Debug)]
struct RelaySession {
    lobby_id: LobbyId,
    host: Option<SocketAddr>,
    client: Option<SocketAddr>,
    created_at: Instant,
    last_activity: Instant,
    packets_relayed: u64,
    bytes_relayed: u64,
}

#[derive(Debug, Default)]
struct RelayCounters {
    total_sessions: AtomicU64,
    packets_relayed: AtomicU64,
    bytes_relayed: AtomicU64,
}

/// Counter snapshot exposed by `GET /api/relay/stats`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelayStatsSnapshot {
    pub active_sessions: usize,
    pub total_sessions: u64,
    pub packets_relayed: u64,
    pub bytes_relayed: u64,
}

pub struct RelayServer {
    socket: Arc<UdpSocket>,
    port: u16,
    config: RelayConfig,
    sessions: DashMap<Uuid, RelaySession>,
    by_lobby: DashMap<LobbyId, Uuid>,
    counters: RelayCounters,
}

impl RelayServer {
    pub async fn bind(config: RelayConfig) -> anyhow::Result<Arc<Self>> {
        let socket = UdpSocket::bind(("0.0.0.0", config.port)).await?;
        let port = socket.local_addr()?.port();
        tracing::info!(port, "UDP relay listening");
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            port,
            config,
            sessions: DashMap::new(),
            by_lobby: DashMap::new(),
            counters: RelayCounters::default(),
        }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            active_sessions: self.sessions.len(),
            total_sessions: self.counters.total_sessions.load(Ordering::Relaxed),
            packets_relayed: self.counters.packets_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.counters.bytes_relayed.load(Ordering::Relaxed),
        }
    }

    /// Allocate (or return the existing) session for a lobby.
    pub fn allocate(&self, lobby_id: LobbyId) -> Uuid {
        if let Some(existing) = self.by_lobby.get(&lobby_id) {
            let session_id = *existing;
            if self.sessions.contains_key(&session_id) {
                return session_id;
            }
        }

        let session_id = Uuid::new_v4();
        let now = Instant::now();
        self.sessions.insert(
            session_id,
            RelaySession {
                lobby_id,
                host: None,
                client: None,
                created_at: now,
                last_activity: now,
                packets_relayed: 0,
                bytes_relayed: 0,
            },
        );
        self.by_lobby.insert(lobby_id, session_id);
        self.counters.total_sessions.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%lobby_id, %session_id, "Relay session allocated");
        session_id
    }

    /// Tear a session down, notifying any registered peers.
    pub async fn release(&self, session_id: &Uuid) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return false;
        };
        self.by_lobby.remove(&session.lobby_id);
        for peer in [session.host, session.client].into_iter().flatten() {
            let _ = self
                .socket
                .send_to(&control_frame(OP_PEER_DISCONNECTED, session_id), peer)
                .await;
        }
        tracing::info!(%session_id, "Relay session released");
        true
    }

    /// Receive loop plus periodic inactivity sweep; runs until cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut buf = vec![0u8; 2048];
        let mut sweep = tokio::time::interval(Duration::from_secs(
            self.config.sweep_interval_secs.max(1),
        ));
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = sweep.tick() => self.sweep_expired().await,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, src)) => self.handle_frame(&buf[..len], src).await,
                    Err(err) => {
                        if err.kind() != std::io::ErrorKind::ConnectionReset {
                            tracing::warn!(error = %err, "Relay socket recv error");
                        }
                    }
                }
            }
        }
        tracing::info!("UDP relay stopped");
    }

    async fn handle_frame(&self, frame: &[u8], src: SocketAddr) {
        // Short frames are silently discarded.
        if frame.len() < MIN_FRAME_LEN {
            return;
        }
        let opcode = frame[0];
        let mut raw_id = [0u8; 16];
        raw_id.copy_from_slice(&frame[1..17]);
        let session_id = Uuid::from_bytes(raw_id);

        match opcode {
            OP_HOST_REGISTER => self.register_peer(session_id, src, true).await,
            OP_CLIENT_REGISTER => self.register_peer(session_id, src, false).await,
            OP_DATA => self.forward_data(session_id, src, frame).await,
            OP_HEARTBEAT => self.touch(session_id, src),
            OP_DISCONNECT => self.disconnect_peer(session_id, src).await,
            other => {
                tracing::trace!(opcode = other, %src, "Ignoring unknown relay opcode");
            }
        }
    }

    async fn register_peer(&self, session_id: Uuid, src: SocketAddr, is_host: bool) {
        enum Verdict {
            Unknown,
            SlotTaken,
            Registered { other: Option<SocketAddr> },
        }

        let slot_name = if is_host { "host" } else { "client" };
        let verdict = match self.sessions.get_mut(&session_id) {
            None => Verdict::Unknown,
            Some(mut session) => {
                let slot = if is_host {
                    &mut session.host
                } else {
                    &mut session.client
                };
                if matches!(slot, Some(existing) if *existing != src) {
                    Verdict::SlotTaken
                } else {
                    *slot = Some(src);
                    session.last_activity = Instant::now();
                    let other = if is_host { session.client } else { session.host };
                    Verdict::Registered { other }
                }
            }
        };

        match verdict {
            Verdict::Unknown => {
                let _ = self
                    .socket
                    .send_to(&ack_frame(&session_id, false, "unknown session"), src)
                    .await;
            }
            Verdict::SlotTaken => {
                let _ = self
                    .socket
                    .send_to(
                        &ack_frame(&session_id, false, &format!("{slot_name} slot taken")),
                        src,
                    )
                    .await;
            }
            Verdict::Registered { other } => {
                let _ = self
                    .socket
                    .send_to(
                        &ack_frame(&session_id, true, &format!("{slot_name} registered")),
                        src,
                    )
                    .await;
                if let Some(other) = other {
                    // Both slots are now filled; tell both sides.
                    let frame = control_frame(OP_PEER_CONNECTED, &session_id);
                    let _ = self.socket.send_to(&frame, other).await;
                    let _ = self.socket.send_to(&frame, src).await;
                    tracing::info!(%session_id, "Relay session peers connected");
                }
            }
        }
    }

    /// Forward a data frame to the opposite slot. The destination is read
    /// under the lock; the send happens after it is released.
    async fn forward_data(&self, session_id: Uuid, src: SocketAddr, frame: &[u8]) {
        let destination = {
            let Some(mut session) = self.sessions.get_mut(&session_id) else {
                return;
            };
            let destination = if session.host == Some(src) {
                session.client
            } else if session.client == Some(src) {
                session.host
            } else {
                // Source endpoint does not match either slot: drop silently.
                return;
            };
            let Some(destination) = destination else {
                return;
            };
            session.last_activity = Instant::now();
            session.packets_relayed += 1;
            session.bytes_relayed += frame.len() as u64;
            destination
        };

        self.counters.packets_relayed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_relayed
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        // Send failures are swallowed; the peer may have just dropped.
        let _ = self.socket.send_to(frame, destination).await;
    }

    fn touch(&self, session_id: Uuid, src: SocketAddr) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            if session.host == Some(src) || session.client == Some(src) {
                session.last_activity = Instant::now();
            }
        }
    }

    async fn disconnect_peer(&self, session_id: Uuid, src: SocketAddr) {
        let (other, destroy) = {
            let Some(mut session) = self.sessions.get_mut(&session_id) else {
                return;
            };
            if session.host == Some(src) {
                session.host = None;
            } else if session.client == Some(src) {
                session.client = None;
            } else {
                return;
            }
            session.last_activity = Instant::now();
            let other = session.host.or(session.client);
            (other, other.is_none())
        };

        if let Some(other) = other {
            let _ = self
                .socket
                .send_to(&control_frame(OP_PEER_DISCONNECTED, &session_id), other)
                .await;
        }
        if destroy {
            if let Some((_, session)) = self.sessions.remove(&session_id) {
                self.by_lobby.remove(&session.lobby_id);
                tracing::info!(%session_id, "Relay session destroyed (both slots empty)");
            }
        }
    }

    /// Drop sessions idle past the configured TTL.
    pub async fn sweep_expired(&self) {
        let ttl = Duration::from_secs(self.config.session_ttl_secs);
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|s| s.last_activity.elapsed() >= ttl)
            .map(|s| *s.key())
            .collect();
        for session_id in expired {
            tracing::info!(%session_id, "Relay session expired");
            self.release(&session_id).await;
        }
    }

    /// Session age, for diagnostics.
    pub fn session_age(&self, session_id: &Uuid) -> Option<Duration> {
        self.sessions
            .get(session_id)
            .map(|s| s.created_at.elapsed())
    }
}

/// `[opcode][sessionId]` control frame.
fn control_frame(opcode: u8, session_id: &Uuid) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MIN_FRAME_LEN);
    frame.push(opcode);
    frame.extend_from_slice(session_id.as_bytes());
    frame
}

/// `[Ack][sessionId][success][utf8 message]`.
fn ack_frame(session_id: &Uuid, success: bool, message: &str) -> Vec<u8> {
    let mut frame = control_frame(OP_ACK, session_id);
    frame.push(u8::from(success));
    frame.extend_from_slice(message.as_bytes());
    frame
}
