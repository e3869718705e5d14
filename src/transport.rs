//! Transport-agnostic connection abstraction.
//!
//! The game server never touches a concrete networking library: it consumes
//! connections through [`PeerConnection`] and advances the transport through
//! [`Transport::poll`]. The reliable-ordered datagram library used in
//! production plugs in behind these traits; tests and embedded tooling use
//! the in-memory loopback implementation below.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use thiserror::Error;

/// Transport-scoped connection identifier.
pub type ConnectionId = u64;

/// Delivery guarantees offered by the underlying datagram transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryChannel {
    /// FIFO, no loss. Control and lobby traffic.
    ReliableOrdered,
    /// No loss, only the newest packet of a burst is delivered in order.
    ReliableSequenced,
    /// Fire and forget.
    Unreliable,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("peer is gone")]
    PeerGone,
}

/// Why a connection went away. Pending connects are cancelled with a
/// distinct error from established-connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Remote closed or timed out after the connection was established.
    RemoteClosed,
    /// The local side disconnected with the given reason string.
    LocalRequest(String),
    /// The transport shut down while the connect was still in flight.
    CancelledDuringConnect,
}

/// An established transport connection: opaque handle, byte sink.
pub trait PeerConnection: Send + Sync {
    fn id(&self) -> ConnectionId;
    fn send(&self, payload: &[u8], channel: DeliveryChannel) -> Result<(), SendError>;
    fn disconnect(&self, reason: &str);
}

/// One event surfaced by a transport poll.
pub enum TransportEvent {
    Connected(Arc<dyn PeerConnection>),
    Disconnected(ConnectionId, DisconnectReason),
    Payload {
        connection_id: ConnectionId,
        channel: DeliveryChannel,
        data: Bytes,
    },
}

/// A pollable transport. `poll` drains everything that arrived since the
/// last call; the server's poll loop invokes it every 15 ms.
pub trait Transport: Send {
    fn poll(&mut self) -> Vec<TransportEvent>;
}

// ===========================================================================
// In-memory loopback transport
// ===========================================================================

/// Frame travelling from server to a memory client.
type Outbound = (DeliveryChannel, Bytes);

struct MemoryConnectionShared {
    id: ConnectionId,
    to_client: Sender<Outbound>,
    events: Sender<TransportEvent>,
    closed: AtomicBool,
}

/// Server-side handle of a loopback connection.
pub struct MemoryConnection {
    shared: Arc<MemoryConnectionShared>,
}

impl PeerConnection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.shared.id
    }

    fn send(&self, payload: &[u8], channel: DeliveryChannel) -> Result<(), SendError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SendError::PeerGone);
        }
        self.shared
            .to_client
            .send((channel, Bytes::copy_from_slice(payload)))
            .map_err(|_| SendError::PeerGone)
    }

    fn disconnect(&self, reason: &str) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shared.events.send(TransportEvent::Disconnected(
            self.shared.id,
            DisconnectReason::LocalRequest(reason.to_string()),
        ));
    }
}

/// Client side of a loopback connection, used by tests and tooling to play
/// the role of a remote game instance.
pub struct MemoryClient {
    id: ConnectionId,
    from_server: Receiver<Outbound>,
    events: Sender<TransportEvent>,
    shared: Arc<MemoryConnectionShared>,
}

impl MemoryClient {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for the server; it surfaces on the next poll.
    pub fn send(&self, payload: &[u8], channel: DeliveryChannel) -> Result<(), SendError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SendError::PeerGone);
        }
        self.events
            .send(TransportEvent::Payload {
                connection_id: self.id,
                channel,
                data: Bytes::copy_from_slice(payload),
            })
            .map_err(|_| SendError::PeerGone)
    }

    /// Non-blocking receive of the next server-to-client frame.
    pub fn try_recv(&self) -> Option<Outbound> {
        match self.from_server.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain every pending server-to-client frame.
    pub fn drain(&self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Some(frame) = self.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Close the connection from the client side.
    pub fn disconnect(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.events.send(TransportEvent::Disconnected(
            self.id,
            DisconnectReason::RemoteClosed,
        ));
    }
}

/// Loopback transport: connections are created by [`MemoryTransport::connect`]
/// and surface as `Connected` events on the next poll.
pub struct MemoryTransport {
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    next_id: AtomicU64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            events_tx,
            events_rx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a new loopback connection and hand back the client end.
    pub fn connect(&self) -> MemoryClient {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (to_client, from_server) = unbounded();
        let shared = Arc::new(MemoryConnectionShared {
            id,
            to_client,
            events: self.events_tx.clone(),
            closed: AtomicBool::new(false),
        });
        let connection = Arc::new(MemoryConnection {
            shared: shared.clone(),
        });
        let _ = self
            .events_tx
            .send(TransportEvent::Connected(connection));
        MemoryClient {
            id,
            from_server,
            events: self.events_tx.clone(),
            shared,
        }
    }
}

impl Transport for MemoryTransport {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_surfaces_on_poll() {
        let mut transport = MemoryTransport::new();
        let client = transport.connect();
        let events = transport.poll();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TransportEvent::Connected(conn) => assert_eq!(conn.id(), client.id()),
            _ => panic!("expected Connected"),
        }
    }

    #[test]
    fn payload_flows_both_ways() {
        let mut transport = MemoryTransport::new();
        let client = transport.connect();
        let events = transport.poll();
        let TransportEvent::Connected(conn) = &events[0] else {
            panic!("expected Connected");
        };

        client
            .send(b"to-server", DeliveryChannel::ReliableOrdered)
            .unwrap();
        let events = transport.poll();
        assert!(matches!(
            &events[0],
            TransportEvent::Payload { data, .. } if data.as_ref() == b"to-server"
        ));

        conn.send(b"to-client", DeliveryChannel::ReliableSequenced)
            .unwrap();
        let (channel, data) = client.try_recv().unwrap();
        assert_eq!(channel, DeliveryChannel::ReliableSequenced);
        assert_eq!(data.as_ref(), b"to-client");
    }

    #[test]
    fn client_disconnect_surfaces_and_blocks_sends() {
        let mut transport = MemoryTransport::new();
        let client = transport.connect();
        let events = transport.poll();
        let TransportEvent::Connected(conn) = &events[0] else {
            panic!("expected Connected");
        };

        client.disconnect();
        let events = transport.poll();
        assert!(matches!(
            &events[0],
            TransportEvent::Disconnected(_, DisconnectReason::RemoteClosed)
        ));
        assert!(conn
            .send(b"late", DeliveryChannel::ReliableOrdered)
            .is_err());
    }

    #[test]
    fn server_disconnect_reports_local_reason() {
        let mut transport = MemoryTransport::new();
        let _client = transport.connect();
        let events = transport.poll();
        let TransportEvent::Connected(conn) = &events[0] else {
            panic!("expected Connected");
        };

        conn.disconnect("handshake rejected");
        let events = transport.poll();
        assert!(matches!(
            &events[0],
            TransportEvent::Disconnected(_, DisconnectReason::LocalRequest(reason))
                if reason == "handshake rejected"
        ));
    }
}
