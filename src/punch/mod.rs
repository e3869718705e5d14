//! NAT hole-punch coordinator.
//!
//! One UDP socket doubles as the introduction rendezvous and as an observer
//! of peers' external endpoints: the `(ip, port)` a registration datagram
//! arrives from is the peer's real NAT mapping and always takes precedence
//! over anything declared over HTTP, because NATs bind different ports for
//! outbound UDP than for outbound HTTP and the mapping drifts.
//!
//! Registration datagrams are plain UTF-8 tokens:
//!
//! ```text
//! host:<lobbyId>                  claim/refresh the host mapping
//! client:<lobbyId>:<clientToken>  record the client and ask for a punch
//! ```
//!
//! When both sides are known the coordinator sends one `introduce:` line to
//! each peer carrying all four endpoints, plus unconnected `punch:` hint
//! packets so middleboxes on both paths observe bidirectional traffic.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::RngExt;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PunchConfig;
use crate::protocol::types::LobbyId;

/// Resolution of one punch attempt, published on the outcome channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunchOutcome {
    pub lobby_id: LobbyId,
    pub token: String,
    pub success: bool,
}

/// The four-endpoint introduction emitted when a pair is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatIntroduction {
    pub token: String,
    pub host_internal: SocketAddr,
    pub host_external: SocketAddr,
    pub client_internal: SocketAddr,
    pub client_external: SocketAddr,
}

impl NatIntroduction {
    /// Wire form, identical for both peers: each side knows its own role.
    fn to_datagram(&self) -> String {
        format!(
            "introduce:{}|{}|{}|{}|{}",
            self.token,
            self.host_internal,
            self.host_external,
            self.client_internal,
            self.client_external
        )
    }
}

/// What `POST /api/punch/request` reports back.
#[derive(Debug, Clone)]
pub struct PunchRequestResult {
    pub token: String,
    pub host_registered: bool,
    pub introduced: bool,
}

#[derive(Debug, Clone)]
struct HostRegistration {
    internal: Option<SocketAddr>,
    external: Option<SocketAddr>,
    /// A UDP-observed external endpoint is never overwritten by HTTP.
    external_from_udp: bool,
    last_seen: Instant,
}

#[derive(Debug, Clone)]
struct ClientEndpoint {
    lobby_id: LobbyId,
    token: String,
    internal: Option<SocketAddr>,
    external: Option<SocketAddr>,
    external_from_udp: bool,
    discovered_at: Instant,
}

#[derive(Debug, Clone)]
struct PunchAttempt {
    lobby_id: LobbyId,
    started_at: Instant,
}

#[derive(Debug, Clone)]
struct PendingRequest {
    token: String,
    queued_at: Instant,
}

pub struct PunchCoordinator {
    socket: Arc<UdpSocket>,
    port: u16,
    config: PunchConfig,
    hosts: DashMap<LobbyId, HostRegistration>,
    /// Keyed by `lobbyId:clientToken`.
    clients: DashMap<String, ClientEndpoint>,
    attempts: DashMap<String, PunchAttempt>,
    /// Punch requests waiting for the host to register, per lobby.
    pending: DashMap<LobbyId, Vec<PendingRequest>>,
    outcomes: broadcast::Sender<PunchOutcome>,
}

impl PunchCoordinator {
    /// Bind the UDP socket. Port 0 picks an ephemeral port.
    pub async fn bind(config: PunchConfig) -> anyhow::Result<Arc<Self>> {
        let socket = UdpSocket::bind(("0.0.0.0", config.port)).await?;
        let port = socket.local_addr()?.port();
        let (outcomes, _) = broadcast::channel(64);
        tracing::info!(port, "NAT-punch coordinator listening");
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            port,
            config,
            hosts: DashMap::new(),
            clients: DashMap::new(),
            attempts: DashMap::new(),
            pending: DashMap::new(),
            outcomes,
        }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PunchOutcome> {
        self.outcomes.subscribe()
    }

    /// Receive loop plus periodic expiry sweep; runs until cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut buf = vec![0u8; 1500];
        let mut sweep = tokio::time::interval(Duration::from_secs(
            self.config.sweep_interval_secs.max(1),
        ));
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = sweep.tick() => self.sweep_expired(),
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, src)) => self.handle_datagram(&buf[..len], src).await,
                    Err(err) => {
                        // Windows surfaces ICMP port-unreachable as a recv
                        // error; not fatal.
                        if err.kind() != std::io::ErrorKind::ConnectionReset {
                            tracing::warn!(error = %err, "Punch socket recv error");
                        }
                    }
                }
            }
        }
        tracing::info!("NAT-punch coordinator stopped");
    }

    async fn handle_datagram(&self, data: &[u8], src: SocketAddr) {
        let Ok(text) = std::str::from_utf8(data) else {
            return;
        };
        let text = text.trim();

        if let Some(rest) = text.strip_prefix("host:") {
            if let Ok(lobby_id) = Uuid::parse_str(rest) {
                self.observe_host(lobby_id, src).await;
            }
            return;
        }

        if let Some(rest) = text.strip_prefix("client:") {
            let Some((lobby_raw, token)) = rest.split_once(':') else {
                return;
            };
            if token.is_empty() {
                return;
            }
            if let Ok(lobby_id) = Uuid::parse_str(lobby_raw) {
                self.observe_client(lobby_id, token, src).await;
            }
            return;
        }

        // `punch:` hints from peers and anything else are middlebox fodder.
        tracing::trace!(%src, "Ignoring non-registration punch datagram");
    }

    /// Record a host's UDP-observed endpoint and drain its queued requests.
    async fn observe_host(&self, lobby_id: LobbyId, src: SocketAddr) {
        let now = Instant::now();
        {
            let mut entry = self.hosts.entry(lobby_id).or_insert(HostRegistration {
                internal: None,
                external: None,
                external_from_udp: false,
                last_seen: now,
            });
            entry.external = Some(src);
            entry.external_from_udp = true;
            entry.last_seen = now;
        }
        tracing::debug!(%lobby_id, external = %src, "Host endpoint observed over UDP");
        self.drain_pending(lobby_id).await;
    }

    /// Record a client's UDP-observed endpoint and introduce if possible.
    async fn observe_client(&self, lobby_id: LobbyId, token: &str, src: SocketAddr) {
        let now = Instant::now();
        let key = client_key(lobby_id, token);
        {
            let mut entry = self.clients.entry(key).or_insert(ClientEndpoint {
                lobby_id,
                token: token.to_string(),
                internal: None,
                external: None,
                external_from_udp: false,
                discovered_at: now,
            });
            entry.external = Some(src);
            entry.external_from_udp = true;
            entry.discovered_at = now;
        }
        self.attempts
            .entry(token.to_string())
            .or_insert(PunchAttempt {
                lobby_id,
                started_at: now,
            });
        tracing::debug!(%lobby_id, token, external = %src, "Client endpoint observed over UDP");

        if !self.try_introduce(lobby_id, token).await {
            self.queue_pending(lobby_id, token);
        }
    }

    /// HTTP registration: fills whatever UDP has not observed yet.
    pub fn register_host(
        &self,
        lobby_id: LobbyId,
        internal: Option<SocketAddr>,
        external_port: Option<u16>,
        peer_ip: Option<IpAddr>,
    ) {
        let now = Instant::now();
        let mut entry = self.hosts.entry(lobby_id).or_insert(HostRegistration {
            internal: None,
            external: None,
            external_from_udp: false,
            last_seen: now,
        });
        if internal.is_some() {
            entry.internal = internal;
        }
        if !entry.external_from_udp {
            if let (Some(ip), Some(port)) = (peer_ip, external_port) {
                entry.external = Some(SocketAddr::new(ip, port));
            }
        }
        entry.last_seen = now;
        tracing::info!(%lobby_id, "Host registered for hole punching");
    }

    pub fn unregister_host(&self, lobby_id: &LobbyId) -> bool {
        self.pending.remove(lobby_id);
        self.hosts.remove(lobby_id).is_some()
    }

    pub fn host_registered(&self, lobby_id: &LobbyId) -> bool {
        self.hosts.contains_key(lobby_id)
    }

    /// HTTP punch request. Returns immediately; the punch itself happens on
    /// the UDP plane. Requests arriving before the host registers are
    /// queued and drained when it does.
    pub async fn request_punch(
        &self,
        lobby_id: LobbyId,
        client_internal: Option<SocketAddr>,
        client_port: Option<u16>,
        client_token: Option<String>,
        peer_ip: Option<IpAddr>,
    ) -> PunchRequestResult {
        let token = client_token
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(random_token);
        let now = Instant::now();

        {
            let key = client_key(lobby_id, &token);
            let mut entry = self.clients.entry(key).or_insert(ClientEndpoint {
                lobby_id,
                token: token.clone(),
                internal: None,
                external: None,
                external_from_udp: false,
                discovered_at: now,
            });
            if client_internal.is_some() {
                entry.internal = client_internal;
            }
            if !entry.external_from_udp {
                if let (Some(ip), Some(port)) = (peer_ip, client_port) {
                    entry.external = Some(SocketAddr::new(ip, port));
                }
            }
            entry.discovered_at = now;
        }
        self.attempts.entry(token.clone()).or_insert(PunchAttempt {
            lobby_id,
            started_at: now,
        });

        let host_registered = self.host_registered(&lobby_id);
        let introduced = self.try_introduce(lobby_id, &token).await;
        if !introduced {
            self.queue_pending(lobby_id, &token);
        }
        PunchRequestResult {
            token,
            host_registered,
            introduced,
        }
    }

    /// Introduce one host/client pair if both externals are known. Resolves
    /// the attempt with a positive outcome when the introduction is sent.
    async fn try_introduce(&self, lobby_id: LobbyId, token: &str) -> bool {
        let Some(introduction) = self.build_introduction(lobby_id, token) else {
            return false;
        };

        let datagram = introduction.to_datagram();
        let hint = format!("punch:{token}");
        for target in [introduction.client_external, introduction.host_external] {
            if let Err(err) = self.socket.send_to(datagram.as_bytes(), target).await {
                tracing::warn!(%target, error = %err, "Failed to send introduction");
            }
            // Unconnected hint so the middlebox sees traffic in both
            // directions even if the introduction line is lost.
            let _ = self.socket.send_to(hint.as_bytes(), target).await;
        }
        tracing::info!(
            %lobby_id,
            token,
            host = %introduction.host_external,
            client = %introduction.client_external,
            "NAT introduction sent"
        );

        self.attempts.remove(token);
        let _ = self.outcomes.send(PunchOutcome {
            lobby_id,
            token: token.to_string(),
            success: true,
        });
        true
    }

    /// Assemble the four endpoints; internals fall back to the external.
    fn build_introduction(&self, lobby_id: LobbyId, token: &str) -> Option<NatIntroduction> {
        let host = self.hosts.get(&lobby_id)?;
        let host_external = host.external?;
        let host_internal = host.internal.unwrap_or(host_external);
        drop(host);

        let client = self.clients.get(&client_key(lobby_id, token))?;
        let client_external = client.external?;
        let client_internal = client.internal.unwrap_or(client_external);
        drop(client);

        Some(NatIntroduction {
            token: token.to_string(),
            host_internal,
            host_external,
            client_internal,
            client_external,
        })
    }

    fn queue_pending(&self, lobby_id: LobbyId, token: &str) {
        let mut queue = self.pending.entry(lobby_id).or_default();
        if !queue.iter().any(|p| p.token == token) {
            queue.push(PendingRequest {
                token: token.to_string(),
                queued_at: Instant::now(),
            });
        }
    }

    /// Introduce every queued request that is still fresh.
    async fn drain_pending(&self, lobby_id: LobbyId) {
        let Some((_, queue)) = self.pending.remove(&lobby_id) else {
            return;
        };
        let ttl = Duration::from_secs(self.config.pending_ttl_secs);
        for request in queue {
            if request.queued_at.elapsed() >= ttl {
                tracing::debug!(%lobby_id, token = %request.token, "Dropping stale pending punch request");
                continue;
            }
            if !self.try_introduce(lobby_id, &request.token).await {
                self.queue_pending(lobby_id, &request.token);
            }
        }
    }

    /// Expire hosts, client endpoints, attempts and queued requests.
    /// Expired attempts resolve with a negative outcome.
    pub fn sweep_expired(&self) {
        let host_ttl = Duration::from_secs(self.config.host_ttl_secs);
        let client_ttl = Duration::from_secs(self.config.client_ttl_secs);
        let attempt_ttl = Duration::from_secs(self.config.attempt_ttl_secs);
        let pending_ttl = Duration::from_secs(self.config.pending_ttl_secs);

        self.hosts
            .retain(|_, host| host.last_seen.elapsed() < host_ttl);
        self.clients
            .retain(|_, client| client.discovered_at.elapsed() < client_ttl);
        self.pending.retain(|_, queue| {
            queue.retain(|p| p.queued_at.elapsed() < pending_ttl);
            !queue.is_empty()
        });

        let expired: Vec<(String, PunchAttempt)> = self
            .attempts
            .iter()
            .filter(|a| a.started_at.elapsed() >= attempt_ttl)
            .map(|a| (a.key().clone(), a.value().clone()))
            .collect();
        for (token, attempt) in expired {
            if self.attempts.remove(&token).is_some() {
                tracing::debug!(lobby_id = %attempt.lobby_id, token, "Punch attempt expired");
                let _ = self.outcomes.send(PunchOutcome {
                    lobby_id: attempt.lobby_id,
                    token,
                    success: false,
                });
            }
        }
    }
}

fn client_key(lobby_id: LobbyId, token: &str) -> String {
    format!("{lobby_id}:{token}")
}

fn random_token() -> String {
    let mut rng = rand::rng();
    let bits: u64 = rng.random_range(0..=0xFFFF_FFFF_FFFF);
    format!("{bits:012x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PunchConfig {
        PunchConfig {
            port: 0,
            ..PunchConfig::default()
        }
    }

    async fn recv_text(socket: &UdpSocket) -> String {
        let mut buf = vec![0u8; 1500];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for datagram")
            .expect("recv failed");
        String::from_utf8_lossy(&buf[..len]).to_string()
    }

    async fn recv_introduction(socket: &UdpSocket) -> String {
        // Skip interleaved punch hints.
        loop {
            let text = recv_text(socket).await;
            if text.starts_with("introduce:") {
                return text;
            }
        }
    }

    async fn spawn_coordinator(config: PunchConfig) -> (Arc<PunchCoordinator>, CancellationToken) {
        let coordinator = PunchCoordinator::bind(config).await.unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(coordinator.clone().run(cancel.clone()));
        (coordinator, cancel)
    }

    #[tokio::test]
    async fn udp_registration_and_introduction_flow() {
        let (coordinator, cancel) = spawn_coordinator(test_config()).await;
        let target: SocketAddr = format!("127.0.0.1:{}", coordinator.port()).parse().unwrap();
        let lobby = Uuid::new_v4();

        let host = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        host.send_to(format!("host:{lobby}").as_bytes(), target)
            .await
            .unwrap();
        // Give the host datagram a moment to land before the client asks.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut outcomes = coordinator.subscribe();
        client
            .send_to(format!("client:{lobby}:tok1").as_bytes(), target)
            .await
            .unwrap();

        let client_msg = recv_introduction(&client).await;
        let host_msg = recv_introduction(&host).await;
        assert_eq!(client_msg, host_msg);
        assert!(client_msg.starts_with("introduce:tok1|"));
        // Both observed external endpoints appear in the introduction.
        assert!(client_msg.contains(&host.local_addr().unwrap().to_string()));
        assert!(client_msg.contains(&client.local_addr().unwrap().to_string()));

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.lobby_id, lobby);
        assert!(outcome.success);

        cancel.cancel();
    }

    #[tokio::test]
    async fn client_request_queues_until_host_registers() {
        let (coordinator, cancel) = spawn_coordinator(test_config()).await;
        let target: SocketAddr = format!("127.0.0.1:{}", coordinator.port()).parse().unwrap();
        let lobby = Uuid::new_v4();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(format!("client:{lobby}:tok2").as_bytes(), target)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Host shows up afterwards; the queued request drains.
        let host = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        host.send_to(format!("host:{lobby}").as_bytes(), target)
            .await
            .unwrap();

        let host_msg = recv_introduction(&host).await;
        let client_msg = recv_introduction(&client).await;
        assert!(host_msg.starts_with("introduce:tok2|"));
        assert_eq!(host_msg, client_msg);

        cancel.cancel();
    }

    #[tokio::test]
    async fn http_request_against_unregistered_host_reports_it() {
        let coordinator = PunchCoordinator::bind(test_config()).await.unwrap();
        let lobby = Uuid::new_v4();

        let result = coordinator
            .request_punch(lobby, None, Some(7000), None, Some("203.0.113.9".parse().unwrap()))
            .await;
        assert!(!result.host_registered);
        assert!(!result.introduced);
        assert!(!result.token.is_empty());
    }

    #[tokio::test]
    async fn udp_observation_overrides_http_declared_endpoint() {
        let (coordinator, cancel) = spawn_coordinator(test_config()).await;
        let target: SocketAddr = format!("127.0.0.1:{}", coordinator.port()).parse().unwrap();
        let lobby = Uuid::new_v4();

        // HTTP claims a bogus external for the host...
        coordinator.register_host(
            lobby,
            Some("10.0.0.5:7777".parse().unwrap()),
            Some(4444),
            Some("192.0.2.99".parse().unwrap()),
        );

        // ...but UDP traffic reveals the real mapping.
        let host = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        host.send_to(format!("host:{lobby}").as_bytes(), target)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A later HTTP refresh must not clobber the UDP observation.
        coordinator.register_host(lobby, None, Some(5555), Some("192.0.2.99".parse().unwrap()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(format!("client:{lobby}:tok3").as_bytes(), target)
            .await
            .unwrap();

        let msg = recv_introduction(&client).await;
        assert!(msg.contains(&host.local_addr().unwrap().to_string()));
        assert!(!msg.contains("192.0.2.99"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn expired_attempts_resolve_negatively() {
        let config = PunchConfig {
            port: 0,
            attempt_ttl_secs: 0,
            ..PunchConfig::default()
        };
        let coordinator = PunchCoordinator::bind(config).await.unwrap();
        let lobby = Uuid::new_v4();
        let mut outcomes = coordinator.subscribe();

        let result = coordinator
            .request_punch(lobby, None, None, Some("tok4".to_string()), None)
            .await;
        assert!(!result.introduced);

        coordinator.sweep_expired();
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.token, "tok4");
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn unregister_host_clears_pending_queue() {
        let coordinator = PunchCoordinator::bind(test_config()).await.unwrap();
        let lobby = Uuid::new_v4();

        coordinator.register_host(lobby, None, Some(7000), Some("192.0.2.1".parse().unwrap()));
        assert!(coordinator.host_registered(&lobby));
        assert!(coordinator.unregister_host(&lobby));
        assert!(!coordinator.host_registered(&lobby));
        assert!(!coordinator.unregister_host(&lobby));
    }
}
