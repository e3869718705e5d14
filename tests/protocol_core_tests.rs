//! End-to-end protocol-core tests: a game server driven over the in-memory
//! transport, exercised through real wire frames on both framings.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value};
use uuid::Uuid;

use rhythm_fish_server::config::ProtocolConfig;
use rhythm_fish_server::protocol::packets::{
    BinaryPacket, GameplayClockSyncPacket, GameplayStartPacket, GameplayStatePacket,
    HandshakeRequest, HandshakeResponse, ReplayCompletePacket, ReplayFramesPacket,
    ReplayRequestPacket, ScoreResultsPacket, SharedSongsChunkPacket, SongLibraryChunkPacket,
    UnisonBonusAwardPacket, UnisonPhraseHitPacket,
};
use rhythm_fish_server::protocol::{Envelope, PacketType, SONG_HASH_LEN};
use rhythm_fish_server::server::GameServer;
use rhythm_fish_server::transport::{DeliveryChannel, MemoryClient, MemoryTransport};

struct Harness {
    server: Arc<GameServer>,
    transport: MemoryTransport,
    version: String,
}

impl Harness {
    fn new(config: ProtocolConfig) -> Self {
        let version = config.protocol_version.clone();
        Self {
            server: GameServer::new(config),
            transport: MemoryTransport::new(),
            version,
        }
    }

    fn with_defaults() -> Self {
        Self::new(ProtocolConfig {
            countdown_seconds: 0,
            ..ProtocolConfig::default()
        })
    }

    fn pump(&mut self) {
        self.server.pump(&mut self.transport);
    }

    fn connect(&mut self) -> MemoryClient {
        let client = self.transport.connect();
        self.pump();
        client
    }

    fn send_envelope<T: serde::Serialize>(
        &mut self,
        client: &MemoryClient,
        packet_type: PacketType,
        payload: &T,
    ) {
        let bytes = Envelope::new(packet_type, payload, &self.version)
            .unwrap()
            .to_bytes()
            .unwrap();
        client
            .send(&bytes, DeliveryChannel::ReliableOrdered)
            .unwrap();
        self.pump();
    }

    /// Connect and complete a successful handshake. Returns the client, its
    /// session id, and the drained welcome traffic (handshake response,
    /// setlist snapshot, lobby state).
    fn join(&mut self, name: &str) -> (MemoryClient, Uuid, Vec<(DeliveryChannel, Bytes)>) {
        let client = self.connect();
        let request = HandshakeRequest {
            client_version: self.version.clone(),
            player_name: name.to_string(),
            password: None,
        };
        self.send_envelope(&client, PacketType::HandshakeRequest, &request);
        let frames = client.drain();
        let response: HandshakeResponse = find_envelope(&frames, PacketType::HandshakeResponse)
            .expect("handshake response")
            .payload_as()
            .unwrap();
        assert!(response.accepted, "handshake should be accepted");
        (client, response.session_id, frames)
    }
}

fn envelopes(frames: &[(DeliveryChannel, Bytes)]) -> Vec<Envelope> {
    frames
        .iter()
        .filter_map(|(_, bytes)| Envelope::from_slice(bytes).ok())
        .collect()
}

fn find_envelope(frames: &[(DeliveryChannel, Bytes)], packet_type: PacketType) -> Option<Envelope> {
    envelopes(frames)
        .into_iter()
        .find(|e| e.packet_type == packet_type)
}

fn last_lobby_state(frames: &[(DeliveryChannel, Bytes)]) -> Option<Value> {
    envelopes(frames)
        .into_iter()
        .filter(|e| e.packet_type == PacketType::LobbyState)
        .next_back()
        .map(|e| e.payload)
}

fn binary_frames(frames: &[(DeliveryChannel, Bytes)], packet_type: PacketType) -> Vec<Bytes> {
    frames
        .iter()
        .filter(|(_, bytes)| bytes.first() == Some(&(packet_type as u8)))
        .map(|(_, bytes)| bytes.clone())
        .collect()
}

fn hash(seed: u8) -> [u8; SONG_HASH_LEN] {
    [seed; SONG_HASH_LEN]
}

fn library_chunk(first: bool, last: bool, hashes: &[[u8; SONG_HASH_LEN]]) -> Bytes {
    let mut bytes = Vec::new();
    for h in hashes {
        bytes.extend_from_slice(h);
    }
    SongLibraryChunkPacket {
        is_first_chunk: first,
        is_final_chunk: last,
        hash_bytes: bytes,
    }
    .encode()
    .unwrap()
}

fn selection_payload(players: &[Uuid], song: &str) -> Value {
    json!({
        "song_id": song,
        "assignments": players.iter().map(|id| json!({
            "player_id": id,
            "instrument": "guitar",
            "difficulty": "expert",
        })).collect::<Vec<_>>(),
    })
}

// ===========================================================================
// Handshake
// ===========================================================================

#[tokio::test]
async fn handshake_version_mismatch_is_rejected_with_exact_reason() {
    let mut harness = Harness::with_defaults();
    let client = harness.connect();

    let request = HandshakeRequest {
        client_version: "yarg-net/2".to_string(),
        player_name: "p".to_string(),
        password: None,
    };
    harness.send_envelope(&client, PacketType::HandshakeRequest, &request);

    let response: HandshakeResponse = find_envelope(&client.drain(), PacketType::HandshakeResponse)
        .expect("handshake response")
        .payload_as()
        .unwrap();
    assert!(!response.accepted);
    assert_eq!(
        response.reason.as_deref(),
        Some("Protocol mismatch. Server requires yarg-net/1.")
    );
    assert_eq!(response.session_id, Uuid::nil());
    assert!(harness.server.sessions().is_empty());
}

#[tokio::test]
async fn accepted_handshake_joins_lobby_and_broadcasts_state() {
    let mut harness = Harness::with_defaults();
    let (host, _, _) = harness.join("alice");
    host.drain();

    let (member, _, member_frames) = harness.join("bob");
    // The joiner saw a setlist snapshot and the room state.
    assert!(find_envelope(&member_frames, PacketType::SetlistSync).is_some());
    let state = last_lobby_state(&member_frames).unwrap();
    assert_eq!(state["players"].as_array().unwrap().len(), 2);
    assert_eq!(state["players"][0]["role"], json!("host"));
    assert_eq!(state["players"][0]["display_name"], json!("alice"));

    // The host also observed the join through a state broadcast.
    let host_state = last_lobby_state(&host.drain()).unwrap();
    assert_eq!(host_state["players"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn server_full_rejects_with_reason() {
    let mut harness = Harness::new(ProtocolConfig {
        max_sessions: 1,
        countdown_seconds: 0,
        ..ProtocolConfig::default()
    });
    let (_host, _, _) = harness.join("alice");

    let client = harness.connect();
    let request = HandshakeRequest {
        client_version: "yarg-net/1".to_string(),
        player_name: "late".to_string(),
        password: None,
    };
    harness.send_envelope(&client, PacketType::HandshakeRequest, &request);
    let response: HandshakeResponse = find_envelope(&client.drain(), PacketType::HandshakeResponse)
        .expect("handshake response")
        .payload_as()
        .unwrap();
    assert!(!response.accepted);
    assert_eq!(response.reason.as_deref(), Some("Server is full"));
}

// ===========================================================================
// Lobby flow
// ===========================================================================

#[tokio::test]
async fn ready_countdown_cancel_flow() {
    let mut harness = Harness::with_defaults();
    let (host, host_sid, _) = harness.join("alice");
    let (member, member_sid, _) = harness.join("bob");
    host.drain();
    member.drain();

    // Song selection moves the room out of Idle.
    harness.send_envelope(
        &host,
        PacketType::SongSelection,
        &selection_payload(&[host_sid, member_sid], "s"),
    );
    let state = last_lobby_state(&member.drain()).unwrap();
    assert_eq!(state["status"], json!("selecting_song"));

    harness.send_envelope(&host, PacketType::SetReady, &json!({"ready": true}));
    let state = last_lobby_state(&member.drain()).unwrap();
    assert_eq!(state["status"], json!("selecting_song"));

    harness.send_envelope(&member, PacketType::SetReady, &json!({"ready": true}));
    let state = last_lobby_state(&member.drain()).unwrap();
    assert_eq!(state["status"], json!("ready_to_play"));
    assert_eq!(state["selection"]["all_ready"], json!(true));

    // Host starts a 3 second countdown; the announcement precedes the state.
    harness.send_envelope(
        &host,
        PacketType::GameplayCountdown,
        &json!({"seconds": 3}),
    );
    let frames = member.drain();
    let countdown = find_envelope(&frames, PacketType::GameplayCountdown).unwrap();
    assert_eq!(countdown.payload["seconds"], json!(3));
    let state = last_lobby_state(&frames).unwrap();
    assert_eq!(state["status"], json!("in_countdown"));

    // Going unready cancels the countdown.
    harness.send_envelope(&member, PacketType::SetReady, &json!({"ready": false}));
    let state = last_lobby_state(&member.drain()).unwrap();
    assert_eq!(state["status"], json!("selecting_song"));
}

#[tokio::test]
async fn countdown_completion_starts_gameplay() {
    let mut harness = Harness::with_defaults();
    let (host, host_sid, _) = harness.join("alice");

    harness.send_envelope(
        &host,
        PacketType::SongSelection,
        &selection_payload(&[host_sid], "anthem"),
    );
    harness.send_envelope(&host, PacketType::SetReady, &json!({"ready": true}));
    // seconds=0 falls back to the configured default, which is also 0 here.
    harness.send_envelope(&host, PacketType::GameplayCountdown, &json!({"seconds": 0}));

    // The zero-length countdown completes on the next pump.
    harness.pump();
    let frames = host.drain();
    let starts = binary_frames(&frames, PacketType::GameplayStart);
    assert_eq!(starts.len(), 1);
    let start = GameplayStartPacket::decode(&starts[0]).unwrap();
    assert_eq!(start.song_hash, "anthem");
    // The shared-clock deadline sits a little ahead of "now".
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64();
    assert!(start.start_at > now);
    assert!(start.start_at < now + 5.0);
    // A score/replay collection opened for the song.
    assert_eq!(harness.server.collector().tracked_songs(), 1);
}

#[tokio::test]
async fn non_host_cannot_start_countdown() {
    let mut harness = Harness::with_defaults();
    let (host, host_sid, _) = harness.join("alice");
    let (member, member_sid, _) = harness.join("bob");

    harness.send_envelope(
        &host,
        PacketType::SongSelection,
        &selection_payload(&[host_sid, member_sid], "s"),
    );
    harness.send_envelope(&host, PacketType::SetReady, &json!({"ready": true}));
    harness.send_envelope(&member, PacketType::SetReady, &json!({"ready": true}));
    member.drain();

    harness.send_envelope(&member, PacketType::GameplayCountdown, &json!({"seconds": 3}));
    // Handler error is isolated; no countdown announcement went out.
    assert!(find_envelope(&member.drain(), PacketType::GameplayCountdown).is_none());
}

#[tokio::test]
async fn host_disconnect_promotes_first_member() {
    let mut harness = Harness::with_defaults();
    let (host, _, _) = harness.join("alice");
    let (member, member_sid, _) = harness.join("bob");
    member.drain();

    host.disconnect();
    harness.pump();

    let state = last_lobby_state(&member.drain()).unwrap();
    let players = state["players"].as_array().unwrap();
    assert_eq!(players.len(), 1);
    assert_eq!(players[0]["session_id"], json!(member_sid));
    assert_eq!(players[0]["role"], json!("host"));
}

#[tokio::test]
async fn song_selection_resets_ready_flags() {
    let mut harness = Harness::with_defaults();
    let (host, host_sid, _) = harness.join("alice");

    harness.send_envelope(
        &host,
        PacketType::SongSelection,
        &selection_payload(&[host_sid], "one"),
    );
    harness.send_envelope(&host, PacketType::SetReady, &json!({"ready": true}));
    let state = last_lobby_state(&host.drain()).unwrap();
    assert_eq!(state["status"], json!("ready_to_play"));

    harness.send_envelope(
        &host,
        PacketType::SongSelection,
        &selection_payload(&[host_sid], "two"),
    );
    let state = last_lobby_state(&host.drain()).unwrap();
    assert_eq!(state["status"], json!("selecting_song"));
    assert_eq!(state["players"][0]["is_ready"], json!(false));
}

// ===========================================================================
// Setlist over the wire
// ===========================================================================

#[tokio::test]
async fn setlist_add_broadcasts_snapshot_with_adder_name() {
    let mut harness = Harness::with_defaults();
    let (host, _, _) = harness.join("alice");
    let (member, _, _) = harness.join("bob");
    host.drain();
    member.drain();

    harness.send_envelope(
        &member,
        PacketType::SetlistAdd,
        &json!({
            "song_hash": "abc123",
            "song_name": "Anthem",
            "song_artist": "The Band",
        }),
    );

    let sync = find_envelope(&host.drain(), PacketType::SetlistSync).unwrap();
    let serialized = sync.payload["serialized"].as_str().unwrap();
    assert_eq!(serialized, "abc123|Anthem|The Band|bob");

    // Duplicate is rejected; no new broadcast goes out.
    harness.send_envelope(
        &member,
        PacketType::SetlistAdd,
        &json!({
            "song_hash": "ABC123",
            "song_name": "Anthem",
            "song_artist": "The Band",
        }),
    );
    assert!(find_envelope(&host.drain(), PacketType::SetlistSync).is_none());
}

// ===========================================================================
// Binary relay table
// ===========================================================================

#[tokio::test]
async fn gameplay_state_is_relayed_to_others_only() {
    let mut harness = Harness::with_defaults();
    let (host, _, _) = harness.join("alice");
    let (member, _, _) = harness.join("bob");
    host.drain();
    member.drain();

    let frame = GameplayStatePacket {
        player_id: Uuid::new_v4(),
        snapshot: vec![1, 2, 3],
    }
    .encode()
    .unwrap();
    host.send(&frame, DeliveryChannel::ReliableSequenced).unwrap();
    harness.pump();

    let relayed = binary_frames(&member.drain(), PacketType::GameplayState);
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0], frame);
    // The sender does not get its own snapshot back.
    assert!(binary_frames(&host.drain(), PacketType::GameplayState).is_empty());
}

#[tokio::test]
async fn unauthenticated_binary_frames_are_dropped() {
    let mut harness = Harness::with_defaults();
    let (member, _, _) = harness.join("bob");
    member.drain();

    let lurker = harness.connect();
    let frame = GameplayStatePacket {
        player_id: Uuid::new_v4(),
        snapshot: vec![9],
    }
    .encode()
    .unwrap();
    lurker.send(&frame, DeliveryChannel::ReliableSequenced).unwrap();
    harness.pump();

    assert!(binary_frames(&member.drain(), PacketType::GameplayState).is_empty());
}

#[tokio::test]
async fn unison_phrase_completion_awards_once() {
    let mut harness = Harness::with_defaults();
    let (host, host_sid, _) = harness.join("alice");
    let (member, member_sid, _) = harness.join("bob");

    // Get into gameplay so the expected band size (2) is armed.
    harness.send_envelope(
        &host,
        PacketType::SongSelection,
        &selection_payload(&[host_sid, member_sid], "s"),
    );
    harness.send_envelope(&host, PacketType::SetReady, &json!({"ready": true}));
    harness.send_envelope(&member, PacketType::SetReady, &json!({"ready": true}));
    harness.send_envelope(&host, PacketType::GameplayCountdown, &json!({"seconds": 0}));
    harness.pump();
    host.drain();
    member.drain();

    let hit = |player: Uuid| {
        UnisonPhraseHitPacket {
            player_id: player,
            band_id: 0,
            phrase_time: 12.0,
            phrase_end_time: 14.0,
        }
        .encode()
        .unwrap()
    };

    host.send(&hit(host_sid), DeliveryChannel::ReliableSequenced)
        .unwrap();
    harness.pump();
    // The hit is relayed to the other player, no award yet.
    assert_eq!(
        binary_frames(&member.drain(), PacketType::UnisonPhraseHit).len(),
        1
    );
    assert!(binary_frames(&host.drain(), PacketType::UnisonBonusAward).is_empty());

    member
        .send(&hit(member_sid), DeliveryChannel::ReliableSequenced)
        .unwrap();
    harness.pump();

    // Both players receive exactly one award.
    let host_awards = binary_frames(&host.drain(), PacketType::UnisonBonusAward);
    let member_awards = binary_frames(&member.drain(), PacketType::UnisonBonusAward);
    assert_eq!(host_awards.len(), 1);
    assert_eq!(member_awards.len(), 1);
    let award = UnisonBonusAwardPacket::decode(&host_awards[0]).unwrap();
    assert_eq!(award.band_id, 0);

    // A replayed hit does not award again.
    member
        .send(&hit(member_sid), DeliveryChannel::ReliableSequenced)
        .unwrap();
    harness.pump();
    assert!(binary_frames(&host.drain(), PacketType::UnisonBonusAward).is_empty());
}

// ===========================================================================
// Score and replay collection over the wire
// ===========================================================================

/// Drive a two-player lobby into gameplay for the given song.
fn enter_gameplay(
    harness: &mut Harness,
    host: &MemoryClient,
    host_sid: Uuid,
    member: &MemoryClient,
    member_sid: Uuid,
    song: &str,
) {
    harness.send_envelope(
        host,
        PacketType::SongSelection,
        &selection_payload(&[host_sid, member_sid], song),
    );
    harness.send_envelope(host, PacketType::SetReady, &json!({"ready": true}));
    harness.send_envelope(member, PacketType::SetReady, &json!({"ready": true}));
    harness.send_envelope(host, PacketType::GameplayCountdown, &json!({"seconds": 0}));
    harness.pump();
    host.drain();
    member.drain();
}

#[tokio::test]
async fn score_results_are_relayed_and_collected() {
    let mut harness = Harness::with_defaults();
    let (host, host_sid, _) = harness.join("alice");
    let (member, member_sid, _) = harness.join("bob");
    enter_gameplay(&mut harness, &host, host_sid, &member, member_sid, "encore");

    let results = ScoreResultsPacket {
        player_id: host_sid,
        score: 123_456,
        stars: 5,
        best_combo: 512,
        notes_hit: 980,
        notes_total: 1000,
    }
    .encode()
    .unwrap();
    host.send(&results, DeliveryChannel::ReliableSequenced)
        .unwrap();
    harness.pump();

    // The other player sees the frame; the sender does not.
    assert_eq!(
        binary_frames(&member.drain(), PacketType::ScoreResults).len(),
        1
    );
    assert!(binary_frames(&host.drain(), PacketType::ScoreResults).is_empty());

    // And the collector kept it for the current song.
    let collected = harness.server.collector().scores_for("encore");
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].score, 123_456);

    // The running band score is tracked the same way.
    let band = rhythm_fish_server::protocol::packets::BandScoreUpdatePacket {
        total_score: 456_789,
        multiplier: 4,
    }
    .encode()
    .unwrap();
    host.send(&band, DeliveryChannel::ReliableSequenced).unwrap();
    harness.pump();
    assert_eq!(
        binary_frames(&member.drain(), PacketType::BandScoreUpdate).len(),
        1
    );
    let band = harness.server.collector().band_score_for("encore").unwrap();
    assert_eq!(band.total_score, 456_789);
}

#[tokio::test]
async fn replay_streams_are_collected_and_served_on_request() {
    let mut harness = Harness::with_defaults();
    let (host, host_sid, _) = harness.join("alice");
    let (member, member_sid, _) = harness.join("bob");
    enter_gameplay(&mut harness, &host, host_sid, &member, member_sid, "ballad");

    // The host streams its replay up in two chunks and seals it.
    for (count, bytes) in [(2u16, vec![1u8, 2]), (3u16, vec![3u8, 4, 5])] {
        let chunk = ReplayFramesPacket {
            player_id: host_sid,
            frame_count: count,
            frames: bytes,
        }
        .encode()
        .unwrap();
        host.send(&chunk, DeliveryChannel::ReliableOrdered).unwrap();
    }
    let done = ReplayCompletePacket {
        player_id: host_sid,
    }
    .encode()
    .unwrap();
    host.send(&done, DeliveryChannel::ReliableOrdered).unwrap();
    harness.pump();

    // Replay uploads go to the collector, not to the other players.
    assert!(binary_frames(&member.drain(), PacketType::ReplayFrames).is_empty());

    // The member pulls the stored replay by song hash.
    let request = ReplayRequestPacket {
        song_hash: "ballad".to_string(),
    }
    .encode()
    .unwrap();
    member.send(&request, DeliveryChannel::ReliableOrdered).unwrap();
    harness.pump();

    let frames = member.drain();
    let streams = binary_frames(&frames, PacketType::ReplayFrames);
    assert_eq!(streams.len(), 1);
    let stream = ReplayFramesPacket::decode(&streams[0]).unwrap();
    assert_eq!(stream.player_id, host_sid);
    assert_eq!(stream.frame_count, 5);
    assert_eq!(stream.frames, vec![1, 2, 3, 4, 5]);
    let markers = binary_frames(&frames, PacketType::ReplayComplete);
    assert_eq!(markers.len(), 1);
    assert_eq!(
        ReplayCompletePacket::decode(&markers[0]).unwrap().player_id,
        host_sid
    );

    // An unknown song hash serves nothing.
    let request = ReplayRequestPacket {
        song_hash: "no-such-song".to_string(),
    }
    .encode()
    .unwrap();
    member.send(&request, DeliveryChannel::ReliableOrdered).unwrap();
    harness.pump();
    assert!(binary_frames(&member.drain(), PacketType::ReplayFrames).is_empty());
}

#[tokio::test]
async fn clock_sync_is_forwarded_only_from_the_host() {
    let mut harness = Harness::with_defaults();
    let (host, _, _) = harness.join("alice");
    let (member, _, _) = harness.join("bob");
    host.drain();
    member.drain();

    let beat = GameplayClockSyncPacket {
        host_time: 12.5,
        song_time: 11.875,
    }
    .encode()
    .unwrap();

    host.send(&beat, DeliveryChannel::ReliableSequenced).unwrap();
    harness.pump();
    assert_eq!(
        binary_frames(&member.drain(), PacketType::GameplayClockSync).len(),
        1
    );

    // A member is not the clock authority; its beats are dropped.
    member
        .send(&beat, DeliveryChannel::ReliableSequenced)
        .unwrap();
    harness.pump();
    assert!(binary_frames(&host.drain(), PacketType::GameplayClockSync).is_empty());
}

// ===========================================================================
// Shared library over the wire
// ===========================================================================

#[tokio::test]
async fn shared_library_intersection_flows_to_clients() {
    let mut harness = Harness::with_defaults();
    let (a, _, _) = harness.join("alice");
    let (b, _, _) = harness.join("bob");
    a.drain();
    b.drain();

    a.send(
        &library_chunk(true, true, &[hash(1), hash(2), hash(3)]),
        DeliveryChannel::ReliableOrdered,
    )
    .unwrap();
    harness.pump();
    a.drain();
    b.drain();

    b.send(
        &library_chunk(true, true, &[hash(2), hash(3), hash(4)]),
        DeliveryChannel::ReliableOrdered,
    )
    .unwrap();
    harness.pump();

    // Everyone receives the new intersection: exactly {h2, h3}.
    let chunks = binary_frames(&a.drain(), PacketType::SharedSongsChunk);
    assert_eq!(chunks.len(), 1);
    let chunk = SharedSongsChunkPacket::decode(&chunks[0]).unwrap();
    assert!(chunk.is_first_chunk && chunk.is_final_chunk);
    assert_eq!(chunk.hash_bytes.len(), 2 * SONG_HASH_LEN);
    assert_eq!(harness.server.shared_library().shared_count(), 2);

    // A leaves; the intersection becomes B's whole library.
    a.disconnect();
    harness.pump();
    let chunks = binary_frames(&b.drain(), PacketType::SharedSongsChunk);
    assert_eq!(chunks.len(), 1);
    let chunk = SharedSongsChunkPacket::decode(&chunks[0]).unwrap();
    assert_eq!(chunk.hash_bytes.len(), 3 * SONG_HASH_LEN);
}

#[tokio::test]
async fn empty_intersection_still_announced() {
    let mut harness = Harness::with_defaults();
    let (a, _, _) = harness.join("alice");
    let (b, _, _) = harness.join("bob");
    a.drain();
    b.drain();

    a.send(
        &library_chunk(true, true, &[hash(1)]),
        DeliveryChannel::ReliableOrdered,
    )
    .unwrap();
    harness.pump();
    a.drain();
    b.drain();

    // Disjoint library: the intersection collapses to empty.
    b.send(
        &library_chunk(true, true, &[hash(9)]),
        DeliveryChannel::ReliableOrdered,
    )
    .unwrap();
    harness.pump();

    let chunks = binary_frames(&a.drain(), PacketType::SharedSongsChunk);
    assert_eq!(chunks.len(), 1);
    let chunk = SharedSongsChunkPacket::decode(&chunks[0]).unwrap();
    assert!(chunk.is_final_chunk);
    assert!(chunk.hash_bytes.is_empty());
}

// ===========================================================================
// Dispatcher behavior end to end
// ===========================================================================

#[tokio::test]
async fn malformed_envelope_does_not_drop_the_connection() {
    let mut harness = Harness::with_defaults();
    let (client, _, _) = harness.join("alice");
    client.drain();

    client
        .send(b"{\"type\": ", DeliveryChannel::ReliableOrdered)
        .unwrap();
    harness.pump();

    // Still in the lobby and still reachable.
    assert_eq!(harness.server.sessions().len(), 1);
    harness.send_envelope(&client, PacketType::SetlistSync, &json!({"serialized": ""}));
    assert!(find_envelope(&client.drain(), PacketType::SetlistSync).is_some());
}

#[tokio::test]
async fn envelope_with_numeric_type_is_dispatched() {
    let mut harness = Harness::with_defaults();
    let (client, _, _) = harness.join("alice");
    client.drain();

    // SetReady by ordinal (11) instead of name.
    let frame = format!(
        r#"{{"type": 11, "payload": {{"ready": true}}, "version": "{}"}}"#,
        harness.version
    );
    client
        .send(frame.as_bytes(), DeliveryChannel::ReliableOrdered)
        .unwrap();
    harness.pump();

    let state = last_lobby_state(&client.drain()).unwrap();
    assert_eq!(state["players"][0]["is_ready"], json!(true));
}
