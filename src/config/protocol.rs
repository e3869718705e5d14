//! Game-session protocol settings.

use serde::{Deserialize, Serialize};

/// Settings consumed by the handshake validator and the protocol core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Exact version string; a byte-for-byte mismatch rejects the handshake.
    pub protocol_version: String,
    pub min_player_name_length: usize,
    pub max_player_name_length: usize,
    /// Lobby password. `None` means open lobby.
    pub password: Option<String>,
    /// Session capacity of one game server instance.
    pub max_sessions: usize,
    /// Drop the transport after sending a handshake rejection.
    pub disconnect_on_reject: bool,
    /// Default gameplay countdown length.
    pub countdown_seconds: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_version: "yarg-net/1".to_string(),
            min_player_name_length: 1,
            max_player_name_length: 32,
            password: None,
            max_sessions: 8,
            disconnect_on_reject: true,
            countdown_seconds: 3,
        }
    }
}
