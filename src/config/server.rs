//! Lobby directory behavior.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// A lobby whose last heartbeat is older than this is purged.
    pub lobby_ttl_secs: u64,
    /// Background purge cadence.
    pub purge_interval_secs: u64,
    /// Address advertised to clients by the punch/relay info endpoints.
    /// Falls back to `FLY_PUBLIC_IP` and then to the bind address.
    pub public_address: Option<String>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            lobby_ttl_secs: 30,
            purge_interval_secs: 10,
            public_address: None,
        }
    }
}
