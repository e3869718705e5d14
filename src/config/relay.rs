//! UDP relay settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    /// UDP port; overridable with the `RELAY_PORT` environment variable.
    pub port: u16,
    /// Sessions are garbage-collected after this long without activity.
    pub session_ttl_secs: u64,
    /// Garbage-collection cadence.
    pub sweep_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9052,
            session_ttl_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}
