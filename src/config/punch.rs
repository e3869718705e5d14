//! NAT-punch coordinator settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PunchConfig {
    pub enabled: bool,
    /// UDP port; overridable with the `PUNCH_PORT` environment variable.
    pub port: u16,
    /// Host registrations expire after this long without traffic.
    pub host_ttl_secs: u64,
    /// Observed client endpoints expire after this long.
    pub client_ttl_secs: u64,
    /// A punch attempt that has not been resolved by then fails.
    pub attempt_ttl_secs: u64,
    /// Queued punch requests older than this are dropped at drain time.
    pub pending_ttl_secs: u64,
    /// Expiry sweep cadence.
    pub sweep_interval_secs: u64,
}

impl Default for PunchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9051,
            host_ttl_secs: 90,
            client_ttl_secs: 60,
            attempt_ttl_secs: 30,
            pending_ttl_secs: 30,
            sweep_interval_secs: 5,
        }
    }
}
