//! Root configuration type.

use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use super::protocol::ProtocolConfig;
use super::punch::PunchConfig;
use super::relay::RelayConfig;
use super::server::DirectoryConfig;

/// Deployment diagnostics picked up from the environment (Fly.io shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub fly_app_name: Option<String>,
    pub fly_public_ip: Option<String>,
    pub fly_alloc_id: Option<String>,
}

/// Root configuration of the rendezvous process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP directory port.
    pub port: u16,
    pub server: DirectoryConfig,
    pub protocol: ProtocolConfig,
    pub punch: PunchConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9050,
            server: DirectoryConfig::default(),
            protocol: ProtocolConfig::default(),
            punch: PunchConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl Config {
    /// Address advertised by the punch/relay info endpoints.
    pub fn advertised_address(&self) -> Option<String> {
        self.server
            .public_address
            .clone()
            .or_else(|| self.diagnostics.fly_public_ip.clone())
    }
}
