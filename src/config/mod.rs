//! Configuration for the rendezvous process and the embedded protocol core.
//!
//! Supports JSON configuration files, `RHYTHM_FISH__*` environment variable
//! overrides with `__` as the nesting separator, the deployment-legacy
//! `PUNCH_PORT`/`RELAY_PORT`/`FLY_*` variables, and compiled-in defaults.
//!
//! # Module structure
//!
//! - [`types`]: root `Config` struct and diagnostics block
//! - [`server`]: lobby directory behavior (TTL, advertised address)
//! - [`protocol`]: session protocol settings (version, names, capacity)
//! - [`punch`]: NAT-punch coordinator (port, TTLs)
//! - [`relay`]: UDP relay (port, session TTL)
//! - [`logging`]: log level/format/file settings
//! - [`loader`]: layered configuration loading
//! - [`validation`]: cross-field sanity checks

pub mod loader;
pub mod logging;
pub mod protocol;
pub mod punch;
pub mod relay;
pub mod server;
pub mod types;
pub mod validation;

pub use loader::load;

pub use logging::{LogFormat, LogLevel, LoggingConfig};

pub use protocol::ProtocolConfig;

pub use punch::PunchConfig;

pub use relay::RelayConfig;

pub use server::DirectoryConfig;

pub use types::{Config, DiagnosticsConfig};

pub use validation::validate_config;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.port, 9050);
        assert_eq!(config.server.lobby_ttl_secs, 30);
        assert_eq!(config.punch.port, 9051);
        assert_eq!(config.punch.host_ttl_secs, 90);
        assert_eq!(config.punch.client_ttl_secs, 60);
        assert_eq!(config.punch.attempt_ttl_secs, 30);
        assert_eq!(config.relay.port, 9052);
        assert_eq!(config.relay.session_ttl_secs, 1800);
        assert_eq!(config.protocol.protocol_version, "yarg-net/1");
        assert_eq!(config.protocol.max_player_name_length, 32);
        assert_eq!(config.protocol.max_sessions, 8);
        assert!(config.protocol.disconnect_on_reject);

        assert_eq!(config.logging.dir, "logs");
        assert_eq!(config.logging.filename, "server.log");
        assert_eq!(config.logging.rotation, "daily");
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(config.port, deserialized.port);
        assert_eq!(config.punch.port, deserialized.punch.port);
        assert_eq!(config.relay.port, deserialized.relay.port);
        assert_eq!(
            config.protocol.protocol_version,
            deserialized.protocol.protocol_version
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "port": 9999,
            "punch": {"port": 9061},
            "protocol": {"max_sessions": 16}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.port, 9999);
        assert_eq!(config.punch.port, 9061);
        assert_eq!(config.protocol.max_sessions, 16);
        // Unspecified fields stay at their defaults.
        assert_eq!(config.relay.port, 9052);
        assert_eq!(config.punch.host_ttl_secs, 90);
    }

    #[test]
    fn test_advertised_address_prefers_explicit_config() {
        let mut config = Config::default();
        assert_eq!(config.advertised_address(), None);

        config.diagnostics.fly_public_ip = Some("198.51.100.7".to_string());
        assert_eq!(
            config.advertised_address().as_deref(),
            Some("198.51.100.7")
        );

        config.server.public_address = Some("game.example.net".to_string());
        assert_eq!(
            config.advertised_address().as_deref(),
            Some("game.example.net")
        );
    }
}
