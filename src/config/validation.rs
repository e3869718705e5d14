//! Configuration sanity checks.

use super::Config;

/// Validate cross-field constraints. `load()` logs failures and continues;
/// `main` propagates them.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut problems = Vec::new();

    if config.protocol.min_player_name_length > config.protocol.max_player_name_length {
        problems.push(format!(
            "protocol.min_player_name_length ({}) exceeds max_player_name_length ({})",
            config.protocol.min_player_name_length, config.protocol.max_player_name_length
        ));
    }
    if config.protocol.max_sessions == 0 {
        problems.push("protocol.max_sessions must be at least 1".to_string());
    }
    if config.protocol.protocol_version.trim().is_empty() {
        problems.push("protocol.protocol_version must not be empty".to_string());
    }

    let mut ports = vec![("port", config.port)];
    if config.punch.enabled {
        ports.push(("punch.port", config.punch.port));
    }
    if config.relay.enabled {
        ports.push(("relay.port", config.relay.port));
    }
    for (i, (name_a, port_a)) in ports.iter().enumerate() {
        for (name_b, port_b) in ports.iter().skip(i + 1) {
            // Port 0 means "pick an ephemeral port" and may repeat.
            if port_a == port_b && *port_a != 0 {
                problems.push(format!("{name_a} and {name_b} both bind port {port_a}"));
            }
        }
    }

    if config.server.lobby_ttl_secs == 0 {
        problems.push("server.lobby_ttl_secs must be at least 1".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("\n"))
    }
}
