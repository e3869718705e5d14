//! Player-name validation shared by both handshake variants.

use crate::config::ProtocolConfig;

/// Printable-ASCII check plus configured length bounds. The name is trimmed
/// before the bounds are applied.
pub fn validate_player_name(name: &str, config: &ProtocolConfig) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.len() < config.min_player_name_length {
        return Err(format!(
            "Player name must be at least {} character(s)",
            config.min_player_name_length
        ));
    }
    if trimmed.len() > config.max_player_name_length {
        return Err(format!(
            "Player name too long (max {} characters)",
            config.max_player_name_length
        ));
    }
    if !trimmed.chars().all(|c| ('\x20'..='\x7e').contains(&c)) {
        return Err("Player name contains invalid characters".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            min_player_name_length: 2,
            max_player_name_length: 16,
            ..ProtocolConfig::default()
        }
    }

    #[test]
    fn accepts_names_at_both_bounds() {
        let cfg = config();
        assert!(validate_player_name("ab", &cfg).is_ok());
        assert!(validate_player_name(&"x".repeat(16), &cfg).is_ok());
    }

    #[test]
    fn rejects_one_outside_each_bound() {
        let cfg = config();
        assert!(validate_player_name("a", &cfg).is_err());
        assert!(validate_player_name(&"x".repeat(17), &cfg).is_err());
    }

    #[test]
    fn trims_before_measuring() {
        let cfg = config();
        assert!(validate_player_name("  ab  ", &cfg).is_ok());
        assert!(validate_player_name("  a  ", &cfg).is_err());
    }

    #[test]
    fn rejects_non_printable_ascii() {
        let cfg = config();
        assert!(validate_player_name("ta\tb", &cfg).is_err());
        assert!(validate_player_name("héro", &cfg).is_err());
        assert!(validate_player_name("a\u{7f}b", &cfg).is_err());
    }

    #[test]
    fn space_and_tilde_are_printable() {
        let cfg = config();
        assert!(validate_player_name("a b~", &cfg).is_ok());
    }
}
