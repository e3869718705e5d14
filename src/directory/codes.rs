//! Short-code aliases for lobby ids.
//!
//! A code is 6 uppercase hex characters drawn from 3 cryptographically
//! random bytes (24 bits, ~16M codes). Allocation reserves the code with an
//! atomic try-insert so two concurrent draws can never share one; the code
//! map and the reverse map always agree.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::RngExt;
use thiserror::Error;

use crate::protocol::types::LobbyId;

/// Codes are always exactly this many characters.
pub const SHORT_CODE_LEN: usize = 6;

/// Distinct random draws before giving up; exhausting this is a server
/// error surfaced as HTTP 500.
const MAX_ALLOCATION_ATTEMPTS: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("code must be exactly {SHORT_CODE_LEN} characters")]
    BadLength,
    #[error("failed to allocate a unique code after {MAX_ALLOCATION_ATTEMPTS} attempts")]
    Exhausted,
}

#[derive(Default)]
pub struct ShortCodeRegistry {
    codes: DashMap<String, LobbyId>,
    by_lobby: DashMap<LobbyId, String>,
}

impl ShortCodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a code for a lobby; a lobby that already has one gets the
    /// same code back.
    pub fn allocate(&self, lobby_id: LobbyId) -> Result<String, CodeError> {
        match self.by_lobby.entry(lobby_id) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                for _ in 0..MAX_ALLOCATION_ATTEMPTS {
                    let code = random_code();
                    // Reservation-before-return: the try-insert claims the
                    // code atomically, so a concurrent draw of the same code
                    // loses and redraws.
                    match self.codes.entry(code.clone()) {
                        Entry::Occupied(_) => continue,
                        Entry::Vacant(code_slot) => {
                            code_slot.insert(lobby_id);
                            slot.insert(code.clone());
                            return Ok(code);
                        }
                    }
                }
                Err(CodeError::Exhausted)
            }
        }
    }

    /// Case-insensitive lookup.
    pub fn lookup(&self, code: &str) -> Result<Option<LobbyId>, CodeError> {
        let normalized = normalize(code)?;
        Ok(self.codes.get(&normalized).map(|id| *id))
    }

    /// Release by code; drops both map sides.
    pub fn release_code(&self, code: &str) -> Result<bool, CodeError> {
        let normalized = normalize(code)?;
        let Some((_, lobby_id)) = self.codes.remove(&normalized) else {
            return Ok(false);
        };
        self.by_lobby.remove(&lobby_id);
        Ok(true)
    }

    /// Release by lobby; drops both map sides.
    pub fn release_lobby(&self, lobby_id: &LobbyId) -> bool {
        let Some((_, code)) = self.by_lobby.remove(lobby_id) else {
            return false;
        };
        self.codes.remove(&code);
        true
    }

    pub fn code_for(&self, lobby_id: &LobbyId) -> Option<String> {
        self.by_lobby.get(lobby_id).map(|code| code.clone())
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

fn normalize(code: &str) -> Result<String, CodeError> {
    if code.chars().count() != SHORT_CODE_LEN {
        return Err(CodeError::BadLength);
    }
    Ok(code.to_ascii_uppercase())
}

/// Three CSPRNG bytes rendered as six uppercase hex characters.
fn random_code() -> String {
    let mut rng = rand::rng();
    let bits: u32 = rng.random_range(0..=0x00FF_FFFF);
    format!("{bits:06X}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn generated_codes_are_six_uppercase_hex() {
        for _ in 0..64 {
            let code = random_code();
            assert_eq!(code.len(), SHORT_CODE_LEN);
            assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn allocation_is_idempotent_per_lobby() {
        let registry = ShortCodeRegistry::new();
        let lobby = Uuid::new_v4();
        let first = registry.allocate(lobby).unwrap();
        let second = registry.allocate(lobby).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ShortCodeRegistry::new();
        let lobby = Uuid::new_v4();
        let code = registry.allocate(lobby).unwrap();
        assert_eq!(
            registry.lookup(&code.to_lowercase()).unwrap(),
            Some(lobby)
        );
    }

    #[test]
    fn wrong_length_is_rejected() {
        let registry = ShortCodeRegistry::new();
        assert_eq!(registry.lookup("ABC").unwrap_err(), CodeError::BadLength);
        assert_eq!(
            registry.release_code("ABCDEFG").unwrap_err(),
            CodeError::BadLength
        );
    }

    #[test]
    fn release_by_code_drops_both_sides() {
        let registry = ShortCodeRegistry::new();
        let lobby = Uuid::new_v4();
        let code = registry.allocate(lobby).unwrap();

        assert!(registry.release_code(&code).unwrap());
        assert_eq!(registry.lookup(&code).unwrap(), None);
        assert_eq!(registry.code_for(&lobby), None);
        assert!(!registry.release_code(&code).unwrap());
    }

    #[test]
    fn release_by_lobby_drops_both_sides() {
        let registry = ShortCodeRegistry::new();
        let lobby = Uuid::new_v4();
        let code = registry.allocate(lobby).unwrap();

        assert!(registry.release_lobby(&lobby));
        assert_eq!(registry.lookup(&code).unwrap(), None);
        assert!(!registry.release_lobby(&lobby));
    }

    #[test]
    fn maps_agree_across_many_allocations() {
        let registry = ShortCodeRegistry::new();
        let lobbies: Vec<LobbyId> = (0..50).map(|_| Uuid::new_v4()).collect();
        for lobby in &lobbies {
            registry.allocate(*lobby).unwrap();
        }
        for lobby in &lobbies {
            let code = registry.code_for(lobby).unwrap();
            assert_eq!(registry.lookup(&code).unwrap(), Some(*lobby));
        }
        assert_eq!(registry.len(), lobbies.len());
    }
}
