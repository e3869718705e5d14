//! Handshake validation and session creation.
//!
//! Validation order is fixed; the first failure wins:
//! 1. exact protocol-version string match
//! 2. player-name rules (trimmed length bounds, printable ASCII, optional
//!    caller-supplied predicate)
//! 3. configured password, compared exactly
//! 4. session creation (connection not yet bound, capacity available)

use std::sync::Arc;

use uuid::Uuid;

use crate::config::ProtocolConfig;
use crate::protocol::packets::{HandshakeRequest, HandshakeResponse};
use crate::protocol::validation::validate_player_name;
use crate::session::manager::{SessionError, SessionManager, SessionRecord};
use crate::transport::PeerConnection;

/// Extra caller-supplied name filter (profanity lists, reserved names...).
pub type NamePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Result of processing one handshake request.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub response: HandshakeResponse,
    /// Present only when the handshake was accepted.
    pub session: Option<SessionRecord>,
}

impl HandshakeOutcome {
    fn rejected(reason: String) -> Self {
        Self {
            response: HandshakeResponse {
                accepted: false,
                reason: Some(reason),
                session_id: Uuid::nil(),
            },
            session: None,
        }
    }
}

pub struct HandshakeValidator {
    config: ProtocolConfig,
    sessions: Arc<SessionManager>,
    name_predicate: Option<NamePredicate>,
}

impl HandshakeValidator {
    pub fn new(config: ProtocolConfig, sessions: Arc<SessionManager>) -> Self {
        Self {
            config,
            sessions,
            name_predicate: None,
        }
    }

    pub fn with_name_predicate(mut self, predicate: NamePredicate) -> Self {
        self.name_predicate = Some(predicate);
        self
    }

    /// Whether a rejected handshake should also drop the transport.
    pub fn disconnect_on_reject(&self) -> bool {
        self.config.disconnect_on_reject
    }

    pub fn process(
        &self,
        request: &HandshakeRequest,
        connection: Arc<dyn PeerConnection>,
    ) -> HandshakeOutcome {
        if request.client_version != self.config.protocol_version {
            return HandshakeOutcome::rejected(format!(
                "Protocol mismatch. Server requires {}.",
                self.config.protocol_version
            ));
        }

        if let Err(reason) = validate_player_name(&request.player_name, &self.config) {
            return HandshakeOutcome::rejected(reason);
        }
        let trimmed_name = request.player_name.trim();
        if let Some(predicate) = &self.name_predicate {
            if !predicate(trimmed_name) {
                return HandshakeOutcome::rejected("Player name not allowed".to_string());
            }
        }

        if let Some(expected) = &self.config.password {
            let provided = request.password.as_deref().unwrap_or_default();
            if provided != expected {
                return HandshakeOutcome::rejected("Invalid password".to_string());
            }
        }

        match self.sessions.try_create_session(connection, trimmed_name) {
            Ok(record) => {
                tracing::info!(
                    session_id = %record.session_id,
                    connection_id = record.connection_id,
                    player_name = %record.player_name,
                    "Handshake accepted"
                );
                HandshakeOutcome {
                    response: HandshakeResponse {
                        accepted: true,
                        reason: None,
                        session_id: record.session_id,
                    },
                    session: Some(record),
                }
            }
            Err(SessionError::AlreadyRegistered) => {
                HandshakeOutcome::rejected("Connection already has a session".to_string())
            }
            Err(SessionError::ServerFull) => {
                HandshakeOutcome::rejected("Server is full".to_string())
            }
        }
    }
}
