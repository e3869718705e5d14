//! Capacity-bounded session registry.
//!
//! One session per transport connection, at most `capacity` sessions total.
//! All mutations serialize under a single mutex; reads hand out copies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::types::SessionId;
use crate::transport::{ConnectionId, PeerConnection};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("connection already has a session")]
    AlreadyRegistered,
    #[error("server is full")]
    ServerFull,
}

/// An authenticated logical player. The connection is held as an opaque
/// handle; lobby state never stores it directly.
#[derive(Clone)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub player_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub connection: Arc<dyn PeerConnection>,
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session_id", &self.session_id)
            .field("connection_id", &self.connection_id)
            .field("player_name", &self.player_name)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct SessionsInner {
    by_session: HashMap<SessionId, SessionRecord>,
    by_connection: HashMap<ConnectionId, SessionId>,
}

pub struct SessionManager {
    inner: Mutex<SessionsInner>,
    capacity: usize,
}

impl SessionManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SessionsInner::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Create a session for a connection. Fails when the connection is
    /// already bound or the configured capacity would be exceeded.
    pub fn try_create_session(
        &self,
        connection: Arc<dyn PeerConnection>,
        player_name: &str,
    ) -> Result<SessionRecord, SessionError> {
        let mut inner = self.lock();
        let connection_id = connection.id();
        if inner.by_connection.contains_key(&connection_id) {
            return Err(SessionError::AlreadyRegistered);
        }
        if inner.by_session.len() >= self.capacity {
            return Err(SessionError::ServerFull);
        }

        let record = SessionRecord {
            session_id: Uuid::new_v4(),
            connection_id,
            player_name: player_name.to_string(),
            created_at: chrono::Utc::now(),
            connection,
        };
        inner.by_connection.insert(connection_id, record.session_id);
        inner.by_session.insert(record.session_id, record.clone());
        Ok(record)
    }

    /// Remove by session id. Idempotent.
    pub fn remove(&self, session_id: &SessionId) -> Option<SessionRecord> {
        let mut inner = self.lock();
        let record = inner.by_session.remove(session_id)?;
        inner.by_connection.remove(&record.connection_id);
        Some(record)
    }

    /// Remove by connection id. Idempotent.
    pub fn remove_by_connection(&self, connection_id: ConnectionId) -> Option<SessionRecord> {
        let mut inner = self.lock();
        let session_id = inner.by_connection.remove(&connection_id)?;
        inner.by_session.remove(&session_id)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.lock().by_session.get(session_id).cloned()
    }

    pub fn get_by_connection(&self, connection_id: ConnectionId) -> Option<SessionRecord> {
        let inner = self.lock();
        let session_id = inner.by_connection.get(&connection_id)?;
        inner.by_session.get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every live session.
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.lock().by_session.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DeliveryChannel, SendError};

    struct FakeConnection(ConnectionId);

    impl PeerConnection for FakeConnection {
        fn id(&self) -> ConnectionId {
            self.0
        }

        fn send(&self, _payload: &[u8], _channel: DeliveryChannel) -> Result<(), SendError> {
            Ok(())
        }

        fn disconnect(&self, _reason: &str) {}
    }

    fn conn(id: ConnectionId) -> Arc<dyn PeerConnection> {
        Arc::new(FakeConnection(id))
    }

    #[test]
    fn create_and_lookup() {
        let manager = SessionManager::new(4);
        let record = manager.try_create_session(conn(1), "alice").unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(
            manager.get(&record.session_id).unwrap().player_name,
            "alice"
        );
        assert_eq!(
            manager.get_by_connection(1).unwrap().session_id,
            record.session_id
        );
    }

    #[test]
    fn duplicate_connection_is_rejected() {
        let manager = SessionManager::new(4);
        manager.try_create_session(conn(1), "alice").unwrap();
        assert_eq!(
            manager.try_create_session(conn(1), "alice-again").unwrap_err(),
            SessionError::AlreadyRegistered
        );
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let manager = SessionManager::new(2);
        manager.try_create_session(conn(1), "a").unwrap();
        manager.try_create_session(conn(2), "b").unwrap();
        assert_eq!(
            manager.try_create_session(conn(3), "c").unwrap_err(),
            SessionError::ServerFull
        );

        // Removal frees a slot.
        manager.remove_by_connection(1);
        assert!(manager.try_create_session(conn(3), "c").is_ok());
    }

    #[test]
    fn removal_is_idempotent() {
        let manager = SessionManager::new(4);
        let record = manager.try_create_session(conn(1), "a").unwrap();
        assert!(manager.remove(&record.session_id).is_some());
        assert!(manager.remove(&record.session_id).is_none());
        assert!(manager.remove_by_connection(1).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let manager = SessionManager::new(4);
        manager.try_create_session(conn(1), "a").unwrap();
        let snapshot = manager.snapshot();
        manager.remove_by_connection(1);
        assert_eq!(snapshot.len(), 1);
        assert!(manager.is_empty());
    }
}
