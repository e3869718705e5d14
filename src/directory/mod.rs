//! Heartbeat-based lobby directory.
//!
//! Hosts advertise with `POST /api/lobbies` and keep the record alive by
//! re-posting; a record whose last heartbeat is older than the TTL is
//! invisible and purged opportunistically on every list/read.

pub mod codes;

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::protocol::types::LobbyId;

pub use codes::{CodeError, ShortCodeRegistry, SHORT_CODE_LEN};

/// Advertisement body accepted from lobby hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LobbyAdvertisement {
    pub lobby_id: LobbyId,
    pub lobby_name: String,
    pub host_name: String,
    /// Empty or `0.0.0.0` means "use the address you saw me from".
    #[serde(default)]
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub current_players: u32,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub has_password: bool,
    #[serde(default)]
    pub version: String,
}

/// Directory entry returned to browsing clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryEntry {
    pub lobby_id: LobbyId,
    pub lobby_name: String,
    pub host_name: String,
    pub address: String,
    pub port: u16,
    pub current_players: u32,
    pub max_players: u32,
    pub has_password: bool,
    pub version: String,
    pub last_heartbeat_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LobbyRecord {
    entry: DirectoryEntry,
    created_at: DateTime<Utc>,
}

/// In-memory lobby registry with TTL-based expiry.
pub struct LobbyDirectory {
    records: DashMap<LobbyId, LobbyRecord>,
    ttl: chrono::Duration,
}

impl LobbyDirectory {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            records: DashMap::new(),
            ttl: chrono::Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64),
        }
    }

    /// Upsert on `LobbyId`: the first heartbeat creates the record, each
    /// subsequent one refreshes `last_heartbeat_utc` and the mutable fields.
    /// An unusable advertised address is replaced with the resolved peer IP.
    pub fn upsert(&self, ad: LobbyAdvertisement, resolved_ip: Option<IpAddr>) -> DirectoryEntry {
        let now = Utc::now();
        let address = resolve_address(&ad.address, resolved_ip);
        let entry = DirectoryEntry {
            lobby_id: ad.lobby_id,
            lobby_name: ad.lobby_name,
            host_name: ad.host_name,
            address,
            port: ad.port,
            current_players: ad.current_players,
            max_players: ad.max_players,
            has_password: ad.has_password,
            version: ad.version,
            last_heartbeat_utc: now,
        };

        let created_at = self
            .records
            .get(&ad.lobby_id)
            .map_or(now, |existing| existing.created_at);
        self.records.insert(
            ad.lobby_id,
            LobbyRecord {
                entry: entry.clone(),
                created_at,
            },
        );
        entry
    }

    /// Active records only; stale ones are purged as a side effect.
    pub fn list(&self) -> Vec<DirectoryEntry> {
        self.purge_stale();
        let mut entries: Vec<DirectoryEntry> =
            self.records.iter().map(|r| r.entry.clone()).collect();
        entries.sort_by(|a, b| a.lobby_name.cmp(&b.lobby_name));
        entries
    }

    /// Fetch one active record; returns `None` for unknown or expired ids
    /// (an expired record is purged on the spot).
    pub fn get(&self, lobby_id: &LobbyId) -> Option<DirectoryEntry> {
        let now = Utc::now();
        let record = self.records.get(lobby_id)?;
        if self.is_stale(&record.entry, now) {
            drop(record);
            self.records.remove(lobby_id);
            return None;
        }
        Some(record.entry.clone())
    }

    pub fn remove(&self, lobby_id: &LobbyId) -> bool {
        self.records.remove(lobby_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record past its TTL; returns how many were removed.
    pub fn purge_stale(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records
            .retain(|_, record| !self.is_stale(&record.entry, now));
        let purged = before - self.records.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged stale lobby records");
        }
        purged
    }

    fn is_stale(&self, entry: &DirectoryEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.last_heartbeat_utc) >= self.ttl
    }
}

/// Pick the address to publish: the advertised one if it is routable, the
/// resolved peer IP otherwise.
fn resolve_address(advertised: &str, resolved_ip: Option<IpAddr>) -> String {
    let advertised = advertised.trim();
    if advertised.is_empty() || advertised == "0.0.0.0" {
        resolved_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| advertised.to_string())
    } else {
        advertised.to_string()
    }
}
