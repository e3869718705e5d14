//! Server-authoritative lobby room state.
//!
//! Status is a pure function of `(countdown active, selection present,
//! ready bits, spectator flags)` and is recomputed after every mutation:
//!
//! ```text
//! Idle --> SelectingSong --> ReadyToPlay --> InCountdown
//! ```
//!
//! Mutations commit under the lock and return the events they warrant, in
//! commit order; subscribers broadcast outside the lock (commit-then-emit).

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::types::{
    LobbyPlayer, LobbyStatus, PlayerRole, SelectionAssignment, SessionId, SongSelection,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LobbyError {
    #[error("lobby is full")]
    LobbyFull,
    #[error("player is already in the lobby")]
    AlreadyJoined,
    #[error("unknown player")]
    UnknownPlayer,
    #[error("spectators cannot change readiness")]
    SpectatorReady,
    #[error("song selection has an empty song id")]
    EmptySongId,
    #[error("countdown can only start when every player is ready")]
    NotReadyToPlay,
    #[error("no countdown in progress")]
    NoCountdown,
    #[error("the host role is assigned by host departure, not directly")]
    HostRoleManaged,
}

/// Everything a lobby mutation can announce.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    PlayerJoined(LobbyPlayer),
    PlayerLeft(SessionId),
    PlayerReadyChanged {
        session_id: SessionId,
        is_ready: bool,
    },
    PlayerRoleChanged {
        session_id: SessionId,
        role: PlayerRole,
    },
    SongSelectionChanged(SongSelection),
    StatusChanged {
        previous: LobbyStatus,
        current: LobbyStatus,
    },
    CountdownStarted(u32),
    CountdownCancelled,
    CountdownCompleted,
}

/// Current selection plus the derived all-ready bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSnapshot {
    pub song_id: String,
    pub assignments: Vec<SelectionAssignment>,
    pub all_ready: bool,
}

/// Full room snapshot broadcast to every session after each mutation.
/// Players are ordered host first, then members by case-insensitive name,
/// then spectators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub status: LobbyStatus,
    pub players: Vec<LobbyPlayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_seconds: Option<u32>,
}

struct LobbyInner {
    /// Join order; host promotion picks the first remaining member.
    players: Vec<LobbyPlayer>,
    selection: Option<SongSelection>,
    countdown_seconds: Option<u32>,
    status: LobbyStatus,
}

pub struct LobbyStateManager {
    inner: Mutex<LobbyInner>,
    max_players: usize,
}

impl LobbyStateManager {
    pub fn new(max_players: usize) -> Self {
        Self {
            inner: Mutex::new(LobbyInner {
                players: Vec::new(),
                selection: None,
                countdown_seconds: None,
                status: LobbyStatus::Idle,
            }),
            max_players,
        }
    }

    /// Join as an active player. The first active player becomes host.
    pub fn join(
        &self,
        session_id: SessionId,
        display_name: &str,
    ) -> Result<Vec<LobbyEvent>, LobbyError> {
        let mut inner = self.lock();
        if inner.players.iter().any(|p| p.session_id == session_id) {
            return Err(LobbyError::AlreadyJoined);
        }
        if Self::active_count(&inner) >= self.max_players {
            return Err(LobbyError::LobbyFull);
        }

        let role = if inner.players.iter().any(|p| p.role == PlayerRole::Host) {
            PlayerRole::Member
        } else {
            PlayerRole::Host
        };
        let player = LobbyPlayer {
            session_id,
            display_name: display_name.to_string(),
            role,
            is_ready: false,
        };
        inner.players.push(player.clone());

        let mut events = vec![LobbyEvent::PlayerJoined(player)];
        Self::recompute_status(&mut inner, &mut events);
        Ok(events)
    }

    /// Join as a read-only spectator. Spectators never hold a ready flag
    /// and do not count toward capacity.
    pub fn join_spectator(
        &self,
        session_id: SessionId,
        display_name: &str,
    ) -> Result<Vec<LobbyEvent>, LobbyError> {
        let mut inner = self.lock();
        if inner.players.iter().any(|p| p.session_id == session_id) {
            return Err(LobbyError::AlreadyJoined);
        }
        let player = LobbyPlayer {
            session_id,
            display_name: display_name.to_string(),
            role: PlayerRole::Spectator,
            is_ready: false,
        };
        inner.players.push(player.clone());

        let mut events = vec![LobbyEvent::PlayerJoined(player)];
        Self::recompute_status(&mut inner, &mut events);
        Ok(events)
    }

    /// Remove a player. Idempotent: removing an unknown session is a no-op.
    /// A leaving host promotes the first remaining member; a leaver in
    /// countdown cancels it.
    pub fn remove(&self, session_id: SessionId) -> Vec<LobbyEvent> {
        let mut inner = self.lock();
        let Some(index) = inner
            .players
            .iter()
            .position(|p| p.session_id == session_id)
        else {
            return Vec::new();
        };

        let removed = inner.players.remove(index);
        let mut events = vec![LobbyEvent::PlayerLeft(session_id)];

        if removed.role == PlayerRole::Host {
            if let Some(next_host) = inner
                .players
                .iter_mut()
                .find(|p| p.role == PlayerRole::Member)
            {
                next_host.role = PlayerRole::Host;
                events.push(LobbyEvent::PlayerRoleChanged {
                    session_id: next_host.session_id,
                    role: PlayerRole::Host,
                });
            }
        }

        Self::drop_ineligible_assignments(&mut inner);
        if inner.countdown_seconds.take().is_some() {
            events.push(LobbyEvent::CountdownCancelled);
        }
        Self::recompute_status(&mut inner, &mut events);
        events
    }

    /// Toggle readiness. Spectators are rejected; going unready during a
    /// countdown cancels it.
    pub fn set_ready(
        &self,
        session_id: SessionId,
        is_ready: bool,
    ) -> Result<Vec<LobbyEvent>, LobbyError> {
        let mut inner = self.lock();
        let player = inner
            .players
            .iter_mut()
            .find(|p| p.session_id == session_id)
            .ok_or(LobbyError::UnknownPlayer)?;
        if player.role.is_spectator() {
            return Err(LobbyError::SpectatorReady);
        }

        let mut events = Vec::new();
        if player.is_ready != is_ready {
            player.is_ready = is_ready;
            events.push(LobbyEvent::PlayerReadyChanged {
                session_id,
                is_ready,
            });
        }
        if !is_ready && inner.countdown_seconds.take().is_some() {
            events.push(LobbyEvent::CountdownCancelled);
        }
        Self::recompute_status(&mut inner, &mut events);
        Ok(events)
    }

    /// Apply a song selection. The song id is trimmed; assignments are
    /// filtered down to eligible ones (known non-spectator player, distinct,
    /// instrument and difficulty both non-empty). A successful change resets
    /// every non-spectator ready flag.
    pub fn apply_song_selection(
        &self,
        selection: SongSelection,
    ) -> Result<Vec<LobbyEvent>, LobbyError> {
        let song_id = selection.song_id.trim().to_string();
        if song_id.is_empty() {
            return Err(LobbyError::EmptySongId);
        }

        let mut inner = self.lock();
        let mut seen = std::collections::HashSet::new();
        let assignments: Vec<SelectionAssignment> = selection
            .assignments
            .into_iter()
            .filter(|a| {
                !a.instrument.is_empty()
                    && !a.difficulty.is_empty()
                    && inner
                        .players
                        .iter()
                        .any(|p| p.session_id == a.player_id && !p.role.is_spectator())
                    && seen.insert(a.player_id)
            })
            .collect();

        let normalized = SongSelection {
            song_id,
            assignments,
        };

        let mut events = Vec::new();
        for player in &mut inner.players {
            if !player.role.is_spectator() && player.is_ready {
                player.is_ready = false;
                events.push(LobbyEvent::PlayerReadyChanged {
                    session_id: player.session_id,
                    is_ready: false,
                });
            }
        }
        if inner.countdown_seconds.take().is_some() {
            events.push(LobbyEvent::CountdownCancelled);
        }
        inner.selection = Some(normalized.clone());
        events.push(LobbyEvent::SongSelectionChanged(normalized));
        Self::recompute_status(&mut inner, &mut events);
        Ok(events)
    }

    /// Drop the current selection (song finished or withdrawn).
    pub fn clear_song_selection(&self) -> Vec<LobbyEvent> {
        let mut inner = self.lock();
        let mut events = Vec::new();
        if inner.selection.take().is_none() {
            return events;
        }
        for player in &mut inner.players {
            if player.is_ready {
                player.is_ready = false;
                events.push(LobbyEvent::PlayerReadyChanged {
                    session_id: player.session_id,
                    is_ready: false,
                });
            }
        }
        if inner.countdown_seconds.take().is_some() {
            events.push(LobbyEvent::CountdownCancelled);
        }
        Self::recompute_status(&mut inner, &mut events);
        events
    }

    /// Switch a player between member and spectator.
    pub fn set_role(
        &self,
        session_id: SessionId,
        role: PlayerRole,
    ) -> Result<Vec<LobbyEvent>, LobbyError> {
        if role == PlayerRole::Host {
            return Err(LobbyError::HostRoleManaged);
        }
        let mut inner = self.lock();
        let current = inner
            .players
            .iter()
            .find(|p| p.session_id == session_id)
            .ok_or(LobbyError::UnknownPlayer)?;
        if current.role == PlayerRole::Host {
            return Err(LobbyError::HostRoleManaged);
        }
        if current.role == role {
            return Ok(Vec::new());
        }
        if role == PlayerRole::Member && Self::active_count(&inner) >= self.max_players {
            return Err(LobbyError::LobbyFull);
        }
        let player = inner
            .players
            .iter_mut()
            .find(|p| p.session_id == session_id)
            .ok_or(LobbyError::UnknownPlayer)?;

        let mut events = Vec::new();
        let was_ready = player.is_ready;
        player.role = role;
        if role.is_spectator() && player.is_ready {
            player.is_ready = false;
            events.push(LobbyEvent::PlayerReadyChanged {
                session_id,
                is_ready: false,
            });
        }
        events.push(LobbyEvent::PlayerRoleChanged { session_id, role });

        // A ready player stepping out of the roster is equivalent to going
        // unready for countdown purposes.
        if role.is_spectator() && was_ready && inner.countdown_seconds.take().is_some() {
            events.push(LobbyEvent::CountdownCancelled);
        }
        Self::drop_ineligible_assignments(&mut inner);
        Self::recompute_status(&mut inner, &mut events);
        Ok(events)
    }

    /// Start the countdown. Valid only from `ReadyToPlay`.
    pub fn start_countdown(&self, seconds: u32) -> Result<Vec<LobbyEvent>, LobbyError> {
        let mut inner = self.lock();
        if inner.status != LobbyStatus::ReadyToPlay {
            return Err(LobbyError::NotReadyToPlay);
        }
        inner.countdown_seconds = Some(seconds);
        let mut events = vec![LobbyEvent::CountdownStarted(seconds)];
        Self::recompute_status(&mut inner, &mut events);
        Ok(events)
    }

    /// Finish the countdown; signals "start gameplay" exactly once.
    pub fn complete_countdown(&self) -> Result<Vec<LobbyEvent>, LobbyError> {
        let mut inner = self.lock();
        if inner.countdown_seconds.take().is_none() {
            return Err(LobbyError::NoCountdown);
        }
        let mut events = vec![LobbyEvent::CountdownCompleted];
        Self::recompute_status(&mut inner, &mut events);
        Ok(events)
    }

    pub fn status(&self) -> LobbyStatus {
        self.lock().status
    }

    pub fn player(&self, session_id: SessionId) -> Option<LobbyPlayer> {
        self.lock()
            .players
            .iter()
            .find(|p| p.session_id == session_id)
            .cloned()
    }

    /// Consistent copy for broadcasting: host, members by name, spectators.
    pub fn snapshot(&self) -> LobbySnapshot {
        let inner = self.lock();

        let mut members: Vec<LobbyPlayer> = inner
            .players
            .iter()
            .filter(|p| p.role == PlayerRole::Member)
            .cloned()
            .collect();
        members.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        });
        let mut spectators: Vec<LobbyPlayer> = inner
            .players
            .iter()
            .filter(|p| p.role == PlayerRole::Spectator)
            .cloned()
            .collect();
        spectators.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        });

        let mut players = Vec::with_capacity(inner.players.len());
        players.extend(
            inner
                .players
                .iter()
                .filter(|p| p.role == PlayerRole::Host)
                .cloned(),
        );
        players.extend(members);
        players.extend(spectators);

        let selection = inner.selection.as_ref().map(|sel| SelectionSnapshot {
            song_id: sel.song_id.clone(),
            assignments: sel.assignments.clone(),
            all_ready: Self::all_active_ready(&inner),
        });

        LobbySnapshot {
            status: inner.status,
            players,
            selection,
            countdown_seconds: inner.countdown_seconds,
        }
    }

    fn active_count(inner: &LobbyInner) -> usize {
        inner
            .players
            .iter()
            .filter(|p| !p.role.is_spectator())
            .count()
    }

    fn all_active_ready(inner: &LobbyInner) -> bool {
        let active: Vec<_> = inner
            .players
            .iter()
            .filter(|p| !p.role.is_spectator())
            .collect();
        !active.is_empty() && active.iter().all(|p| p.is_ready)
    }

    /// Remove selection assignments that no longer point at an eligible
    /// player (after leaves and role changes).
    fn drop_ineligible_assignments(inner: &mut LobbyInner) {
        let eligible: Vec<SessionId> = inner
            .players
            .iter()
            .filter(|p| !p.role.is_spectator())
            .map(|p| p.session_id)
            .collect();
        if let Some(selection) = &mut inner.selection {
            selection
                .assignments
                .retain(|a| eligible.contains(&a.player_id));
        }
    }

    fn computed_status(inner: &LobbyInner) -> LobbyStatus {
        if inner.countdown_seconds.is_some() {
            LobbyStatus::InCountdown
        } else if inner.selection.is_none() {
            LobbyStatus::Idle
        } else if Self::all_active_ready(inner) {
            LobbyStatus::ReadyToPlay
        } else {
            LobbyStatus::SelectingSong
        }
    }

    fn recompute_status(inner: &mut LobbyInner, events: &mut Vec<LobbyEvent>) {
        let current = Self::computed_status(inner);
        if current != inner.status {
            events.push(LobbyEvent::StatusChanged {
                previous: inner.status,
                current,
            });
            inner.status = current;
        }
    }

    fn lock(&self) -> MutexGuard<'_, LobbyInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn selection_for(players: &[SessionId], song: &str) -> SongSelection {
        SongSelection {
            song_id: song.to_string(),
            assignments: players
                .iter()
                .map(|id| SelectionAssignment {
                    player_id: *id,
                    instrument: "guitar".to_string(),
                    difficulty: "expert".to_string(),
                })
                .collect(),
        }
    }

    fn has_status_change(events: &[LobbyEvent], to: LobbyStatus) -> bool {
        events
            .iter()
            .any(|e| matches!(e, LobbyEvent::StatusChanged { current, .. } if *current == to))
    }

    #[test]
    fn first_joiner_becomes_host() {
        let lobby = LobbyStateManager::new(4);
        let host = Uuid::new_v4();
        let member = Uuid::new_v4();
        lobby.join(host, "host").unwrap();
        lobby.join(member, "member").unwrap();

        assert_eq!(lobby.player(host).unwrap().role, PlayerRole::Host);
        assert_eq!(lobby.player(member).unwrap().role, PlayerRole::Member);
    }

    #[test]
    fn capacity_counts_active_players_only() {
        let lobby = LobbyStateManager::new(2);
        lobby.join(Uuid::new_v4(), "a").unwrap();
        lobby.join(Uuid::new_v4(), "b").unwrap();
        assert_eq!(
            lobby.join(Uuid::new_v4(), "c").unwrap_err(),
            LobbyError::LobbyFull
        );
        // Spectators still fit.
        assert!(lobby.join_spectator(Uuid::new_v4(), "watcher").is_ok());
    }

    #[test]
    fn host_leave_promotes_first_member() {
        let lobby = LobbyStateManager::new(4);
        let host = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        lobby.join(host, "host").unwrap();
        lobby.join(first, "first").unwrap();
        lobby.join(second, "second").unwrap();

        let events = lobby.remove(host);
        assert!(events.contains(&LobbyEvent::PlayerLeft(host)));
        assert!(events.contains(&LobbyEvent::PlayerRoleChanged {
            session_id: first,
            role: PlayerRole::Host
        }));
        assert_eq!(lobby.player(first).unwrap().role, PlayerRole::Host);
        assert_eq!(lobby.player(second).unwrap().role, PlayerRole::Member);
    }

    #[test]
    fn remove_unknown_player_is_a_no_op() {
        let lobby = LobbyStateManager::new(4);
        lobby.join(Uuid::new_v4(), "a").unwrap();
        assert!(lobby.remove(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn ready_to_countdown_to_cancel_flow() {
        // Literal end-to-end scenario: two members, both ready, countdown,
        // one unready cancels.
        let lobby = LobbyStateManager::new(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        lobby.join(a, "a").unwrap();
        lobby.join(b, "b").unwrap();
        assert_eq!(lobby.status(), LobbyStatus::Idle);

        let events = lobby.apply_song_selection(selection_for(&[a, b], "s")).unwrap();
        assert!(has_status_change(&events, LobbyStatus::SelectingSong));

        lobby.set_ready(a, true).unwrap();
        assert_eq!(lobby.status(), LobbyStatus::SelectingSong);
        let events = lobby.set_ready(b, true).unwrap();
        assert!(has_status_change(&events, LobbyStatus::ReadyToPlay));

        let events = lobby.start_countdown(3).unwrap();
        assert!(events.contains(&LobbyEvent::CountdownStarted(3)));
        assert_eq!(lobby.status(), LobbyStatus::InCountdown);

        let events = lobby.set_ready(b, false).unwrap();
        assert!(events.contains(&LobbyEvent::CountdownCancelled));
        assert_eq!(lobby.status(), LobbyStatus::SelectingSong);
    }

    #[test]
    fn countdown_requires_ready_to_play() {
        let lobby = LobbyStateManager::new(4);
        let a = Uuid::new_v4();
        lobby.join(a, "a").unwrap();
        assert_eq!(
            lobby.start_countdown(3).unwrap_err(),
            LobbyError::NotReadyToPlay
        );
    }

    #[test]
    fn complete_countdown_fires_once() {
        let lobby = LobbyStateManager::new(4);
        let a = Uuid::new_v4();
        lobby.join(a, "a").unwrap();
        lobby
            .apply_song_selection(selection_for(&[a], "song"))
            .unwrap();
        lobby.set_ready(a, true).unwrap();
        lobby.start_countdown(3).unwrap();

        let events = lobby.complete_countdown().unwrap();
        assert!(events.contains(&LobbyEvent::CountdownCompleted));
        assert_eq!(
            lobby.complete_countdown().unwrap_err(),
            LobbyError::NoCountdown
        );
    }

    #[test]
    fn selection_change_resets_ready_bits() {
        let lobby = LobbyStateManager::new(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        lobby.join(a, "a").unwrap();
        lobby.join(b, "b").unwrap();
        lobby.apply_song_selection(selection_for(&[a, b], "one")).unwrap();
        lobby.set_ready(a, true).unwrap();
        lobby.set_ready(b, true).unwrap();
        assert_eq!(lobby.status(), LobbyStatus::ReadyToPlay);

        let events = lobby.apply_song_selection(selection_for(&[a, b], "two")).unwrap();
        let resets = events
            .iter()
            .filter(|e| matches!(e, LobbyEvent::PlayerReadyChanged { is_ready: false, .. }))
            .count();
        assert_eq!(resets, 2);
        assert_eq!(lobby.status(), LobbyStatus::SelectingSong);
    }

    #[test]
    fn selection_normalizes_and_filters_assignments() {
        let lobby = LobbyStateManager::new(4);
        let a = Uuid::new_v4();
        let spectator = Uuid::new_v4();
        lobby.join(a, "a").unwrap();
        lobby.join_spectator(spectator, "watcher").unwrap();

        let selection = SongSelection {
            song_id: "  padded  ".to_string(),
            assignments: vec![
                SelectionAssignment {
                    player_id: a,
                    instrument: "guitar".to_string(),
                    difficulty: "expert".to_string(),
                },
                // Duplicate player: dropped.
                SelectionAssignment {
                    player_id: a,
                    instrument: "bass".to_string(),
                    difficulty: "hard".to_string(),
                },
                // Spectator: dropped.
                SelectionAssignment {
                    player_id: spectator,
                    instrument: "drums".to_string(),
                    difficulty: "easy".to_string(),
                },
                // Empty instrument: dropped.
                SelectionAssignment {
                    player_id: a,
                    instrument: String::new(),
                    difficulty: "easy".to_string(),
                },
            ],
        };
        lobby.apply_song_selection(selection).unwrap();

        let snapshot = lobby.snapshot();
        let sel = snapshot.selection.unwrap();
        assert_eq!(sel.song_id, "padded");
        assert_eq!(sel.assignments.len(), 1);
        assert_eq!(sel.assignments[0].player_id, a);
        assert_eq!(sel.assignments[0].instrument, "guitar");
    }

    #[test]
    fn empty_song_id_is_rejected() {
        let lobby = LobbyStateManager::new(4);
        let a = Uuid::new_v4();
        lobby.join(a, "a").unwrap();
        assert_eq!(
            lobby
                .apply_song_selection(selection_for(&[a], "   "))
                .unwrap_err(),
            LobbyError::EmptySongId
        );
    }

    #[test]
    fn spectators_cannot_ready() {
        let lobby = LobbyStateManager::new(4);
        let watcher = Uuid::new_v4();
        lobby.join_spectator(watcher, "w").unwrap();
        assert_eq!(
            lobby.set_ready(watcher, true).unwrap_err(),
            LobbyError::SpectatorReady
        );
    }

    #[test]
    fn leaving_during_countdown_cancels_it() {
        let lobby = LobbyStateManager::new(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        lobby.join(a, "a").unwrap();
        lobby.join(b, "b").unwrap();
        lobby.apply_song_selection(selection_for(&[a, b], "s")).unwrap();
        lobby.set_ready(a, true).unwrap();
        lobby.set_ready(b, true).unwrap();
        lobby.start_countdown(5).unwrap();

        let events = lobby.remove(b);
        assert!(events.contains(&LobbyEvent::CountdownCancelled));
        // The remaining player is still ready with a selection in place.
        assert_eq!(lobby.status(), LobbyStatus::ReadyToPlay);
    }

    #[test]
    fn snapshot_orders_host_members_spectators() {
        let lobby = LobbyStateManager::new(8);
        let host = Uuid::new_v4();
        let zed = Uuid::new_v4();
        let amy = Uuid::new_v4();
        let watcher = Uuid::new_v4();
        lobby.join(host, "host").unwrap();
        lobby.join(zed, "Zed").unwrap();
        lobby.join_spectator(watcher, "watcher").unwrap();
        lobby.join(amy, "amy").unwrap();

        let names: Vec<_> = lobby
            .snapshot()
            .players
            .iter()
            .map(|p| p.display_name.clone())
            .collect();
        assert_eq!(names, vec!["host", "amy", "Zed", "watcher"]);
    }

    #[test]
    fn member_to_spectator_drops_ready_and_assignment() {
        let lobby = LobbyStateManager::new(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        lobby.join(a, "a").unwrap();
        lobby.join(b, "b").unwrap();
        lobby.apply_song_selection(selection_for(&[a, b], "s")).unwrap();
        lobby.set_ready(b, true).unwrap();

        let events = lobby.set_role(b, PlayerRole::Spectator).unwrap();
        assert!(events.contains(&LobbyEvent::PlayerRoleChanged {
            session_id: b,
            role: PlayerRole::Spectator
        }));
        assert!(!lobby.player(b).unwrap().is_ready);
        let sel = lobby.snapshot().selection.unwrap();
        assert!(sel.assignments.iter().all(|x| x.player_id != b));
    }

    #[test]
    fn status_is_pure_over_its_inputs() {
        let lobby = LobbyStateManager::new(4);
        let a = Uuid::new_v4();
        lobby.join(a, "a").unwrap();

        // No selection -> Idle regardless of ready bits.
        lobby.set_ready(a, true).unwrap();
        assert_eq!(lobby.status(), LobbyStatus::Idle);

        // Selection + everyone ready... but selection resets ready bits,
        // so we land in SelectingSong first.
        lobby
            .apply_song_selection(selection_for(&[a], "song"))
            .unwrap();
        assert_eq!(lobby.status(), LobbyStatus::SelectingSong);
        lobby.set_ready(a, true).unwrap();
        assert_eq!(lobby.status(), LobbyStatus::ReadyToPlay);
    }
}
