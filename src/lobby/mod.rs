//! Lobby room state, setlist queue, shared song library, unison phrase
//! accounting, and score/replay collection.

pub mod collector;
pub mod library;
pub mod setlist;
pub mod state;
pub mod unison;

pub use collector::{ReplayRecord, ScoreReplayCollector};
pub use library::{LibraryEvent, SharedLibraryManager, HASHES_PER_CHUNK};
pub use setlist::{SetlistError, SetlistEvent, SetlistManager, SETLIST_MAX_ENTRIES};
pub use state::{LobbyError, LobbyEvent, LobbySnapshot, LobbyStateManager, SelectionSnapshot};
pub use unison::UnisonCoordinator;
