//! Session-multiplexed relay fallback.
//!
//! When hole punching fails, both peers fall back to a relay session
//! allocated over HTTP. Two wire dialects exist: raw UDP framing
//! ([`udp::RelayServer`]) and a framed variant spoken over the reliable
//! datagram transport ([`framed::FramedRelay`]). Sessions are
//! dialect-scoped; a pair cannot migrate a live session between planes.

pub mod framed;
pub mod udp;

pub use framed::FramedRelay;
pub use udp::{RelayServer, RelayStatsSnapshot};
