#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Rhythm Fish Server
//!
//! A lightweight, in-memory rendezvous and relay backplane for peer-to-peer
//! rhythm game networking, plus the wire protocol and session state machines
//! the game processes embed on both ends of a connection.
//!
//! No database, no cloud services. Run the binary for the rendezvous; link
//! the library for the protocol core.

/// Server configuration and environment variables
pub mod config;

/// Lobby directory and short-code registry
pub mod directory;

/// HTTP control plane (directory, punch/relay envelopes, health)
pub mod http;

/// Lobby room state, setlist, shared library, unison accounting
pub mod lobby;

/// Structured logging configuration
pub mod logging;

/// Packet framings, typed payloads, dispatcher
pub mod protocol;

/// NAT hole-punch coordinator
pub mod punch;

/// Session-multiplexed relay fallback
pub mod relay;

/// Game-server runtime glue (poll loop, broadcasts, relay table)
pub mod server;

/// Session registry and handshake validation
pub mod session;

/// Transport-agnostic connection abstraction
pub mod transport;
