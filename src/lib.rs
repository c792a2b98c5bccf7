//! Tabletop Sync Server Library
//!
//! The authoritative real-time synchronization layer for a multiplayer
//! tabletop session: connected participants, lobbies, replicated player and
//! world-object state, and shared dice rolls that resolve identically for
//! every viewer.

pub mod config;
pub mod net;
pub mod session;
pub mod util;
