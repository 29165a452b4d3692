//! Race Layer
//!
//! Consumes validated frames. Knows nothing about sockets or decoding.

pub mod session;

pub use session::{RaceSession, RacePlayer, RaceSummary, SyncStrategy, Offline};
