//! # Race Sync
//!
//! Online race synchronization and content-addressed track identity.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         RACE SYNC                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Value types                               │
//! │  ├── hash.rs     - Track identity and pack fingerprints      │
//! │  └── vec3.rs     - Vectors and quaternions in frames         │
//! │                                                              │
//! │  tracks/         - Which track is which                      │
//! │  ├── registry.rs - Content hash -> track metadata            │
//! │  ├── pack.rs     - Track pack manifests                      │
//! │  ├── storage.rs  - Where the DB and manifests live           │
//! │  └── catalog.rs  - Packs, selection, identity resolution     │
//! │                                                              │
//! │  network/        - Frame exchange with the room              │
//! │  ├── protocol.rs - Wire types (bincode)                      │
//! │  ├── validation.rs - Frame checks                            │
//! │  ├── channel.rs  - Non-blocking transports                   │
//! │  ├── driver.rs   - Per-tick sync state machine               │
//! │  ├── lifecycle.rs - Single driver ownership                  │
//! │  ├── room.rs     - Room and matchmaking interfaces           │
//! │  └── coordinator.rs - Match -> room -> driver glue           │
//! │                                                              │
//! │  race/           - Consumers of validated state              │
//! │  └── session.rs  - Race session and sync strategies          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trust Boundary
//!
//! Everything a peer sends is decoded with a byte limit and validated
//! before it reaches `race/`. A corrupt frame is dropped; a peer that keeps
//! sending them ends the race instead of the process.
//!
//! Clients never agree on a track by local index. The room names a track by
//! its SHA-1 content hash and every client resolves that hash against its
//! own registry.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod tracks;
pub mod network;
pub mod race;

// Re-export commonly used types
pub use crate::core::hash::TrackIdentity;
pub use crate::core::vec3::{Vec3, Quat};
pub use tracks::{TrackRegistry, TrackPack, TrackPackCatalog, TrackGameMode};
pub use network::{
    RaceSyncDriver, DriverSlot, RaceServerFrame, PlayerInput, SyncConfig, SyncError,
};
pub use race::{RaceSession, SyncStrategy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Maximum players in a room
pub const MAX_PLAYERS: usize = 12;

/// Room server port
pub const ROOM_PORT: u16 = 21330;
