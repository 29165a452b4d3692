//! Core value types.
//!
//! Content hashes for track identity and the plain kinematic types carried
//! in race frames.

pub mod hash;
pub mod vec3;

// Re-export core types
pub use hash::{TrackIdentity, PackHash, TRACK_IDENTITY_LEN, hash_manifest};
pub use vec3::{Vec3, Quat};
