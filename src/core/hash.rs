//! Content Hashing for Track Identity
//!
//! Provides the hashes clients use to agree on content:
//! - Track identity (SHA-1 over the track file, 20 bytes)
//! - Pack manifest fingerprints (SHA-256 over the manifest bytes)
//!
//! Hashes are independent of install order, file names and pack origin.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Size of a track identity in bytes (160 bits).
pub const TRACK_IDENTITY_LEN: usize = 20;

/// Pack manifest fingerprint (256 bits / 32 bytes).
pub type PackHash = [u8; 32];

/// Content hash of a track file.
///
/// Two tracks with the same identity are the same track, wherever they
/// were installed from. Serialized as a 40 character hex string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TrackIdentity(pub [u8; TRACK_IDENTITY_LEN]);

impl TrackIdentity {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; TRACK_IDENTITY_LEN]) -> Self {
        Self(bytes)
    }

    /// Hash the contents of a track file.
    pub fn of_track_file(contents: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(contents);
        Self(hasher.finalize().into())
    }

    /// Parse from a byte slice received off the wire.
    ///
    /// Returns `None` unless the slice is exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; TRACK_IDENTITY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; TRACK_IDENTITY_LEN] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for TrackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackIdentity({})", self.to_hex())
    }
}

impl fmt::Display for TrackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Error parsing a hex track identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    /// Not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Decoded to the wrong number of bytes.
    #[error("expected {TRACK_IDENTITY_LEN} bytes, got {0}")]
    WrongLength(usize),
}

impl FromStr for TrackIdentity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| IdentityParseError::InvalidHex(e.to_string()))?;
        let len = bytes.len();
        Self::from_slice(&bytes).ok_or(IdentityParseError::WrongLength(len))
    }
}

impl Serialize for TrackIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for TrackIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; TRACK_IDENTITY_LEN]>::deserialize(deserializer).map(Self)
        }
    }
}

/// Fingerprint a pack manifest.
pub fn hash_manifest(manifest: &[u8]) -> PackHash {
    hash_with_domain(b"RACE_SYNC_PACK_V1", manifest)
}

/// Compute SHA-256 with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> PackHash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

// =============================================================================
// TESTS
// =============================================================================
