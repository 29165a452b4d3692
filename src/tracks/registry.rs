//! Track Registry
//!
//! Immutable mapping from content hash to canonical track metadata.
//! Loaded once from the persisted track database, then shared read-only
//! (behind an `Arc`) by the catalog, the UI and the race loop.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::debug;

use crate::core::hash::TrackIdentity;

/// Maximum display name length (characters).
pub const MAX_TRACK_NAME_CHARS: usize = 64;

// =============================================================================
// COURSE ID TABLES
// =============================================================================

/// Race course ids in cup order. Slot `XY` is cup `X`, track `Y` (1-based).
const RACE_COURSE_IDS: [[u32; 4]; 8] = [
    [0x08, 0x01, 0x02, 0x04], // Mushroom
    [0x00, 0x05, 0x06, 0x07], // Flower
    [0x09, 0x0F, 0x0B, 0x03], // Star
    [0x0E, 0x0A, 0x0C, 0x0D], // Special
    [0x10, 0x14, 0x19, 0x1A], // Shell
    [0x1B, 0x1F, 0x17, 0x12], // Banana
    [0x15, 0x1E, 0x1D, 0x11], // Leaf
    [0x18, 0x16, 0x13, 0x1C], // Lightning
];

/// Battle arena course ids in cup order.
const BATTLE_COURSE_IDS: [[u32; 5]; 2] = [
    [0x21, 0x20, 0x23, 0x22, 0x24], // Wii arenas
    [0x27, 0x28, 0x29, 0x25, 0x26], // Retro arenas
];

fn course_from_slot<const N: usize>(table: &[[u32; N]], slot_id: u32) -> Option<u32> {
    let cup = (slot_id / 10).checked_sub(1)? as usize;
    let track = (slot_id % 10).checked_sub(1)? as usize;
    table.get(cup)?.get(track).copied()
}

// =============================================================================
// TRACK RECORD
// =============================================================================

/// Canonical metadata for one track revision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Registry identifier (the database's track id).
    #[serde(rename = "wiimm_id")]
    pub registry_id: u32,
    /// Content hash of the track file.
    #[serde(rename = "sha1")]
    pub identity: TrackIdentity,
    /// Localized display name.
    #[serde(rename = "name")]
    pub display_name: String,
    /// Battle arena rather than a race course.
    #[serde(default)]
    pub is_arena: bool,
    /// Cup-order slot the track occupies (`11` = first cup, first track).
    pub slot_id: u32,
}

impl TrackRecord {
    /// Internal course id for the slot this track replaces.
    ///
    /// Returns `None` when the slot is outside the course tables.
    pub fn course_id(&self) -> Option<u32> {
        if self.is_arena {
            course_from_slot(&BATTLE_COURSE_IDS, self.slot_id)
        } else {
            course_from_slot(&RACE_COURSE_IDS, self.slot_id)
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Errors loading the track database. All of them are fatal for the load.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Database is not valid JSON or has the wrong shape.
    #[error("malformed track database: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Two entries share a registry id.
    #[error("duplicate registry id {0}")]
    DuplicateId(u32),

    /// The same content hash is listed under two registry ids.
    #[error("track {identity} listed under ids {first} and {second}")]
    ConflictingIdentity {
        /// The shared hash.
        identity: TrackIdentity,
        /// First registry id seen.
        first: u32,
        /// Second registry id seen.
        second: u32,
    },
}

/// Immutable track database.
#[derive(Debug, Default)]
pub struct TrackRegistry {
    records: Vec<TrackRecord>,
    by_id: BTreeMap<u32, usize>,
    by_identity: BTreeMap<TrackIdentity, usize>,
}

impl TrackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a sequence of records.
    pub fn from_records<I>(records: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = TrackRecord>,
    {
        let mut registry = Self::new();

        for mut record in records {
            if registry.by_id.contains_key(&record.registry_id) {
                return Err(RegistryError::DuplicateId(record.registry_id));
            }
            if let Some(&existing) = registry.by_identity.get(&record.identity) {
                return Err(RegistryError::ConflictingIdentity {
                    identity: record.identity,
                    first: registry.records[existing].registry_id,
                    second: record.registry_id,
                });
            }

            if record.display_name.chars().count() > MAX_TRACK_NAME_CHARS {
                record.display_name = record.display_name.chars().take(MAX_TRACK_NAME_CHARS).collect();
            }

            let index = registry.records.len();
            registry.by_id.insert(record.registry_id, index);
            registry.by_identity.insert(record.identity, index);
            registry.records.push(record);
        }

        debug!("Track registry built with {} tracks", registry.records.len());
        Ok(registry)
    }

    /// Parse the persisted JSON database.
    pub fn from_json(data: &[u8]) -> Result<Self, RegistryError> {
        let records: Vec<TrackRecord> = serde_json::from_slice(data)?;
        Self::from_records(records)
    }

    /// Serialize to the persisted JSON form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.records)
    }

    /// Look up a track by content hash.
    pub fn lookup_identity(&self, identity: &TrackIdentity) -> Option<&TrackRecord> {
        self.by_identity.get(identity).map(|&i| &self.records[i])
    }

    /// Look up a track by registry id.
    pub fn get(&self, registry_id: u32) -> Option<&TrackRecord> {
        self.by_id.get(&registry_id).map(|&i| &self.records[i])
    }

    /// Get a track that is known to exist.
    ///
    /// # Panics
    /// Panics if `registry_id` is not in the registry. Pack references are
    /// validated when the catalog loads, so this only fires for ids that
    /// never came from a validated pack.
    pub fn track(&self, registry_id: u32) -> &TrackRecord {
        match self.get(registry_id) {
            Some(record) => record,
            None => panic!("track {} is not in the registry", registry_id),
        }
    }

    /// Check whether a registry id exists.
    pub fn contains(&self, registry_id: u32) -> bool {
        self.by_id.contains_key(&registry_id)
    }

    /// Number of tracks.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry holds no tracks.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over records in load order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackRecord> {
        self.records.iter()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32, seed: u8, slot_id: u32) -> TrackRecord {
        TrackRecord {
            registry_id: id,
            identity: TrackIdentity::new([seed; 20]),
            display_name: format!("Track {}", id),
            is_arena: false,
            slot_id,
        }
    }

    #[test]
    fn test_lookup_both_ways() {
        let registry = TrackRegistry::from_records(vec![
            record(1001, 1, 11),
            record(1002, 2, 12),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup_identity(&TrackIdentity::new([2; 20])).unwrap().registry_id, 1002);
        assert_eq!(registry.get(1001).unwrap().identity, TrackIdentity::new([1; 20]));
        assert!(registry.lookup_identity(&TrackIdentity::new([9; 20])).is_none());
        assert!(registry.get(9999).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = TrackRegistry::from_records(vec![record(1, 1, 11), record(1, 2, 12)]);
        assert!(matches!(result, Err(RegistryError::DuplicateId(1))));
    }

    #[test]
    fn test_conflicting_identity_rejected() {
        let result = TrackRegistry::from_records(vec![record(1, 7, 11), record(2, 7, 12)]);
        assert!(matches!(
            result,
            Err(RegistryError::ConflictingIdentity { first: 1, second: 2, .. })
        ));
    }

    #[test]
    #[should_panic(expected = "not in the registry")]
    fn test_track_panics_on_unknown_id() {
        let registry = TrackRegistry::new();
        registry.track(42);
    }

    #[test]
    fn test_json_database() {
        let json = r#"[
            {"wiimm_id": 5, "sha1": "a9993e364706816aba3e25717850c26c9cd0d89d", "name": "Abc Raceway", "slot_id": 11},
            {"wiimm_id": 6, "sha1": "0000000000000000000000000000000000000001", "name": "Block Arena", "is_arena": true, "slot_id": 11}
        ]"#;
        let registry = TrackRegistry::from_json(json.as_bytes()).unwrap();

        let abc = registry.lookup_identity(&TrackIdentity::of_track_file(b"abc")).unwrap();
        assert_eq!(abc.registry_id, 5);
        assert!(!abc.is_arena);
        assert!(registry.get(6).unwrap().is_arena);

        let reloaded = TrackRegistry::from_json(registry.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_malformed_json_is_fatal() {
        assert!(matches!(
            TrackRegistry::from_json(b"[{\"wiimm_id\": 1}]"),
            Err(RegistryError::Malformed(_))
        ));
        assert!(matches!(
            TrackRegistry::from_json(br#"[{"wiimm_id": 1, "sha1": "abcd", "name": "x", "slot_id": 11}]"#),
            Err(RegistryError::Malformed(_))
        ));
    }

    #[test]
    fn test_long_names_truncated() {
        let mut long = record(1, 1, 11);
        long.display_name = "x".repeat(100);
        let registry = TrackRegistry::from_records(vec![long]).unwrap();
        assert_eq!(registry.track(1).display_name.len(), MAX_TRACK_NAME_CHARS);
    }

    #[test]
    fn test_course_ids() {
        // Mushroom Cup opener and Lightning Cup closer
        assert_eq!(record(1, 1, 11).course_id(), Some(0x08));
        assert_eq!(record(1, 1, 84).course_id(), Some(0x1C));
        assert_eq!(record(1, 1, 21).course_id(), Some(0x00));

        let mut arena = record(1, 1, 12);
        arena.is_arena = true;
        assert_eq!(arena.course_id(), Some(0x20));
        arena.slot_id = 25;
        assert_eq!(arena.course_id(), Some(0x26));

        assert_eq!(record(1, 1, 0).course_id(), None);
        assert_eq!(record(1, 1, 10).course_id(), None);
        assert_eq!(record(1, 1, 95).course_id(), None);
        arena.slot_id = 35;
        assert_eq!(arena.course_id(), None);
    }
}
