//! Track Packs
//!
//! A track pack is an authored collection of tracks, split by game mode,
//! each track referenced by its registry id. Packs are read from small
//! INI-style manifests:
//!
//! ```text
//! [Pack Info]
//! name = Example Pack
//! author = Alice, Bob
//! description = Some tracks
//! race = 1001, 1002, 1003
//! balloon = 2001
//! coin = 2001
//! ```
//!
//! Parsing never fails. Problems are recorded in `parse_error` and a pack
//! carrying one is never offered for selection.

use std::fmt;
use std::ops::BitOr;
use serde::{Serialize, Deserialize};

use crate::core::hash::{hash_manifest, PackHash};

/// Maximum pack name length (characters).
pub const MAX_PACK_NAME_CHARS: usize = 64;

/// Maximum author list length (characters).
pub const MAX_AUTHOR_CHARS: usize = 64;

/// Maximum description length (characters).
pub const MAX_DESCRIPTION_CHARS: usize = 128;

const PACK_INFO_SECTION: &str = "Pack Info";

// =============================================================================
// GAME MODE FLAGS
// =============================================================================

/// Set of game modes (bit flags).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TrackGameMode(u8);

impl TrackGameMode {
    /// No modes.
    pub const NONE: Self = Self(0);
    /// Regular races.
    pub const RACE: Self = Self(1 << 0);
    /// Balloon battle.
    pub const BALLOON: Self = Self(1 << 1);
    /// Coin runners.
    pub const COIN: Self = Self(1 << 2);

    /// Every single mode, in list order.
    pub const ALL: [Self; 3] = [Self::RACE, Self::BALLOON, Self::COIN];

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check whether all modes in `other` are set.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether no mode is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check whether exactly one known mode is set.
    #[inline]
    pub const fn is_single(self) -> bool {
        matches!(self.0, 1 | 2 | 4)
    }

    fn name(self) -> &'static str {
        match self.0 {
            1 => "race",
            2 => "balloon",
            4 => "coin",
            _ => "?",
        }
    }
}

impl BitOr for TrackGameMode {
    type Output = Self;
    fn bitor(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl fmt::Debug for TrackGameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = Self::ALL
            .iter()
            .filter(|m| self.contains(**m))
            .map(|m| m.name())
            .collect();
        write!(f, "TrackGameMode({})", names.join(" | "))
    }
}

// =============================================================================
// TRACK PACK
// =============================================================================

/// A parsed track pack manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackPack {
    parse_error: Option<String>,

    race_tracks: Vec<u32>,
    balloon_tracks: Vec<u32>,
    coin_tracks: Vec<u32>,

    author_names: String,
    description: String,
    display_name: String,

    manifest_hash: PackHash,
}

impl TrackPack {
    /// Parse a manifest.
    ///
    /// Structural problems (bad encoding, a line that is not `key = value`,
    /// no `name`) leave every track list empty. A list element that is not
    /// a track id is skipped and reported; the other elements are kept.
    pub fn parse(manifest: &[u8]) -> Self {
        let mut pack = Self {
            parse_error: None,
            race_tracks: Vec::new(),
            balloon_tracks: Vec::new(),
            coin_tracks: Vec::new(),
            author_names: String::new(),
            description: String::new(),
            display_name: String::new(),
            manifest_hash: hash_manifest(manifest),
        };

        let text = match std::str::from_utf8(manifest) {
            Ok(text) => text,
            Err(_) => {
                pack.fail_structure("manifest is not valid UTF-8".to_string());
                return pack;
            }
        };

        let mut in_pack_info = true;
        let mut has_name = false;

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_pack_info = section.trim() == PACK_INFO_SECTION;
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                pack.fail_structure(format!("line {}: expected `key = value`", line_no));
                return pack;
            };

            if !in_pack_info {
                continue;
            }

            let value = value.trim();
            match key.trim() {
                "name" => {
                    pack.display_name = truncate(value, MAX_PACK_NAME_CHARS);
                    has_name = !pack.display_name.is_empty();
                }
                "author" => pack.author_names = truncate(value, MAX_AUTHOR_CHARS),
                "description" => pack.description = truncate(value, MAX_DESCRIPTION_CHARS),
                "race" => pack.parse_track_list(TrackGameMode::RACE, value, line_no),
                "balloon" => pack.parse_track_list(TrackGameMode::BALLOON, value, line_no),
                "coin" => pack.parse_track_list(TrackGameMode::COIN, value, line_no),
                _ => {}
            }
        }

        if !has_name {
            pack.fail_structure("missing pack name".to_string());
        }

        pack
    }

    fn parse_track_list(&mut self, mode: TrackGameMode, value: &str, line_no: usize) {
        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.parse::<u32>() {
                Ok(id) => self.track_list_mut(mode).push(id),
                Err(_) => self.record_error(format!(
                    "line {}: invalid {} track id `{}`",
                    line_no,
                    mode.name(),
                    entry
                )),
            }
        }
    }

    fn fail_structure(&mut self, error: String) {
        self.race_tracks.clear();
        self.balloon_tracks.clear();
        self.coin_tracks.clear();
        self.parse_error = Some(error);
    }

    fn record_error(&mut self, error: String) {
        if self.parse_error.is_none() {
            self.parse_error = Some(error);
        }
    }

    /// Drop references the registry does not know and mark the pack unusable.
    ///
    /// Returns the number of references removed.
    pub(crate) fn drop_unknown_tracks(&mut self, known: impl Fn(u32) -> bool) -> usize {
        let mut first_unknown = None;
        let mut removed = 0;

        for mode in TrackGameMode::ALL {
            self.track_list_mut(mode).retain(|&id| {
                let keep = known(id);
                if !keep {
                    first_unknown.get_or_insert(id);
                    removed += 1;
                }
                keep
            });
        }

        if let Some(id) = first_unknown {
            self.record_error(format!("unknown track id {}", id));
        }
        removed
    }

    fn track_list(&self, mode: TrackGameMode) -> &Vec<u32> {
        assert!(mode.is_single(), "expected a single game mode, got {:?}", mode);
        match mode {
            TrackGameMode::BALLOON => &self.balloon_tracks,
            TrackGameMode::COIN => &self.coin_tracks,
            _ => &self.race_tracks,
        }
    }

    fn track_list_mut(&mut self, mode: TrackGameMode) -> &mut Vec<u32> {
        assert!(mode.is_single(), "expected a single game mode, got {:?}", mode);
        match mode {
            TrackGameMode::BALLOON => &mut self.balloon_tracks,
            TrackGameMode::COIN => &mut self.coin_tracks,
            _ => &mut self.race_tracks,
        }
    }

    /// Modes with at least one track.
    pub fn supported_modes(&self) -> TrackGameMode {
        TrackGameMode::ALL
            .into_iter()
            .filter(|&mode| !self.track_list(mode).is_empty())
            .fold(TrackGameMode::NONE, |acc, mode| acc | mode)
    }

    /// Number of tracks for a single mode.
    pub fn track_count(&self, mode: TrackGameMode) -> usize {
        self.track_list(mode).len()
    }

    /// Registry id of the `n`th track for a single mode.
    ///
    /// # Panics
    /// Panics if `n >= self.track_count(mode)` or `mode` is not a single mode.
    pub fn nth_track(&self, n: usize, mode: TrackGameMode) -> u32 {
        let list = self.track_list(mode);
        assert!(
            n < list.len(),
            "track index {} out of range for {:?} ({} tracks)",
            n,
            mode,
            list.len()
        );
        list[n]
    }

    /// All registry ids for a single mode, in pack order.
    pub fn track_ids(&self, mode: TrackGameMode) -> &[u32] {
        self.track_list(mode)
    }

    /// Check whether any mode lists `registry_id`.
    pub fn contains_track(&self, registry_id: u32) -> bool {
        TrackGameMode::ALL
            .into_iter()
            .any(|mode| self.track_list(mode).contains(&registry_id))
    }

    /// Parse error, if the pack is unusable.
    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    /// Whether the pack may be offered for selection.
    pub fn is_usable(&self) -> bool {
        self.parse_error.is_none()
    }

    /// Pack name shown in menus.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Comma separated author list.
    pub fn author_names(&self) -> &str {
        &self.author_names
    }

    /// Free text description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// SHA-256 fingerprint of the manifest bytes.
    pub fn manifest_hash(&self) -> &PackHash {
        &self.manifest_hash
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

// =============================================================================
// TESTS
// =============================================================================
