//! Track Pack Catalog
//!
//! Owns the track registry and the loaded packs, and tracks which pack and
//! track the player has selected. Clients agree on a track by content hash;
//! `resolve_identity` turns that hash back into a local registry id.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::hash::{PackHash, TrackIdentity};
use crate::tracks::pack::TrackPack;
use crate::tracks::registry::{RegistryError, TrackRecord, TrackRegistry};
use crate::tracks::storage::{DirStorage, ManifestSource, TrackStorage};

/// Catalog configuration.
#[derive(Clone, Debug, Default)]
pub struct CatalogConfig {
    /// Directory holding `tracks.json` and `packs/`.
    pub track_root: Option<PathBuf>,
}

impl CatalogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            track_root: std::env::var("RACE_SYNC_TRACK_ROOT").ok().map(PathBuf::from),
        }
    }

    /// Directory storage for the configured root, if any.
    pub fn storage(&self) -> Option<DirStorage> {
        self.track_root.as_ref().map(DirStorage::new)
    }
}

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No pack has been selected.
    #[error("no track pack selected")]
    NoSelection,

    /// Registry id is not in the registry.
    #[error("unknown track id {0}")]
    UnknownTrack(u32),

    /// Content hash is not in the registry.
    #[error("no local track matches {0}")]
    UnknownIdentity(TrackIdentity),

    /// Pack index past the end of the catalog.
    #[error("pack index {index} out of range ({count} packs)")]
    PackOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of loaded packs.
        count: usize,
    },

    /// Pack failed to load and cannot be selected.
    #[error("pack {index} is unusable: {reason}")]
    PackUnusable {
        /// Pack index.
        index: usize,
        /// The pack's parse error.
        reason: String,
    },

    /// Track is not part of the selected pack.
    #[error("track {registry_id} is not in pack {pack_index}")]
    TrackNotInPack {
        /// Requested track.
        registry_id: u32,
        /// Selected pack.
        pack_index: usize,
    },

    /// Storage could not be read.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Track database rejected.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The track chosen for the next race.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackSelection {
    /// Pack the track was chosen from, if it is in the selected pack.
    pub pack_index: Option<usize>,
    /// Content hash of the track.
    pub identity: TrackIdentity,
    /// Local registry id.
    pub registry_id: u32,
    /// Internal course id of the slot the track replaces.
    pub course_id: Option<u32>,
}

/// Registry plus loaded packs and the current selection.
#[derive(Debug, Default)]
pub struct TrackPackCatalog {
    registry: Arc<TrackRegistry>,
    sources: Vec<ManifestSource>,
    packs: Vec<TrackPack>,
    selected_pack: Option<usize>,
    selection: Option<TrackSelection>,
}

impl TrackPackCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    // ===== LOADING =====

    /// Load (or reload) the track database.
    ///
    /// On failure the previous registry stays in force. On success packs are
    /// re-validated against the new registry and the selection is cleared.
    #[instrument(skip(self, storage))]
    pub fn load_track_db(&mut self, storage: &dyn TrackStorage) -> Result<usize, CatalogError> {
        let data = storage.read_track_db()?;
        let registry = TrackRegistry::from_json(&data)?;
        let count = registry.len();

        self.registry = Arc::new(registry);
        self.rebuild_packs();
        self.clear_selection();

        info!("Loaded track database with {} tracks", count);
        Ok(count)
    }

    /// Load (or reload) every pack manifest.
    ///
    /// Replaces all previously loaded packs and clears the selection.
    /// Returns the number of usable packs. Broken packs are kept for
    /// diagnostics but never offered for selection.
    #[instrument(skip(self, storage))]
    pub fn load_track_packs(&mut self, storage: &dyn TrackStorage) -> Result<usize, CatalogError> {
        self.sources = storage.read_pack_manifests()?;
        self.rebuild_packs();
        self.clear_selection();

        let usable = self.packs.iter().filter(|p| p.is_usable()).count();
        info!("Loaded {} track packs ({} usable)", self.packs.len(), usable);
        Ok(usable)
    }

    fn rebuild_packs(&mut self) {
        let registry = &self.registry;
        self.packs = self
            .sources
            .iter()
            .map(|source| {
                let mut pack = TrackPack::parse(&source.bytes);
                pack.drop_unknown_tracks(|id| registry.contains(id));
                if let Some(error) = pack.parse_error() {
                    warn!("Track pack {} unusable: {}", source.origin, error);
                }
                pack
            })
            .collect();
    }

    // ===== QUERIES =====

    /// Map a peer-supplied content hash to a local registry id.
    pub fn resolve_identity(&self, identity: &TrackIdentity) -> Option<u32> {
        self.registry.lookup_identity(identity).map(|r| r.registry_id)
    }

    /// Shared handle to the registry.
    pub fn registry(&self) -> Arc<TrackRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get a track known to be in the registry.
    ///
    /// # Panics
    /// Panics if `registry_id` is not in the registry.
    pub fn track(&self, registry_id: u32) -> &TrackRecord {
        self.registry.track(registry_id)
    }

    /// Number of loaded packs, usable or not.
    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    /// Get a pack by index.
    pub fn nth_pack(&self, n: usize) -> Option<&TrackPack> {
        self.packs.get(n)
    }

    /// Packs that may be offered for selection, with their indices.
    pub fn selectable_packs(&self) -> impl Iterator<Item = (usize, &TrackPack)> {
        self.packs.iter().enumerate().filter(|(_, p)| p.is_usable())
    }

    /// Find a pack by manifest fingerprint.
    pub fn find_pack_by_manifest_hash(&self, hash: &PackHash) -> Option<(usize, &TrackPack)> {
        self.packs
            .iter()
            .enumerate()
            .find(|(_, p)| p.manifest_hash() == hash)
    }

    // ===== SELECTION =====

    /// The pack the player selected.
    pub fn selected_track_pack(&self) -> Result<&TrackPack, CatalogError> {
        self.selected_pack
            .and_then(|i| self.packs.get(i))
            .ok_or(CatalogError::NoSelection)
    }

    /// The current track selection, if a track was chosen.
    pub fn selection(&self) -> Option<&TrackSelection> {
        self.selection.as_ref()
    }

    /// Select a pack. Clears any selected track.
    pub fn select_pack(&mut self, index: usize) -> Result<&TrackPack, CatalogError> {
        let pack = self.packs.get(index).ok_or(CatalogError::PackOutOfRange {
            index,
            count: self.packs.len(),
        })?;
        if let Some(reason) = pack.parse_error() {
            return Err(CatalogError::PackUnusable {
                index,
                reason: reason.to_string(),
            });
        }

        debug!("Selected track pack {} ({})", index, pack.display_name());
        self.selected_pack = Some(index);
        self.selection = None;
        Ok(&self.packs[index])
    }

    /// Select a track from the selected pack.
    pub fn select_track(&mut self, registry_id: u32) -> Result<&TrackSelection, CatalogError> {
        let pack_index = self.selected_pack.ok_or(CatalogError::NoSelection)?;
        let record = self
            .registry
            .get(registry_id)
            .ok_or(CatalogError::UnknownTrack(registry_id))?;
        if !self.packs[pack_index].contains_track(registry_id) {
            return Err(CatalogError::TrackNotInPack { registry_id, pack_index });
        }

        let selection = Self::selection_for(record, Some(pack_index));
        Ok(self.selection.insert(selection))
    }

    /// Select a track chosen by the room, by content hash.
    ///
    /// The track does not need to be in the selected pack.
    pub fn select_track_by_identity(
        &mut self,
        identity: &TrackIdentity,
    ) -> Result<&TrackSelection, CatalogError> {
        let record = self
            .registry
            .lookup_identity(identity)
            .ok_or(CatalogError::UnknownIdentity(*identity))?;
        let pack_index = self
            .selected_pack
            .filter(|&i| self.packs[i].contains_track(record.registry_id));

        let selection = Self::selection_for(record, pack_index);
        info!(
            "Selected track {} ({}) by identity {}",
            selection.registry_id,
            record.display_name,
            identity.short()
        );
        Ok(self.selection.insert(selection))
    }

    /// Forget the selected pack and track.
    pub fn clear_selection(&mut self) {
        self.selected_pack = None;
        self.selection = None;
    }

    fn selection_for(record: &TrackRecord, pack_index: Option<usize>) -> TrackSelection {
        TrackSelection {
            pack_index,
            identity: record.identity,
            registry_id: record.registry_id,
            course_id: record.course_id(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
