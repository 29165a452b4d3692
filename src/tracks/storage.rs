//! Track Storage
//!
//! Where the catalog reads its inputs from. The catalog never touches the
//! filesystem directly; it asks a `TrackStorage` for the raw track database
//! and the raw pack manifests.

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the track database under a storage root.
pub const TRACK_DB_FILE: &str = "tracks.json";

/// Directory holding pack manifests under a storage root.
pub const PACKS_DIR: &str = "packs";

/// Manifest file extension.
pub const MANIFEST_EXTENSION: &str = "ini";

/// Raw manifest as read from storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestSource {
    /// Where it came from (file name, or a label for in-memory sources).
    pub origin: String,
    /// Manifest bytes.
    pub bytes: Vec<u8>,
}

/// Source of the track database and pack manifests.
pub trait TrackStorage {
    /// Read the raw track database.
    fn read_track_db(&self) -> io::Result<Vec<u8>>;

    /// Read every pack manifest, in a stable order.
    fn read_pack_manifests(&self) -> io::Result<Vec<ManifestSource>>;
}

// =============================================================================
// IN-MEMORY STORAGE
// =============================================================================

/// Storage backed by byte buffers.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    track_db: Option<Vec<u8>>,
    manifests: Vec<ManifestSource>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the track database.
    pub fn with_track_db(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.track_db = Some(data.into());
        self
    }

    /// Add a pack manifest.
    pub fn with_manifest(mut self, origin: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.manifests.push(ManifestSource {
            origin: origin.into(),
            bytes: bytes.into(),
        });
        self
    }
}

impl TrackStorage for MemoryStorage {
    fn read_track_db(&self) -> io::Result<Vec<u8>> {
        self.track_db
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no track database"))
    }

    fn read_pack_manifests(&self) -> io::Result<Vec<ManifestSource>> {
        Ok(self.manifests.clone())
    }
}

// =============================================================================
// DIRECTORY STORAGE
// =============================================================================

/// Storage rooted at a directory:
/// `<root>/tracks.json` and `<root>/packs/*.ini`.
#[derive(Clone, Debug)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// Create storage rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TrackStorage for DirStorage {
    fn read_track_db(&self) -> io::Result<Vec<u8>> {
        std::fs::read(self.root.join(TRACK_DB_FILE))
    }

    fn read_pack_manifests(&self) -> io::Result<Vec<ManifestSource>> {
        let dir = self.root.join(PACKS_DIR);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No pack directory at {}", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_manifest = path
                .extension()
                .map_or(false, |ext| ext == MANIFEST_EXTENSION);
            if is_manifest && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let bytes = std::fs::read(&path)?;
                let origin = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(ManifestSource { origin, bytes })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("race-sync-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join(PACKS_DIR)).unwrap();
        dir
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new()
            .with_track_db(b"[]".to_vec())
            .with_manifest("a", "name = A");

        assert_eq!(storage.read_track_db().unwrap(), b"[]");
        let manifests = storage.read_pack_manifests().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].origin, "a");
    }

    #[test]
    fn test_memory_storage_missing_db() {
        let err = MemoryStorage::new().read_track_db().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_dir_storage_sorted_manifests() {
        let root = scratch_dir();
        std::fs::write(root.join(TRACK_DB_FILE), b"[]").unwrap();
        std::fs::write(root.join(PACKS_DIR).join("b.ini"), b"name = B").unwrap();
        std::fs::write(root.join(PACKS_DIR).join("a.ini"), b"name = A").unwrap();
        std::fs::write(root.join(PACKS_DIR).join("notes.txt"), b"ignored").unwrap();

        let storage = DirStorage::new(&root);
        assert_eq!(storage.read_track_db().unwrap(), b"[]");

        let origins: Vec<_> = storage
            .read_pack_manifests()
            .unwrap()
            .into_iter()
            .map(|m| m.origin)
            .collect();
        assert_eq!(origins, vec!["a.ini", "b.ini"]);

        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_dir_storage_without_packs() {
        let root = std::env::temp_dir().join(format!("race-sync-{}", uuid::Uuid::new_v4()));
        let storage = DirStorage::new(&root);
        assert!(storage.read_pack_manifests().unwrap().is_empty());
        assert!(storage.read_track_db().is_err());
    }
}
