//! Track identity, packs and the catalog.
//!
//! Clients agree on which track is raced by content hash. Each client maps
//! that hash to its own registry entry; install order and pack origin play
//! no part.

pub mod registry;
pub mod pack;
pub mod storage;
pub mod catalog;

pub use registry::{TrackRegistry, TrackRecord, RegistryError};
pub use pack::{TrackPack, TrackGameMode};
pub use storage::{TrackStorage, MemoryStorage, DirStorage, ManifestSource};
pub use catalog::{TrackPackCatalog, TrackSelection, CatalogError, CatalogConfig};
