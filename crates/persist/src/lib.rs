//! Persistence: region files, the shared region cache and anvil chunk trees.
//!
//! # Invariants
//! - One open handle per region path per process.
//! - A malformed section or chunk never fails more than that section or chunk.
//! - Saved chunks load back with the same sections, metadata and column data.

pub mod anvil;
pub mod cache;
pub mod region;
pub mod store;

pub use anvil::{ChunkLoadError, load_chunk, save_chunk};
pub use cache::{RegionFileCache, SharedRegion};
pub use region::{RegionError, RegionFile};
pub use store::{ChunkStore, SaveReport, StoreError, WorldMeta};
