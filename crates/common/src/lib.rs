//! Shared types: chunk and region coordinates, entity identity, positions.
//!
//! # Invariants
//! - Chunk → region mapping uses arithmetic shift, so negative chunks land in
//!   negative regions (`-1 >> 5 == -1`).

mod types;

pub use types::{ChunkPos, EntityId, Position, REGION_SPAN, RegionPos};
