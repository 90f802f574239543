//! World Kernel: authoritative world state, chunk model, and the tick barrier.
//!
//! # Invariants
//! - Only the simulation thread mutates [`World`]; other threads go through [`TickSync`].
//! - A tick hands the world to consumers only after [`TickSync::await_sync`] returns.
//! - Chunk sections are ordered by height and every per-block array has one entry per block.

pub mod block;
pub mod chunk;
pub mod generator;
pub mod sync;
pub mod ticker;
pub mod world;

pub use block::{BlockRegistry, BlockType};
pub use chunk::{Chunk, ChunkError, ChunkSection, NibbleArray};
pub use generator::{ChunkGenerator, FlatGenerator};
pub use sync::{Pending, SyncOutcome, Task, TickSync};
pub use ticker::{TickReport, Ticker};
pub use world::{Dimension, EntityData, World, WorldEvent};
