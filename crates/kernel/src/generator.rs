use lodestone_common::ChunkPos;

use crate::chunk::{Chunk, SECTION_WIDTH};

/// Source of freshly generated chunks for positions with nothing on disk.
pub trait ChunkGenerator: Send + Sync {
    fn generate(&self, pos: ChunkPos) -> Chunk;
}

/// Stacks fixed layers from y=0 upwards across the whole column.
#[derive(Debug, Clone)]
pub struct FlatGenerator {
    /// `(block id, metadata)` per layer, bottom first.
    pub layers: Vec<(u16, u8)>,
    pub biome: u8,
}

impl Default for FlatGenerator {
    fn default() -> Self {
        Self {
            // bedrock, dirt, dirt, grass
            layers: vec![(7, 0), (3, 0), (3, 0), (2, 0)],
            biome: 1,
        }
    }
}

impl ChunkGenerator for FlatGenerator {
    fn generate(&self, pos: ChunkPos) -> Chunk {
        let mut chunk = Chunk::new(pos);
        for (y, &(id, meta)) in self.layers.iter().enumerate() {
            for z in 0..SECTION_WIDTH {
                for x in 0..SECTION_WIDTH {
                    if let Err(err) = chunk.set_block(x, y, z, id, meta) {
                        tracing::warn!(%pos, y, %err, "flat layer skipped");
                    }
                }
            }
        }
        chunk.fill_biomes(self.biome);
        chunk.recompute_height_map();
        chunk.terrain_populated = true;
        chunk
    }
}
