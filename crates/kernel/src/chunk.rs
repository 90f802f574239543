//! Chunk columns and their vertical sections.
//!
//! Block index order inside a section is `y << 8 | z << 4 | x`, the layout both
//! the anvil format and the bulk network format use.

use fastnbt::Value;
use lodestone_common::ChunkPos;

use crate::block::{AIR, BlockRegistry, MAX_BLOCK_ID};

/// Blocks along each edge of a section.
pub const SECTION_WIDTH: usize = 16;
/// Blocks per section.
pub const SECTION_VOLUME: usize = SECTION_WIDTH * SECTION_WIDTH * SECTION_WIDTH;
/// Bytes of a nibble array covering one section.
pub const NIBBLE_BYTES: usize = SECTION_VOLUME / 2;
/// Sections stacked in a full-height column.
pub const SECTIONS_PER_CHUNK: usize = 16;
/// Block columns in a chunk (one biome byte and one height entry each).
pub const COLUMN_AREA: usize = SECTION_WIDTH * SECTION_WIDTH;
/// Column height in blocks.
pub const CHUNK_HEIGHT: usize = SECTION_WIDTH * SECTIONS_PER_CHUNK;

/// Errors from building or editing chunk data.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("{field} has {actual} entries, expected {expected}")]
    BadLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("section y={0} outside 0..16")]
    SectionOutOfRange(i32),
    #[error("block ({x}, {y}, {z}) outside the chunk")]
    OutOfBounds { x: usize, y: usize, z: usize },
    #[error("block id {0} exceeds 12 bits")]
    BlockIdTooLarge(u16),
}

/// Packed 4-bit values, two per byte, low nibble first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NibbleArray(Vec<u8>);

impl NibbleArray {
    pub fn new() -> Self {
        Self(vec![0; NIBBLE_BYTES])
    }

    /// Every nibble set to `value`.
    pub fn filled(value: u8) -> Self {
        let v = value & 0x0f;
        Self(vec![v | (v << 4); NIBBLE_BYTES])
    }

    pub fn from_bytes(field: &'static str, bytes: Vec<u8>) -> Result<Self, ChunkError> {
        if bytes.len() != NIBBLE_BYTES {
            return Err(ChunkError::BadLength {
                field,
                expected: NIBBLE_BYTES,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn get(&self, index: usize) -> u8 {
        let byte = self.0[index >> 1];
        if index & 1 == 0 { byte & 0x0f } else { byte >> 4 }
    }

    pub fn set(&mut self, index: usize, value: u8) {
        let byte = &mut self.0[index >> 1];
        let v = value & 0x0f;
        if index & 1 == 0 {
            *byte = (*byte & 0xf0) | v;
        } else {
            *byte = (*byte & 0x0f) | (v << 4);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for NibbleArray {
    fn default() -> Self {
        Self::new()
    }
}

/// A 16×16×16 slice of a chunk column.
///
/// Every array has exactly one entry per block position; the constructors
/// reject anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSection {
    y: u8,
    blocks: Vec<u16>,
    metadata: NibbleArray,
    block_light: NibbleArray,
    sky_light: NibbleArray,
}

impl ChunkSection {
    /// An all-air section at height index `y`, fully sky lit.
    pub fn new(y: u8) -> Result<Self, ChunkError> {
        if y as usize >= SECTIONS_PER_CHUNK {
            return Err(ChunkError::SectionOutOfRange(y as i32));
        }
        Ok(Self {
            y,
            blocks: vec![AIR; SECTION_VOLUME],
            metadata: NibbleArray::new(),
            block_light: NibbleArray::new(),
            sky_light: NibbleArray::filled(15),
        })
    }

    pub fn from_parts(
        y: u8,
        blocks: Vec<u16>,
        metadata: NibbleArray,
        block_light: NibbleArray,
        sky_light: NibbleArray,
    ) -> Result<Self, ChunkError> {
        if y as usize >= SECTIONS_PER_CHUNK {
            return Err(ChunkError::SectionOutOfRange(y as i32));
        }
        if blocks.len() != SECTION_VOLUME {
            return Err(ChunkError::BadLength {
                field: "Blocks",
                expected: SECTION_VOLUME,
                actual: blocks.len(),
            });
        }
        if let Some(&id) = blocks.iter().find(|&&id| id > MAX_BLOCK_ID) {
            return Err(ChunkError::BlockIdTooLarge(id));
        }
        Ok(Self {
            y,
            blocks,
            metadata,
            block_light,
            sky_light,
        })
    }

    pub fn index(x: usize, y: usize, z: usize) -> usize {
        (y << 8) | (z << 4) | x
    }

    pub fn y(&self) -> u8 {
        self.y
    }

    /// `(block id, metadata)` at section-local coordinates.
    pub fn block(&self, x: usize, y: usize, z: usize) -> (u16, u8) {
        let i = Self::index(x, y, z);
        (self.blocks[i], self.metadata.get(i))
    }

    pub fn set_block(&mut self, x: usize, y: usize, z: usize, id: u16, meta: u8) {
        let i = Self::index(x, y, z);
        self.blocks[i] = id;
        self.metadata.set(i, meta);
    }

    /// Network block type at `index`: id in the high 12 bits, metadata in the low 4.
    pub fn type_at(&self, index: usize) -> u16 {
        (self.blocks[index] << 4) | self.metadata.get(index) as u16
    }

    pub fn types(&self) -> impl Iterator<Item = u16> + '_ {
        (0..SECTION_VOLUME).map(move |i| self.type_at(i))
    }

    /// Replace ids unknown to `registry` with air. Returns how many changed.
    pub fn resolve_blocks(&mut self, registry: &BlockRegistry) -> usize {
        let mut replaced = 0;
        for i in 0..SECTION_VOLUME {
            if !registry.contains(self.blocks[i]) {
                self.blocks[i] = AIR;
                self.metadata.set(i, 0);
                replaced += 1;
            }
        }
        replaced
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|&id| id == AIR)
    }

    pub fn blocks(&self) -> &[u16] {
        &self.blocks
    }

    pub fn metadata(&self) -> &NibbleArray {
        &self.metadata
    }

    pub fn block_light(&self) -> &NibbleArray {
        &self.block_light
    }

    pub fn sky_light(&self) -> &NibbleArray {
        &self.sky_light
    }

    pub fn block_light_mut(&mut self) -> &mut NibbleArray {
        &mut self.block_light
    }

    pub fn sky_light_mut(&mut self) -> &mut NibbleArray {
        &mut self.sky_light
    }
}

/// A chunk column: populated sections plus column metadata.
///
/// Sections are kept sorted by height index with no duplicates, so the slice
/// order is the order the network and disk formats expect.
#[derive(Debug, Clone)]
pub struct Chunk {
    pos: ChunkPos,
    sections: Vec<ChunkSection>,
    biomes: Vec<u8>,
    height_map: Vec<i32>,
    /// World tick of the last save.
    pub last_modified: i64,
    /// Cumulative ticks players have spent in this chunk.
    pub inhabited_time: i64,
    pub light_populated: bool,
    pub terrain_populated: bool,
    /// Entity records, carried as opaque trees.
    pub entities: Vec<Value>,
    pub tile_entities: Vec<Value>,
    pub tile_ticks: Vec<Value>,
}

impl Chunk {
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            sections: Vec::new(),
            biomes: vec![0; COLUMN_AREA],
            height_map: vec![0; COLUMN_AREA],
            last_modified: 0,
            inhabited_time: 0,
            light_populated: false,
            terrain_populated: false,
            entities: Vec::new(),
            tile_entities: Vec::new(),
            tile_ticks: Vec::new(),
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn sections(&self) -> &[ChunkSection] {
        &self.sections
    }

    pub fn section(&self, y: u8) -> Option<&ChunkSection> {
        self.find(y).ok().map(|i| &self.sections[i])
    }

    /// Insert a section, replacing any existing section at the same height.
    pub fn insert_section(&mut self, section: ChunkSection) -> Option<ChunkSection> {
        match self.find(section.y) {
            Ok(i) => Some(std::mem::replace(&mut self.sections[i], section)),
            Err(i) => {
                self.sections.insert(i, section);
                None
            }
        }
    }

    pub fn remove_section(&mut self, y: u8) -> Option<ChunkSection> {
        self.find(y).ok().map(|i| self.sections.remove(i))
    }

    /// Bit `y` is set for every populated section.
    pub fn section_bitmask(&self) -> u16 {
        self.sections.iter().fold(0, |mask, s| mask | (1 << s.y))
    }

    /// `(id, metadata)` at chunk-local coordinates; air where no section exists.
    pub fn block_at(&self, x: usize, y: usize, z: usize) -> Result<(u16, u8), ChunkError> {
        check_bounds(x, y, z)?;
        Ok(self
            .section((y / SECTION_WIDTH) as u8)
            .map_or((AIR, 0), |s| s.block(x, y % SECTION_WIDTH, z)))
    }

    /// Set a block, creating its section on demand.
    pub fn set_block(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
        id: u16,
        meta: u8,
    ) -> Result<(), ChunkError> {
        check_bounds(x, y, z)?;
        if id > MAX_BLOCK_ID {
            return Err(ChunkError::BlockIdTooLarge(id));
        }
        let sy = (y / SECTION_WIDTH) as u8;
        let i = match self.find(sy) {
            Ok(i) => i,
            Err(_) if id == AIR => return Ok(()),
            Err(i) => {
                self.sections.insert(i, ChunkSection::new(sy)?);
                i
            }
        };
        self.sections[i].set_block(x, y % SECTION_WIDTH, z, id, meta);
        Ok(())
    }

    /// Resolve every section against `registry`. Returns replaced block count.
    pub fn resolve_blocks(&mut self, registry: &BlockRegistry) -> usize {
        self.sections
            .iter_mut()
            .map(|s| s.resolve_blocks(registry))
            .sum()
    }

    pub fn biomes(&self) -> &[u8] {
        &self.biomes
    }

    /// Set every column to `biome`.
    pub fn fill_biomes(&mut self, biome: u8) {
        self.biomes.fill(biome);
    }

    pub fn set_biomes(&mut self, biomes: Vec<u8>) -> Result<(), ChunkError> {
        if biomes.len() != COLUMN_AREA {
            return Err(ChunkError::BadLength {
                field: "Biomes",
                expected: COLUMN_AREA,
                actual: biomes.len(),
            });
        }
        self.biomes = biomes;
        Ok(())
    }

    pub fn height_map(&self) -> &[i32] {
        &self.height_map
    }

    pub fn set_height_map(&mut self, heights: Vec<i32>) -> Result<(), ChunkError> {
        if heights.len() != COLUMN_AREA {
            return Err(ChunkError::BadLength {
                field: "HeightMap",
                expected: COLUMN_AREA,
                actual: heights.len(),
            });
        }
        self.height_map = heights;
        Ok(())
    }

    /// Height map entry is one above the highest non-air block, or 0.
    pub fn recompute_height_map(&mut self) {
        for z in 0..SECTION_WIDTH {
            for x in 0..SECTION_WIDTH {
                let top = self
                    .sections
                    .iter()
                    .rev()
                    .find_map(|s| {
                        (0..SECTION_WIDTH)
                            .rev()
                            .find(|&y| s.block(x, y, z).0 != AIR)
                            .map(|y| s.y as usize * SECTION_WIDTH + y + 1)
                    })
                    .unwrap_or(0);
                self.height_map[z * SECTION_WIDTH + x] = top as i32;
            }
        }
    }

    fn find(&self, y: u8) -> Result<usize, usize> {
        self.sections.binary_search_by_key(&y, |s| s.y)
    }
}

fn check_bounds(x: usize, y: usize, z: usize) -> Result<(), ChunkError> {
    if x >= SECTION_WIDTH || z >= SECTION_WIDTH || y >= CHUNK_HEIGHT {
        return Err(ChunkError::OutOfBounds { x, y, z });
    }
    Ok(())
}
