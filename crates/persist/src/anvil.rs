//! Anvil chunk trees.
//!
//! ```text
//! { Level: { xPos, zPos, LastUpdate, LightPopulated, TerrainPopulated,
//!            InhabitedTime, Sections: [ { Y, Blocks, Add?, Data, BlockLight,
//!            SkyLight } ], Entities, TileEntities, TileTicks?, HeightMap,
//!            Biomes } }
//! ```

use std::collections::HashMap;

use fastnbt::{ByteArray, IntArray, Value};
use lodestone_common::ChunkPos;
use lodestone_kernel::chunk::SECTION_VOLUME;
use lodestone_kernel::{BlockRegistry, Chunk, ChunkError, ChunkSection, NibbleArray};

type Compound = HashMap<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum ChunkLoadError {
    #[error("missing tag {0}")]
    Missing(&'static str),
    #[error("tag {0} has the wrong type")]
    WrongType(&'static str),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

fn as_compound<'a>(value: &'a Value, tag: &'static str) -> Result<&'a Compound, ChunkLoadError> {
    match value {
        Value::Compound(map) => Ok(map),
        _ => Err(ChunkLoadError::WrongType(tag)),
    }
}

fn get<'a>(map: &'a Compound, tag: &'static str) -> Result<&'a Value, ChunkLoadError> {
    map.get(tag).ok_or(ChunkLoadError::Missing(tag))
}

fn byte(map: &Compound, tag: &'static str) -> Result<i8, ChunkLoadError> {
    match get(map, tag)? {
        Value::Byte(b) => Ok(*b),
        _ => Err(ChunkLoadError::WrongType(tag)),
    }
}

fn int(map: &Compound, tag: &'static str) -> Result<i32, ChunkLoadError> {
    match get(map, tag)? {
        Value::Int(v) => Ok(*v),
        _ => Err(ChunkLoadError::WrongType(tag)),
    }
}

fn long(map: &Compound, tag: &'static str) -> Result<i64, ChunkLoadError> {
    match get(map, tag)? {
        Value::Long(v) => Ok(*v),
        Value::Int(v) => Ok(*v as i64),
        _ => Err(ChunkLoadError::WrongType(tag)),
    }
}

fn bytes(map: &Compound, tag: &'static str) -> Result<Vec<u8>, ChunkLoadError> {
    match get(map, tag)? {
        Value::ByteArray(arr) => Ok(arr.iter().map(|&b| b as u8).collect()),
        _ => Err(ChunkLoadError::WrongType(tag)),
    }
}

fn list<'a>(map: &'a Compound, tag: &'static str) -> Result<&'a [Value], ChunkLoadError> {
    match get(map, tag)? {
        Value::List(items) => Ok(items),
        _ => Err(ChunkLoadError::WrongType(tag)),
    }
}

/// Absent tags become `None`; present tags of the wrong type are errors.
fn optional<T>(
    result: Result<T, ChunkLoadError>,
) -> Result<Option<T>, ChunkLoadError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(ChunkLoadError::Missing(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn signed(data: &[u8]) -> Value {
    Value::ByteArray(ByteArray::new(data.iter().map(|&b| b as i8).collect()))
}

fn load_section(value: &Value) -> Result<ChunkSection, ChunkLoadError> {
    let map = as_compound(value, "Sections")?;
    let y = byte(map, "Y")?;
    if y < 0 {
        return Err(ChunkError::SectionOutOfRange(y as i32).into());
    }

    let low = bytes(map, "Blocks")?;
    if low.len() != SECTION_VOLUME {
        return Err(ChunkError::BadLength {
            field: "Blocks",
            expected: SECTION_VOLUME,
            actual: low.len(),
        }
        .into());
    }
    let add = optional(bytes(map, "Add"))?
        .map(|raw| NibbleArray::from_bytes("Add", raw))
        .transpose()?;
    let blocks = low
        .iter()
        .enumerate()
        .map(|(i, &b)| b as u16 | (add.as_ref().map_or(0, |a| a.get(i)) as u16) << 8)
        .collect();

    let metadata = NibbleArray::from_bytes("Data", bytes(map, "Data")?)?;
    let block_light = NibbleArray::from_bytes("BlockLight", bytes(map, "BlockLight")?)?;
    let sky_light = match optional(bytes(map, "SkyLight"))? {
        Some(raw) => NibbleArray::from_bytes("SkyLight", raw)?,
        None => NibbleArray::new(),
    };
    Ok(ChunkSection::from_parts(
        y as u8,
        blocks,
        metadata,
        block_light,
        sky_light,
    )?)
}

/// Parse a chunk tree.
///
/// Best effort below the column level: a malformed section is logged and
/// skipped, and a bad height map is recomputed. Missing or mistyped column
/// tags fail the whole chunk. Loaded sections are resolved against `blocks`.
pub fn load_chunk(root: &Value, blocks: &BlockRegistry) -> Result<Chunk, ChunkLoadError> {
    let root = as_compound(root, "root")?;
    let level = as_compound(get(root, "Level")?, "Level")?;

    let pos = ChunkPos::new(int(level, "xPos")?, int(level, "zPos")?);
    let mut chunk = Chunk::new(pos);
    chunk.last_modified = long(level, "LastUpdate")?;
    chunk.inhabited_time = long(level, "InhabitedTime")?;
    chunk.light_populated = optional(byte(level, "LightPopulated"))?.unwrap_or(0) != 0;
    chunk.terrain_populated = byte(level, "TerrainPopulated")? != 0;

    for (index, section) in list(level, "Sections")?.iter().enumerate() {
        match load_section(section) {
            Ok(section) => {
                let y = section.y();
                if chunk.insert_section(section).is_some() {
                    tracing::warn!(%pos, y, "duplicate section, keeping the later one");
                }
            }
            Err(err) => tracing::warn!(%pos, index, %err, "skipping malformed section"),
        }
    }
    let replaced = chunk.resolve_blocks(blocks);
    if replaced > 0 {
        tracing::debug!(%pos, replaced, "unknown block ids replaced with air");
    }

    chunk.entities = list(level, "Entities")?.to_vec();
    chunk.tile_entities = list(level, "TileEntities")?.to_vec();
    chunk.tile_ticks = optional(list(level, "TileTicks"))?
        .map(<[Value]>::to_vec)
        .unwrap_or_default();

    if let Some(biomes) = optional(bytes(level, "Biomes"))? {
        if let Err(err) = chunk.set_biomes(biomes) {
            tracing::warn!(%pos, %err, "ignoring biomes");
        }
    }
    let heights = match level.get("HeightMap") {
        Some(Value::IntArray(arr)) => Some(arr.to_vec()),
        Some(_) => {
            tracing::warn!(%pos, "HeightMap is not an int array");
            None
        }
        None => None,
    };
    match heights.map(|h| chunk.set_height_map(h)) {
        Some(Ok(())) => {}
        Some(Err(err)) => {
            tracing::warn!(%pos, %err, "recomputing height map");
            chunk.recompute_height_map();
        }
        None => chunk.recompute_height_map(),
    }
    Ok(chunk)
}

fn save_section(section: &ChunkSection) -> Value {
    let ids = section.blocks();
    let low: Vec<u8> = ids.iter().map(|&id| id as u8).collect();

    let mut map = Compound::new();
    map.insert("Y".into(), Value::Byte(section.y() as i8));
    map.insert("Blocks".into(), signed(&low));
    if ids.iter().any(|&id| id > 0xff) {
        let mut add = NibbleArray::new();
        for (i, &id) in ids.iter().enumerate() {
            add.set(i, (id >> 8) as u8);
        }
        map.insert("Add".into(), signed(add.as_bytes()));
    }
    map.insert("Data".into(), signed(section.metadata().as_bytes()));
    map.insert("BlockLight".into(), signed(section.block_light().as_bytes()));
    map.insert("SkyLight".into(), signed(section.sky_light().as_bytes()));
    Value::Compound(map)
}

/// Build the tree for `chunk`. All-air sections are left out.
pub fn save_chunk(chunk: &Chunk) -> Value {
    let pos = chunk.pos();
    let sections = chunk
        .sections()
        .iter()
        .filter(|s| !s.is_empty())
        .map(save_section)
        .collect();

    let mut level = Compound::new();
    level.insert("xPos".into(), Value::Int(pos.x));
    level.insert("zPos".into(), Value::Int(pos.z));
    level.insert("LastUpdate".into(), Value::Long(chunk.last_modified));
    level.insert("LightPopulated".into(), Value::Byte(chunk.light_populated as i8));
    level.insert(
        "TerrainPopulated".into(),
        Value::Byte(chunk.terrain_populated as i8),
    );
    level.insert("InhabitedTime".into(), Value::Long(chunk.inhabited_time));
    level.insert("Sections".into(), Value::List(sections));
    level.insert("Entities".into(), Value::List(chunk.entities.clone()));
    level.insert("TileEntities".into(), Value::List(chunk.tile_entities.clone()));
    if !chunk.tile_ticks.is_empty() {
        level.insert("TileTicks".into(), Value::List(chunk.tile_ticks.clone()));
    }
    level.insert(
        "HeightMap".into(),
        Value::IntArray(IntArray::new(chunk.height_map().to_vec())),
    );
    level.insert("Biomes".into(), signed(chunk.biomes()));

    let mut root = Compound::new();
    root.insert("Level".into(), Value::Compound(level));
    Value::Compound(root)
}
