//! Multi-column chunk transfer.
//!
//! Per column the client expects every section's block types first, then every
//! section's block light, then (with sky) every section's sky light, then one
//! biome byte per column position. Block types are `id << 4 | meta` as
//! little-endian u16.

use bytes::{BufMut, Bytes, BytesMut};
use lodestone_kernel::chunk::{COLUMN_AREA, NIBBLE_BYTES, SECTION_VOLUME};
use lodestone_kernel::Chunk;

use crate::codec::write_varint;
use crate::error::ProtocolError;
use crate::packet::Encode;

/// Two bytes per block.
pub const BLOCK_TYPE_BYTES: usize = SECTION_VOLUME * 2;

/// Biome trailer, one byte per column position.
pub const BIOME_BYTES: usize = COLUMN_AREA;

/// Bytes one section contributes to a column's data.
pub fn section_payload_size(has_sky: bool) -> usize {
    BLOCK_TYPE_BYTES + NIBBLE_BYTES + if has_sky { NIBBLE_BYTES } else { 0 }
}

/// Bytes a column with `sections` sections occupies.
pub fn column_size(sections: usize, has_sky: bool) -> usize {
    sections * section_payload_size(has_sky) + BIOME_BYTES
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMeta {
    pub x: i32,
    pub z: i32,
    pub bitmask: u16,
}

/// Section data for several columns in one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MapChunkBulk {
    pub sky_light: bool,
    pub columns: Vec<ColumnMeta>,
    pub data: Bytes,
}

impl MapChunkBulk {
    /// Snapshot `chunks` into network form. Fails if the written size disagrees
    /// with the computed size; the mismatch is logged as an invariant violation.
    pub fn from_chunks<'a, I>(chunks: I, has_sky: bool) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let chunks: Vec<&Chunk> = chunks.into_iter().collect();
        let expected: usize = chunks
            .iter()
            .map(|c| column_size(c.sections().len(), has_sky))
            .sum();

        let mut data = BytesMut::with_capacity(expected);
        let mut columns = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            write_column(chunk, has_sky, &mut data)?;
            let pos = chunk.pos();
            columns.push(ColumnMeta {
                x: pos.x,
                z: pos.z,
                bitmask: chunk.section_bitmask(),
            });
        }

        if data.len() != expected {
            tracing::error!(
                target: "lodestone::invariant",
                expected,
                written = data.len(),
                columns = chunks.len(),
                "bulk chunk payload size mismatch"
            );
            return Err(ProtocolError::BulkSizeMismatch {
                expected,
                written: data.len(),
            });
        }

        Ok(Self {
            sky_light: has_sky,
            columns,
            data: data.freeze(),
        })
    }
}

/// Append one column's data to `out`, returning the bytes written.
pub fn write_column(chunk: &Chunk, has_sky: bool, out: &mut BytesMut) -> Result<usize, ProtocolError> {
    let expected = column_size(chunk.sections().len(), has_sky);
    let start = out.len();
    out.reserve(expected);

    for section in chunk.sections() {
        for ty in section.types() {
            out.put_u16_le(ty);
        }
    }
    for section in chunk.sections() {
        out.put_slice(section.block_light().as_bytes());
    }
    if has_sky {
        for section in chunk.sections() {
            out.put_slice(section.sky_light().as_bytes());
        }
    }
    out.put_slice(chunk.biomes());

    let written = out.len() - start;
    if written != expected {
        let pos = chunk.pos();
        tracing::error!(
            target: "lodestone::invariant",
            %pos,
            expected,
            written,
            sections = chunk.sections().len(),
            "column payload size mismatch"
        );
        out.truncate(start);
        return Err(ProtocolError::BulkSizeMismatch { expected, written });
    }
    Ok(written)
}

impl Encode for MapChunkBulk {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.sky_light as u8);
        write_varint(buf, self.columns.len() as i32);
        for column in &self.columns {
            buf.put_i32(column.x);
            buf.put_i32(column.z);
            buf.put_u16(column.bitmask);
        }
        buf.put_slice(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_common::ChunkPos;
    use lodestone_kernel::chunk::SECTIONS_PER_CHUNK;
    use lodestone_kernel::{ChunkGenerator, FlatGenerator};

    fn full_chunk(pos: ChunkPos) -> Chunk {
        let mut chunk = Chunk::new(pos);
        for s in 0..SECTIONS_PER_CHUNK {
            chunk.set_block(0, s * 16, 0, 1, 0).unwrap();
        }
        chunk
    }

    #[test]
    fn empty_column_is_biomes_only() {
        let chunk = Chunk::new(ChunkPos::new(0, 0));
        let bulk = MapChunkBulk::from_chunks([&chunk], true).unwrap();
        assert_eq!(bulk.data.len(), 256);
        assert_eq!(bulk.columns[0].bitmask, 0);
    }

    #[test]
    fn full_column_size_matches_formula() {
        let chunk = full_chunk(ChunkPos::new(1, 2));
        let sky = MapChunkBulk::from_chunks([&chunk], true).unwrap();
        assert_eq!(sky.data.len(), 16 * (8192 + 2048 + 2048) + 256);
        assert_eq!(sky.columns[0].bitmask, 0xffff);

        let no_sky = MapChunkBulk::from_chunks([&chunk], false).unwrap();
        assert_eq!(no_sky.data.len(), 16 * (8192 + 2048) + 256);
    }

    #[test]
    fn types_precede_light() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        chunk.set_block(1, 0, 0, 0x0123, 5).unwrap();
        chunk.set_block(0, 16, 0, 2, 0).unwrap();
        let bulk = MapChunkBulk::from_chunks([&chunk], true).unwrap();
        let data = &bulk.data[..];

        // Section 0, block index 1: (0x123 << 4 | 5) little-endian.
        assert_eq!(&data[2..4], &[0x35, 0x12]);
        // Section 1 types start right after section 0 types.
        assert_eq!(&data[8192..8194], &[0x20, 0x00]);
        // Block light begins after both sections' types.
        assert_eq!(data[2 * 8192], 0);
        // Sky light follows block light and defaults to full.
        assert_eq!(data[2 * 8192 + 2 * 2048], 0xff);
    }

    #[test]
    fn multiple_columns_concatenate() {
        let a = FlatGenerator::default().generate(ChunkPos::new(0, 0));
        let b = Chunk::new(ChunkPos::new(-1, 3));
        let bulk = MapChunkBulk::from_chunks([&a, &b], true).unwrap();
        assert_eq!(bulk.data.len(), column_size(1, true) + column_size(0, true));
        assert_eq!(
            bulk.columns[1],
            ColumnMeta {
                x: -1,
                z: 3,
                bitmask: 0
            }
        );

        let mut buf = BytesMut::new();
        bulk.encode(&mut buf);
        assert_eq!(buf[0], 1);
        assert_eq!(buf[1], 2);
        assert_eq!(buf.len(), 2 + 2 * 10 + bulk.data.len());
    }
}
