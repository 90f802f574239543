use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Chunks per region edge. A region file holds `REGION_SPAN * REGION_SPAN` chunks.
pub const REGION_SPAN: i32 = 32;

/// Identity of an entity: the protocol-level numeric id plus a persistent UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    /// Id sent on the wire. Only unique for the lifetime of the process.
    pub network: i32,
    /// Id written to disk.
    pub uuid: Uuid,
}

impl EntityId {
    pub fn new(network: i32) -> Self {
        Self {
            network,
            uuid: Uuid::new_v4(),
        }
    }
}

/// Location and orientation of an entity. Angles are in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub pos: DVec3,
    pub yaw: f32,
    pub pitch: f32,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            pos: DVec3::new(x, y, z),
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_look(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    /// The chunk column containing this position.
    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::from_block(self.pos.x.floor() as i32, self.pos.z.floor() as i32)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            pos: DVec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

/// Chunk column coordinate (block coordinate >> 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn from_block(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x >> 4,
            z: block_z >> 4,
        }
    }

    /// Region containing this chunk.
    pub fn region(&self) -> RegionPos {
        RegionPos {
            x: self.x >> 5,
            z: self.z >> 5,
        }
    }

    /// Coordinates of this chunk inside its region, each in `0..32`.
    pub fn region_local(&self) -> (usize, usize) {
        ((self.x & 31) as usize, (self.z & 31) as usize)
    }

    /// Chebyshev distance in chunks.
    pub fn distance(&self, other: ChunkPos) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

/// Region file coordinate (chunk coordinate >> 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Canonical file name, `r.<x>.<z>.<ext>`.
    pub fn file_name(&self, ext: &str) -> String {
        format!("r.{}.{}.{}", self.x, self.z, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_uuid_uniqueness() {
        let a = EntityId::new(1);
        let b = EntityId::new(1);
        assert_ne!(a, b);
        assert_eq!(a.network, b.network);
    }

    #[test]
    fn region_shift_handles_negatives() {
        assert_eq!(ChunkPos::new(31, -1).region(), RegionPos::new(0, -1));
        assert_eq!(ChunkPos::new(32, 0).region(), RegionPos::new(1, 0));
        assert_eq!(ChunkPos::new(-32, -33).region(), RegionPos::new(-1, -2));
    }

    #[test]
    fn region_local_wraps_negatives() {
        assert_eq!(ChunkPos::new(-1, 33).region_local(), (31, 1));
        assert_eq!(ChunkPos::new(0, 0).region_local(), (0, 0));
    }

    #[test]
    fn file_name_format() {
        assert_eq!(RegionPos::new(0, -1).file_name("mca"), "r.0.-1.mca");
    }

    #[test]
    fn position_maps_to_chunk() {
        assert_eq!(Position::new(-0.5, 64.0, 17.0).chunk(), ChunkPos::new(-1, 1));
        assert_eq!(Position::default().chunk(), ChunkPos::new(0, 0));
    }
}
