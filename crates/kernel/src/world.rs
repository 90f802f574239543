use lodestone_common::{ChunkPos, EntityId, Position};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::block::BlockRegistry;
use crate::chunk::{CHUNK_HEIGHT, Chunk, ChunkError};
use crate::generator::ChunkGenerator;

/// World dimension. Only the overworld has sky light.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    #[default]
    Overworld,
    Nether,
    End,
}

impl Dimension {
    pub fn has_sky(self) -> bool {
        matches!(self, Dimension::Overworld)
    }

    /// Protocol dimension id.
    pub fn id(self) -> i8 {
        match self {
            Dimension::Nether => -1,
            Dimension::Overworld => 0,
            Dimension::End => 1,
        }
    }
}

/// A record produced by every mutation to the world.
///
/// [`crate::Ticker`] drains the log into each [`crate::TickReport`], so it
/// never holds more than one tick's worth of events.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    /// Simulation advanced to `tick`.
    Stepped { tick: u64 },
    /// A chunk read from storage was handed to the world.
    ChunkLoaded { pos: ChunkPos },
    /// A chunk was created by a generator and has never been saved.
    ChunkGenerated { pos: ChunkPos },
    ChunkUnloaded { pos: ChunkPos },
    BlockChanged {
        x: i32,
        y: i32,
        z: i32,
        id: u16,
        meta: u8,
    },
    Spawned { id: EntityId, position: Position },
    Moved {
        id: EntityId,
        old: Position,
        new: Position,
    },
    Despawned { id: EntityId },
}

/// Per-entity data stored in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityData {
    pub id: EntityId,
    pub position: Position,
    pub head_yaw: f32,
}

/// The authoritative world state, owned by the simulation thread.
///
/// BTreeMap keeps chunk and entity iteration order stable, so consumers that
/// walk the world (bulk packets, saves) see the same order every tick.
#[derive(Debug)]
pub struct World {
    dimension: Dimension,
    blocks: BlockRegistry,
    chunks: BTreeMap<ChunkPos, Chunk>,
    entities: BTreeMap<i32, EntityData>,
    tick: u64,
    next_entity: i32,
    event_log: Vec<WorldEvent>,
}

impl World {
    pub fn new(dimension: Dimension) -> Self {
        Self::with_blocks(dimension, BlockRegistry::standard())
    }

    pub fn with_blocks(dimension: Dimension, blocks: BlockRegistry) -> Self {
        Self {
            dimension,
            blocks,
            chunks: BTreeMap::new(),
            entities: BTreeMap::new(),
            tick: 0,
            next_entity: 0,
            event_log: Vec::new(),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Block-type table used to resolve loaded sections.
    pub fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    pub fn chunk(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.chunks.get(&pos)
    }

    pub fn chunk_mut(&mut self, pos: ChunkPos) -> Option<&mut Chunk> {
        self.chunks.get_mut(&pos)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Take ownership of a chunk read from storage.
    pub fn insert_chunk(&mut self, chunk: Chunk) -> Option<Chunk> {
        let pos = chunk.pos();
        self.event_log.push(WorldEvent::ChunkLoaded { pos });
        self.chunks.insert(pos, chunk)
    }

    pub fn remove_chunk(&mut self, pos: ChunkPos) -> Option<Chunk> {
        let chunk = self.chunks.remove(&pos);
        if chunk.is_some() {
            self.event_log.push(WorldEvent::ChunkUnloaded { pos });
        }
        chunk
    }

    /// Return the chunk at `pos`, generating it first if absent.
    pub fn chunk_or_generate(
        &mut self,
        pos: ChunkPos,
        generator: &dyn ChunkGenerator,
    ) -> &mut Chunk {
        let events = &mut self.event_log;
        self.chunks.entry(pos).or_insert_with(|| {
            tracing::debug!(%pos, "generating chunk");
            events.push(WorldEvent::ChunkGenerated { pos });
            generator.generate(pos)
        })
    }

    /// Set a block by world coordinates. Fails if its chunk is not loaded.
    pub fn set_block(
        &mut self,
        x: i32,
        y: i32,
        z: i32,
        id: u16,
        meta: u8,
    ) -> Result<bool, ChunkError> {
        if y < 0 || y as usize >= CHUNK_HEIGHT {
            return Err(ChunkError::OutOfBounds {
                x: (x & 15) as usize,
                y: y.max(0) as usize,
                z: (z & 15) as usize,
            });
        }
        let Some(chunk) = self.chunks.get_mut(&ChunkPos::from_block(x, z)) else {
            return Ok(false);
        };
        chunk.set_block((x & 15) as usize, y as usize, (z & 15) as usize, id, meta)?;
        self.event_log.push(WorldEvent::BlockChanged { x, y, z, id, meta });
        Ok(true)
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityData> {
        self.entities.get(&id.network)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityData> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Spawn an entity and assign it the next network id.
    pub fn spawn(&mut self, position: Position) -> EntityId {
        let id = EntityId::new(self.next_entity);
        self.next_entity = self.next_entity.wrapping_add(1);
        self.entities.insert(
            id.network,
            EntityData {
                id,
                position,
                head_yaw: position.yaw,
            },
        );
        self.event_log.push(WorldEvent::Spawned { id, position });
        id
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<EntityData> {
        let data = self.entities.remove(&id.network);
        if data.is_some() {
            self.event_log.push(WorldEvent::Despawned { id });
        }
        data
    }

    /// Move an entity and log the change. Head yaw follows the body yaw.
    pub fn set_position(&mut self, id: EntityId, new: Position) -> bool {
        let Some(data) = self.entities.get_mut(&id.network) else {
            return false;
        };
        let old = data.position;
        data.position = new;
        data.head_yaw = new.yaw;
        self.event_log.push(WorldEvent::Moved { id, old, new });
        true
    }

    /// Advance the simulation by one tick.
    ///
    /// Every loaded chunk that contains an entity accrues one tick of inhabited time.
    pub fn step(&mut self) {
        self.tick += 1;
        for data in self.entities.values() {
            if let Some(chunk) = self.chunks.get_mut(&data.position.chunk()) {
                chunk.inhabited_time += 1;
            }
        }
        self.event_log.push(WorldEvent::Stepped { tick: self.tick });
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }
}
