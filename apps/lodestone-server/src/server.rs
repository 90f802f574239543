use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use lodestone_common::{ChunkPos, EntityId, Position};
use lodestone_kernel::{BlockRegistry, FlatGenerator, TickReport, World, WorldEvent};
use lodestone_persist::ChunkStore;
use lodestone_protocol::packets::{Chat, ChatPosition, PlayerPosLook, UnloadChunk};
use lodestone_protocol::{Connection, ConnectionState, MapChunkBulk, PacketRegistry, Payload};
use lodestone_stream::{TickTimer, ViewTracker};

use crate::config::ServerConfig;

/// Columns per MapChunkBulk packet.
const MAX_BULK_COLUMNS: usize = 10;
const KEEP_ALIVE_TICKS: u64 = 20;
const REPORT_TICKS: u64 = 200;

/// Write sink that only counts bytes.
#[derive(Debug, Default)]
pub struct ByteCounter {
    pub bytes: u64,
}

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Per-tick consumer of the settled world: streams chunks around one viewer
/// to its connection and periodically saves the chunks that changed.
pub struct Server<W: Write> {
    config: ServerConfig,
    store: ChunkStore,
    blocks: BlockRegistry,
    generator: FlatGenerator,
    viewer: EntityId,
    /// Blocks moved along +x every tick.
    walk: f64,
    view: ViewTracker,
    connection: Connection<W>,
    timer: TickTimer,
    /// Loaded chunks that differ from their stored copy.
    dirty: BTreeSet<ChunkPos>,
}

impl<W: Write> Server<W> {
    /// Spawn the viewer in `world` and bring its connection into PLAY.
    pub fn join(
        config: ServerConfig,
        store: ChunkStore,
        world: &mut World,
        registry: Arc<PacketRegistry>,
        transport: W,
    ) -> anyhow::Result<Self> {
        let spawn = Position::new(8.0, 5.0, 8.0);
        let viewer = world.spawn(spawn);

        let mut connection = Connection::new(registry, transport);
        connection.set_state(ConnectionState::PLAY);
        connection
            .send(PlayerPosLook::from_position(&spawn))
            .context("sending spawn position")?;
        connection
            .send(Chat::new(&config.motd, ChatPosition::System, true))
            .context("sending welcome")?;
        tracing::info!(entity = viewer.network, "viewer joined");

        Ok(Self {
            view: ViewTracker::new(config.stream()),
            blocks: world.blocks().clone(),
            config,
            store,
            generator: FlatGenerator::default(),
            viewer,
            walk: 0.0,
            connection,
            timer: TickTimer::new(100),
            dirty: BTreeSet::new(),
        })
    }

    pub fn with_walk(mut self, blocks_per_tick: f64) -> Self {
        self.walk = blocks_per_tick;
        self
    }

    pub fn view(&self) -> &ViewTracker {
        &self.view
    }

    pub fn connection(&self) -> &Connection<W> {
        &self.connection
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn is_dirty(&self, pos: ChunkPos) -> bool {
        self.dirty.contains(&pos)
    }

    pub fn on_tick(&mut self, world: &mut World, report: &TickReport) {
        self.timer.record(report.elapsed);
        self.absorb(&report.events);
        // Inhabited time accrued during the step.
        self.dirty.extend(
            world
                .entities()
                .map(|entity| entity.position.chunk())
                .filter(|pos| world.chunk(*pos).is_some()),
        );

        let Some(viewer) = self.move_viewer(world) else {
            tracing::warn!(entity = self.viewer.network, "viewer entity is gone");
            return;
        };
        let update = self.view.update(viewer);

        for pos in &update.send {
            self.ensure_loaded(world, *pos);
        }
        self.send_columns(world, &update.send);
        for pos in &update.unload {
            self.unload(world, *pos);
        }

        if report.tick % KEEP_ALIVE_TICKS == 0 {
            self.send(Payload::keep_alive(report.tick as i32));
        }
        if self.config.save_interval_ticks > 0 && report.tick % self.config.save_interval_ticks == 0 {
            self.save(world, report.tick);
        }
        if report.tick % REPORT_TICKS == 0 {
            tracing::info!(
                tick = report.tick,
                avg = ?self.timer.average(),
                max = ?self.timer.max(),
                chunks = world.chunk_count(),
                held = self.view.sent_count(),
                "tick stats"
            );
        }
    }

    /// Save every dirty chunk, stamped with `tick`, and the world metadata.
    ///
    /// Chunks that fail to save stay dirty for the next attempt.
    pub fn save(&mut self, world: &mut World, tick: u64) {
        let events = world.drain_events();
        self.absorb(&events);

        let dirty = std::mem::take(&mut self.dirty);
        for pos in &dirty {
            if let Some(chunk) = world.chunk_mut(*pos) {
                chunk.last_modified = tick as i64;
            }
        }
        let report = self
            .store
            .save_all(dirty.iter().filter_map(|pos| world.chunk(*pos)));
        self.dirty.extend(report.failed.iter().copied());

        if let Err(err) = self.store.write_meta(tick) {
            tracing::error!(%err, "writing level metadata failed");
        }
        tracing::debug!(tick, saved = report.saved, failed = report.failed.len(), "world saved");
    }

    pub fn shutdown(mut self, world: &mut World) -> W {
        let tick = world.tick();
        self.save(world, tick);
        self.connection.disconnect("Server closed");
        tracing::info!(tick = world.tick(), chunks = world.chunk_count(), "server stopped");
        self.connection.into_transport()
    }

    fn absorb(&mut self, events: &[WorldEvent]) {
        for event in events {
            match *event {
                WorldEvent::ChunkGenerated { pos } => {
                    self.dirty.insert(pos);
                }
                WorldEvent::BlockChanged { x, z, .. } => {
                    self.dirty.insert(ChunkPos::from_block(x, z));
                }
                _ => {}
            }
        }
    }

    fn move_viewer(&self, world: &mut World) -> Option<ChunkPos> {
        let mut position = world.entity(self.viewer)?.position;
        if self.walk != 0.0 {
            position.pos.x += self.walk;
            world.set_position(self.viewer, position);
        }
        Some(position.chunk())
    }

    fn ensure_loaded(&mut self, world: &mut World, pos: ChunkPos) {
        if world.chunk(pos).is_some() {
            return;
        }
        match self.store.load(pos, &self.blocks) {
            Ok(Some(chunk)) => {
                world.insert_chunk(chunk);
            }
            Ok(None) => {
                world.chunk_or_generate(pos, &self.generator);
            }
            Err(err) => {
                tracing::warn!(%pos, %err, "stored chunk unreadable, regenerating");
                world.chunk_or_generate(pos, &self.generator);
            }
        }
    }

    fn send_columns(&mut self, world: &World, columns: &[ChunkPos]) {
        let has_sky = world.dimension().has_sky();
        for batch in columns.chunks(MAX_BULK_COLUMNS) {
            let chunks = batch.iter().filter_map(|pos| world.chunk(*pos));
            match MapChunkBulk::from_chunks(chunks, has_sky) {
                Ok(bulk) => self.send(bulk),
                Err(err) => {
                    tracing::error!(%err, "bulk encoding failed");
                    for pos in batch {
                        self.view.forget(*pos);
                    }
                }
            }
        }
    }

    fn unload(&mut self, world: &mut World, pos: ChunkPos) {
        self.send(UnloadChunk::from(pos));
        let Some(mut chunk) = world.remove_chunk(pos) else {
            return;
        };
        if !self.dirty.remove(&pos) {
            return;
        }
        chunk.last_modified = world.tick() as i64;
        if let Err(err) = self.store.save(&chunk) {
            tracing::error!(%pos, %err, "saving unloaded chunk failed");
        }
    }

    fn send(&mut self, payload: impl Into<Payload>) {
        if self.connection.is_closed() {
            return;
        }
        if let Err(err) = self.connection.send(payload) {
            tracing::warn!(%err, "send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use lodestone_kernel::{Dimension, Ticker};
    use lodestone_protocol::split_frame;

    fn config(root: &std::path::Path) -> ServerConfig {
        ServerConfig {
            world_dir: root.to_path_buf(),
            view_distance: 1,
            send_budget: 100,
            unload_budget: 100,
            save_interval_ticks: 0,
            ..ServerConfig::default()
        }
    }

    fn start(config: ServerConfig) -> (Ticker, Server<Vec<u8>>) {
        let store =
            ChunkStore::open(&config.world_dir, &config.region_extension, config.dimension).unwrap();
        let mut ticker = Ticker::new(World::new(config.dimension), config.tick_rate);
        let registry = Arc::new(PacketRegistry::standard().unwrap());
        let server = Server::join(config, store, ticker.world_mut(), registry, Vec::new()).unwrap();
        (ticker, server)
    }

    fn step(ticker: &mut Ticker, server: &mut Server<Vec<u8>>) {
        let report = ticker.tick();
        server.on_tick(ticker.world_mut(), &report);
    }

    fn frame_ids(bytes: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::from(bytes);
        let mut ids = Vec::new();
        while let Some(frame) = split_frame(&mut buf).unwrap() {
            ids.push(frame[0]);
        }
        ids
    }

    #[test]
    fn first_tick_streams_the_view() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut ticker, mut server) = start(config(tmp.path()));
        step(&mut ticker, &mut server);

        assert_eq!(ticker.world().chunk_count(), 9);
        assert_eq!(server.view().sent_count(), 9);
        let ids = frame_ids(server.connection().transport());
        assert_eq!(ids, vec![0x08, 0x02, 0x26]);
    }

    #[test]
    fn walking_unloads_and_saves_left_behind_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut ticker, server) = start(config(tmp.path()));
        let mut server = server.with_walk(16.0);
        step(&mut ticker, &mut server);
        step(&mut ticker, &mut server);

        // Viewer moved from chunk x=1 to x=2; column x=0 is out of range.
        let ids = frame_ids(server.connection().transport());
        assert_eq!(ids.iter().filter(|id| **id == 0x21).count(), 3);
        assert!(ticker.world().chunk(ChunkPos::new(0, 0)).is_none());
        let blocks = BlockRegistry::standard();
        assert!(server.store().load(ChunkPos::new(0, 0), &blocks).unwrap().is_some());
    }

    #[test]
    fn saved_chunks_are_loaded_instead_of_generated() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut ticker, mut server) = start(config(tmp.path()));
        step(&mut ticker, &mut server);
        assert!(ticker.world_mut().set_block(8, 10, 8, 1, 0).unwrap());
        let mut world = ticker.into_world();
        server.shutdown(&mut world);

        let (mut ticker, mut server) = start(config(tmp.path()));
        step(&mut ticker, &mut server);
        let chunk = ticker.world().chunk(ChunkPos::new(0, 0)).unwrap();
        assert_eq!(chunk.block_at(8, 10, 8).unwrap(), (1, 0));
    }

    #[test]
    fn periodic_save_records_tick() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut ticker, mut server) = start(ServerConfig {
            save_interval_ticks: 2,
            ..config(tmp.path())
        });
        step(&mut ticker, &mut server);
        step(&mut ticker, &mut server);

        let reopened = ChunkStore::open(tmp.path(), "mca", Dimension::Overworld).unwrap();
        assert_eq!(reopened.meta().tick, 2);
    }

    #[test]
    fn saves_stamp_the_world_tick() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut ticker, mut server) = start(ServerConfig {
            save_interval_ticks: 5,
            ..config(tmp.path())
        });
        for _ in 0..5 {
            step(&mut ticker, &mut server);
        }

        let blocks = BlockRegistry::standard();
        let home = server.store().load(ChunkPos::new(0, 0), &blocks).unwrap().unwrap();
        assert_eq!(home.last_modified, 5);
        assert_eq!(ticker.world().chunk(ChunkPos::new(0, 0)).unwrap().last_modified, 5);
    }

    #[test]
    fn only_changed_chunks_are_rewritten() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut ticker, mut server) = start(ServerConfig {
            save_interval_ticks: 5,
            ..config(tmp.path())
        });
        for _ in 0..5 {
            step(&mut ticker, &mut server);
        }
        assert!(!server.is_dirty(ChunkPos::new(1, 1)));

        assert!(ticker.world_mut().set_block(-1, 10, -1, 1, 0).unwrap());
        for _ in 0..5 {
            step(&mut ticker, &mut server);
        }

        let blocks = BlockRegistry::standard();
        let load = |x, z| {
            server
                .store()
                .load(ChunkPos::new(x, z), &blocks)
                .unwrap()
                .unwrap()
        };
        // The viewer's chunk accrues inhabited time, (-1, -1) took a block.
        assert_eq!(load(0, 0).last_modified, 10);
        assert_eq!(load(-1, -1).last_modified, 10);
        assert_eq!(load(-1, -1).block_at(15, 10, 15).unwrap(), (1, 0));
        assert_eq!(load(1, 1).last_modified, 5);
    }

    #[test]
    fn byte_counter_counts() {
        let mut sink = ByteCounter::default();
        sink.write_all(&[0; 17]).unwrap();
        assert_eq!(sink.bytes, 17);
    }
}
