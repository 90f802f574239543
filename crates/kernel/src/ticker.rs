use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::sync::{SyncOutcome, TickSync};
use crate::world::{World, WorldEvent};

/// Summary of one completed tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub epoch: u64,
    pub tasks_run: usize,
    pub sync: SyncOutcome,
    pub elapsed: Duration,
    /// Everything the world logged since the previous report.
    pub events: Vec<WorldEvent>,
}

/// Fixed-cadence driver for the simulation thread.
///
/// Each tick opens a new barrier epoch, runs queued plugin tasks, steps the
/// world, waits for every outstanding completion, and drains the queue once
/// more. Only then is the world handed to consumers, so they always observe a
/// settled state.
pub struct Ticker {
    world: World,
    sync: Arc<TickSync>,
    interval: Duration,
    sync_timeout: Option<Duration>,
}

impl Ticker {
    /// `tick_rate` is in ticks per second; zero is treated as one.
    pub fn new(world: World, tick_rate: u32) -> Self {
        Self {
            world,
            sync: TickSync::new(),
            interval: Duration::from_secs(1) / tick_rate.max(1),
            sync_timeout: None,
        }
    }

    /// Bound the end-of-tick wait. Without this the tick waits indefinitely.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Barrier handle for plugin and I/O threads.
    pub fn sync(&self) -> Arc<TickSync> {
        Arc::clone(&self.sync)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn into_world(self) -> World {
        self.world
    }

    /// Run exactly one tick.
    pub fn tick(&mut self) -> TickReport {
        let start = Instant::now();
        let epoch = self.sync.reset();
        let _span = tracing::info_span!("tick", tick = self.world.tick() + 1, epoch).entered();

        let mut tasks_run = self.sync.drain(&mut self.world);
        self.world.step();
        tasks_run += self.sync.drain(&mut self.world);

        let sync = match self.sync_timeout {
            Some(timeout) => self.sync.await_sync_timeout(timeout),
            None => self.sync.await_sync(),
        };
        tasks_run += self.sync.drain(&mut self.world);

        let report = TickReport {
            tick: self.world.tick(),
            epoch,
            tasks_run,
            sync,
            elapsed: start.elapsed(),
            events: self.world.drain_events(),
        };
        tracing::trace!(
            tasks = tasks_run,
            events = report.events.len(),
            ?sync,
            elapsed = ?report.elapsed,
            "tick settled"
        );
        report
    }

    /// Tick until `running` is cleared, calling `on_tick` with the settled world
    /// after every tick and sleeping off the rest of the interval.
    pub fn run<F>(&mut self, running: &AtomicBool, mut on_tick: F)
    where
        F: FnMut(&mut World, &TickReport),
    {
        while running.load(Ordering::Acquire) {
            let start = Instant::now();
            let report = self.tick();
            on_tick(&mut self.world, &report);

            let spent = start.elapsed();
            match self.interval.checked_sub(spent) {
                Some(rest) => std::thread::sleep(rest),
                None => tracing::warn!(
                    tick = report.tick,
                    ?spent,
                    budget = ?self.interval,
                    "tick overran its budget"
                ),
            }
        }
        tracing::info!(tick = self.world.tick(), "tick loop stopped");
    }
}
