use std::collections::HashSet;
use std::time::{Duration, Instant};

use lodestone_common::ChunkPos;

/// Per-connection streaming settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Radius in chunks of the square kept around the viewer.
    pub view_distance: i32,
    /// Maximum number of chunks queued for sending per tick.
    pub send_budget: usize,
    /// Maximum number of chunks unloaded per tick.
    pub unload_budget: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            view_distance: 4,
            send_budget: 8,
            unload_budget: 8,
        }
    }
}

/// Per-update streaming statistics for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub sent_this_tick: usize,
    pub unloaded_this_tick: usize,
    /// Chunks still missing from the view after this tick's budget ran out.
    pub pending: usize,
    pub total_sent: usize,
    pub update_time: Duration,
}

/// Chunks to push to and drop from one client this tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewUpdate {
    /// Nearest first.
    pub send: Vec<ChunkPos>,
    /// Farthest first.
    pub unload: Vec<ChunkPos>,
}

impl ViewUpdate {
    pub fn is_empty(&self) -> bool {
        self.send.is_empty() && self.unload.is_empty()
    }
}

/// Tracks the chunks a client holds and feeds it the rest within budget.
#[derive(Debug)]
pub struct ViewTracker {
    config: StreamConfig,
    center: Option<ChunkPos>,
    sent: HashSet<ChunkPos>,
    stats: StreamStats,
}

impl ViewTracker {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            center: None,
            sent: HashSet::new(),
            stats: StreamStats::default(),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Viewer chunk at the last update.
    pub fn center(&self) -> Option<ChunkPos> {
        self.center
    }

    /// Recompute the view around `viewer`. Chunks in `send` are recorded as
    /// held by the client; chunks in `unload` are forgotten.
    pub fn update(&mut self, viewer: ChunkPos) -> ViewUpdate {
        let _span = tracing::debug_span!("stream_update", %viewer).entered();
        let start = Instant::now();
        let radius = self.config.view_distance.max(0);

        let mut missing: Vec<ChunkPos> = view_square(viewer, radius)
            .filter(|pos| !self.sent.contains(pos))
            .collect();
        missing.sort_by_key(|pos| (distance_sq(viewer, *pos), pos.x, pos.z));
        let pending = missing.len().saturating_sub(self.config.send_budget);
        missing.truncate(self.config.send_budget);

        let mut stale: Vec<ChunkPos> = self
            .sent
            .iter()
            .filter(|pos| viewer.distance(**pos) > radius)
            .copied()
            .collect();
        stale.sort_by_key(|pos| (std::cmp::Reverse(distance_sq(viewer, *pos)), pos.x, pos.z));
        stale.truncate(self.config.unload_budget);

        for pos in &missing {
            tracing::trace!(%pos, "sending chunk");
            self.sent.insert(*pos);
        }
        for pos in &stale {
            tracing::trace!(%pos, "unloading chunk");
            self.sent.remove(pos);
        }

        self.center = Some(viewer);
        self.stats = StreamStats {
            sent_this_tick: missing.len(),
            unloaded_this_tick: stale.len(),
            pending,
            total_sent: self.sent.len(),
            update_time: start.elapsed(),
        };
        if pending > 0 {
            tracing::debug!(pending, "send budget exhausted");
        }

        ViewUpdate {
            send: missing,
            unload: stale,
        }
    }

    /// Forget a chunk the client never received, e.g. when its load failed,
    /// so a later update offers it again.
    pub fn forget(&mut self, pos: ChunkPos) -> bool {
        self.sent.remove(&pos)
    }

    /// Drop the whole view, returning what the client held.
    pub fn clear(&mut self) -> Vec<ChunkPos> {
        self.center = None;
        self.stats = StreamStats::default();
        let mut held: Vec<ChunkPos> = self.sent.drain().collect();
        held.sort();
        held
    }

    pub fn is_sent(&self, pos: ChunkPos) -> bool {
        self.sent.contains(&pos)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    /// Statistics from the last update.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }
}

fn view_square(center: ChunkPos, radius: i32) -> impl Iterator<Item = ChunkPos> {
    (-radius..=radius).flat_map(move |dx| {
        (-radius..=radius).map(move |dz| ChunkPos::new(center.x + dx, center.z + dz))
    })
}

fn distance_sq(a: ChunkPos, b: ChunkPos) -> i64 {
    let dx = i64::from(a.x - b.x);
    let dz = i64::from(a.z - b.z);
    dx * dx + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(view_distance: i32, send_budget: usize, unload_budget: usize) -> ViewTracker {
        ViewTracker::new(StreamConfig {
            view_distance,
            send_budget,
            unload_budget,
        })
    }

    #[test]
    fn config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.view_distance, 4);
        assert_eq!(config.send_budget, 8);
        assert_eq!(config.unload_budget, 8);
    }

    #[test]
    fn sends_nearest_first_within_budget() {
        let mut view = tracker(2, 5, 5);
        let update = view.update(ChunkPos::new(10, -3));

        assert_eq!(update.send.len(), 5);
        assert_eq!(update.send[0], ChunkPos::new(10, -3));
        for pos in &update.send[1..] {
            assert_eq!(distance_sq(ChunkPos::new(10, -3), *pos), 1);
        }
        assert_eq!(view.stats().pending, 25 - 5);
        assert_eq!(view.stats().sent_this_tick, 5);
    }

    #[test]
    fn fills_view_over_several_ticks() {
        let mut view = tracker(1, 4, 4);
        let center = ChunkPos::new(0, 0);
        let mut total = 0;
        for _ in 0..3 {
            total += view.update(center).send.len();
        }
        assert_eq!(total, 9);
        assert_eq!(view.sent_count(), 9);
        assert!(view.update(center).is_empty());
    }

    #[test]
    fn moving_unloads_out_of_range_chunks() {
        let mut view = tracker(1, 100, 100);
        view.update(ChunkPos::new(0, 0));
        let update = view.update(ChunkPos::new(1, 0));

        assert_eq!(update.send.len(), 3);
        assert!(update.send.iter().all(|p| p.x == 2));
        assert_eq!(update.unload.len(), 3);
        assert!(update.unload.iter().all(|p| p.x == -1));
        assert_eq!(view.sent_count(), 9);
        assert!(!view.is_sent(ChunkPos::new(-1, 0)));
    }

    #[test]
    fn unload_budget_drops_farthest_first() {
        let mut view = tracker(2, 100, 2);
        view.update(ChunkPos::new(0, 0));
        let update = view.update(ChunkPos::new(50, 50));
        assert_eq!(update.unload.len(), 2);
        assert_eq!(update.unload[0], ChunkPos::new(-2, -2));
        assert_eq!(view.sent_count(), 25 - 2 + 25);
    }

    #[test]
    fn forgotten_chunks_are_offered_again() {
        let mut view = tracker(0, 1, 1);
        let pos = ChunkPos::new(3, 3);
        assert_eq!(view.update(pos).send, vec![pos]);
        assert!(view.update(pos).is_empty());
        assert!(view.forget(pos));
        assert_eq!(view.update(pos).send, vec![pos]);
    }

    #[test]
    fn clear_returns_held_chunks() {
        let mut view = tracker(1, 100, 100);
        view.update(ChunkPos::new(0, 0));
        let held = view.clear();
        assert_eq!(held.len(), 9);
        assert_eq!(view.sent_count(), 0);
        assert_eq!(view.center(), None);
    }
}
