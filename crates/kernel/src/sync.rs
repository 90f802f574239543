//! Tick barrier between the simulation thread and asynchronous producers.
//!
//! Plugin threads and I/O callbacks never touch [`World`] directly. They either
//! queue a [`Task`] with [`TickSync::sync`], which the simulation thread runs
//! later, or register outstanding work with [`TickSync::increment`] and close it
//! with [`Pending::complete`] so the tick cannot finish until the work lands.
//!
//! Each tick is an epoch. [`TickSync::reset`] closes the current epoch and opens
//! the next one; a [`Pending`] token remembers the epoch it was issued in, so a
//! completion arriving after the cutover is dropped instead of corrupting the
//! counters of the new tick.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::World;

/// Deferred world mutation, run on the simulation thread.
pub type Task = Box<dyn FnOnce(&mut World) + Send + 'static>;

/// How [`TickSync::await_sync`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing was outstanding; no blocking happened.
    Settled,
    /// Blocked until the last expected completion arrived.
    Released,
    /// The bounded wait elapsed first. The tick proceeds without the guarantee.
    TimedOut,
    /// A producer panicked while holding the barrier. The tick proceeds.
    Interrupted,
}

#[derive(Debug, Default)]
struct Epoch {
    id: u64,
    expected: u64,
    completed: u64,
}

impl Epoch {
    fn settled(&self) -> bool {
        self.completed == self.expected
    }
}

/// Per-tick counting barrier plus the plugin task queue.
#[derive(Default)]
pub struct TickSync {
    epoch: Mutex<Epoch>,
    released: Condvar,
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
}

impl TickSync {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one more completion the current tick must wait for.
    #[must_use = "dropping the token completes it immediately"]
    pub fn increment(self: &Arc<Self>) -> Pending {
        let mut epoch = self.lock_epoch();
        epoch.expected += 1;
        Pending {
            sync: Arc::clone(self),
            epoch: epoch.id,
            done: false,
        }
    }

    /// Record that the work behind `pending` finished. The token always
    /// settles the barrier that issued it.
    pub fn complete(&self, pending: Pending) {
        if !std::ptr::eq(Arc::as_ptr(&pending.sync), self) {
            tracing::debug!(epoch = pending.epoch, "completing a token from another barrier");
        }
        pending.complete();
    }

    /// Whether every expected completion of the current epoch has arrived.
    pub fn can_proceed(&self) -> bool {
        self.lock_epoch().settled()
    }

    /// Current epoch id. Increases by one on every [`reset`](Self::reset).
    pub fn epoch(&self) -> u64 {
        self.lock_epoch().id
    }

    /// `(expected, completed)` for the current epoch.
    pub fn counts(&self) -> (u64, u64) {
        let epoch = self.lock_epoch();
        (epoch.expected, epoch.completed)
    }

    /// Block the simulation thread until the current epoch settles.
    ///
    /// Returns immediately when nothing is outstanding. A [`reset`](Self::reset)
    /// issued from elsewhere also releases the wait, since the epoch it was
    /// waiting on no longer exists.
    pub fn await_sync(&self) -> SyncOutcome {
        let epoch = match self.epoch.lock() {
            Ok(epoch) => epoch,
            Err(poisoned) => return interrupted(poisoned),
        };
        if epoch.settled() {
            return SyncOutcome::Settled;
        }
        let id = epoch.id;
        tracing::trace!(
            epoch = id,
            expected = epoch.expected,
            completed = epoch.completed,
            "awaiting tick sync"
        );
        match self
            .released
            .wait_while(epoch, |e| e.id == id && !e.settled())
        {
            Ok(_) => SyncOutcome::Released,
            Err(poisoned) => interrupted(poisoned),
        }
    }

    /// Bounded [`await_sync`](Self::await_sync). On timeout the tick proceeds.
    pub fn await_sync_timeout(&self, timeout: Duration) -> SyncOutcome {
        let epoch = match self.epoch.lock() {
            Ok(epoch) => epoch,
            Err(poisoned) => return interrupted(poisoned),
        };
        if epoch.settled() {
            return SyncOutcome::Settled;
        }
        let id = epoch.id;
        match self
            .released
            .wait_timeout_while(epoch, timeout, |e| e.id == id && !e.settled())
        {
            Ok((epoch, result)) if result.timed_out() => {
                tracing::warn!(
                    epoch = id,
                    expected = epoch.expected,
                    completed = epoch.completed,
                    ?timeout,
                    "tick sync timed out, proceeding"
                );
                SyncOutcome::TimedOut
            }
            Ok(_) => SyncOutcome::Released,
            Err(poisoned) => interrupted(poisoned),
        }
    }

    /// Close the current epoch and open the next one with zeroed counters.
    ///
    /// Queued tasks are kept: they were submitted for the simulation thread and
    /// still run exactly once when drained.
    pub fn reset(&self) -> u64 {
        let mut epoch = self.lock_epoch();
        if !epoch.settled() {
            tracing::debug!(
                epoch = epoch.id,
                expected = epoch.expected,
                completed = epoch.completed,
                "closing epoch with outstanding completions"
            );
        }
        epoch.id += 1;
        epoch.expected = 0;
        epoch.completed = 0;
        self.released.notify_all();
        epoch.id
    }

    /// Queue `task` for the simulation thread. Never runs it inline.
    pub fn sync(&self, task: impl FnOnce(&mut World) + Send + 'static) {
        let mut tasks = self.lock_tasks();
        tasks.push_back(Box::new(task));
        self.available.notify_one();
    }

    /// Pop the next task, waiting up to `timeout` for one to arrive.
    pub fn wait_for_task(&self, timeout: Duration) -> Option<Task> {
        let tasks = self.lock_tasks();
        let mut tasks = match self
            .available
            .wait_timeout_while(tasks, timeout, |q| q.is_empty())
        {
            Ok((tasks, _)) => tasks,
            Err(poisoned) => {
                tracing::warn!("task queue poisoned while waiting, proceeding");
                poisoned.into_inner().0
            }
        };
        tasks.pop_front()
    }

    /// Pop the next task without waiting.
    pub fn next(&self) -> Option<Task> {
        self.lock_tasks().pop_front()
    }

    /// Number of queued tasks.
    pub fn left(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Run every queued task against `world`, including tasks queued by the
    /// tasks themselves. Returns how many ran.
    pub fn drain(&self, world: &mut World) -> usize {
        let mut ran = 0;
        // The queue lock is released before each task runs so a task may sync more.
        while let Some(task) = self.next() {
            task(world);
            ran += 1;
        }
        ran
    }

    fn finish(&self, issued: u64) {
        let mut epoch = self.lock_epoch();
        if epoch.id != issued {
            tracing::debug!(
                issued,
                current = epoch.id,
                "completion arrived after its epoch closed, ignoring"
            );
            return;
        }
        epoch.completed += 1;
        if epoch.completed > epoch.expected {
            tracing::error!(
                target: "lodestone::invariant",
                epoch = epoch.id,
                expected = epoch.expected,
                completed = epoch.completed,
                "tick sync completed more work than was expected"
            );
        }
        if epoch.settled() {
            self.released.notify_all();
        }
    }

    fn lock_epoch(&self) -> MutexGuard<'_, Epoch> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn interrupted<T>(_: PoisonError<T>) -> SyncOutcome {
    tracing::warn!("tick sync wait interrupted, proceeding");
    SyncOutcome::Interrupted
}

/// One expected completion, bound to the epoch it was issued in.
///
/// Dropping the token without calling [`complete`](Pending::complete) completes
/// it anyway, so a panicking producer cannot stall the tick.
pub struct Pending {
    sync: Arc<TickSync>,
    epoch: u64,
    done: bool,
}

impl Pending {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn complete(mut self) {
        self.done = true;
        self.sync.finish(self.epoch);
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!(epoch = self.epoch, "pending dropped without completion");
            self.sync.finish(self.epoch);
        }
    }
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("epoch", &self.epoch)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dimension;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn token_settles_the_barrier_that_issued_it() {
        let a = TickSync::new();
        let b = TickSync::new();
        let pending = a.increment();
        let _held = b.increment();
        b.complete(pending);
        assert!(a.can_proceed());
        assert_eq!(a.counts(), (1, 1));
        assert_eq!(b.counts(), (1, 0));
    }

    #[test]
    fn reset_then_await_returns_immediately() {
        let sync = TickSync::new();
        sync.reset();
        assert_eq!(sync.await_sync(), SyncOutcome::Settled);
    }

    #[test]
    fn await_blocks_until_all_complete() {
        let sync = TickSync::new();
        sync.reset();
        let a = sync.increment();
        let b = sync.increment();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&finished);
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            a.complete();
            thread::sleep(Duration::from_millis(20));
            flag.store(true, Ordering::SeqCst);
            b.complete();
        });

        assert_eq!(sync.await_sync(), SyncOutcome::Released);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(sync.counts(), (2, 2));
        worker.join().unwrap();
    }

    #[test]
    fn complete_through_barrier() {
        let sync = TickSync::new();
        let pending = sync.increment();
        assert!(!sync.can_proceed());
        sync.complete(pending);
        assert!(sync.can_proceed());
    }

    #[test]
    fn await_with_all_landed_does_not_block() {
        let sync = TickSync::new();
        let p = sync.increment();
        p.complete();
        assert_eq!(sync.await_sync(), SyncOutcome::Settled);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let sync = TickSync::new();
        let stale = sync.increment();
        sync.reset();
        let fresh = sync.increment();
        stale.complete();
        assert_eq!(sync.counts(), (1, 0));
        assert!(!sync.can_proceed());
        fresh.complete();
        assert!(sync.can_proceed());
    }

    #[test]
    fn dropped_token_completes() {
        let sync = TickSync::new();
        {
            let _p = sync.increment();
        }
        assert!(sync.can_proceed());
    }

    #[test]
    fn bounded_wait_times_out() {
        let sync = TickSync::new();
        let _held = sync.increment();
        let start = Instant::now();
        let outcome = sync.await_sync_timeout(Duration::from_millis(30));
        assert_eq!(outcome, SyncOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn reset_releases_waiter() {
        let sync = TickSync::new();
        let _held = sync.increment();
        let other = Arc::clone(&sync);
        let resetter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            other.reset();
        });
        assert_eq!(sync.await_sync(), SyncOutcome::Released);
        resetter.join().unwrap();
    }

    #[test]
    fn epoch_advances_on_reset() {
        let sync = TickSync::new();
        assert_eq!(sync.epoch(), 0);
        assert_eq!(sync.reset(), 1);
        assert_eq!(sync.reset(), 2);
    }

    #[test]
    fn tasks_are_fifo_and_not_run_inline() {
        let sync = TickSync::new();
        let mut world = World::new(Dimension::Overworld);
        sync.sync(|w| {
            w.spawn(Default::default());
        });
        sync.sync(|w| {
            let id = w.spawn(Default::default());
            assert_eq!(id.network, 1);
        });
        assert_eq!(world.entity_count(), 0);
        assert_eq!(sync.left(), 2);
        assert_eq!(sync.drain(&mut world), 2);
        assert_eq!(world.entity_count(), 2);
        assert_eq!(sync.left(), 0);
    }

    #[test]
    fn reset_keeps_queued_tasks() {
        let sync = TickSync::new();
        sync.sync(|_| {});
        sync.reset();
        assert_eq!(sync.left(), 1);
    }

    #[test]
    fn wait_for_task_wakes_on_sync() {
        let sync = TickSync::new();
        let producer = Arc::clone(&sync);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.sync(|_| {});
        });
        let task = sync.wait_for_task(Duration::from_secs(5));
        assert!(task.is_some());
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_task_times_out_empty() {
        let sync = TickSync::new();
        assert!(sync.wait_for_task(Duration::from_millis(10)).is_none());
        assert!(sync.next().is_none());
    }

    #[test]
    fn many_threads_settle_the_barrier() {
        let sync = TickSync::new();
        sync.reset();
        let tokens: Vec<Pending> = (0..32).map(|_| sync.increment()).collect();
        let handles: Vec<_> = tokens
            .into_iter()
            .map(|p| thread::spawn(move || p.complete()))
            .collect();
        let outcome = sync.await_sync();
        assert!(matches!(
            outcome,
            SyncOutcome::Settled | SyncOutcome::Released
        ));
        assert_eq!(sync.counts(), (32, 32));
        for h in handles {
            h.join().unwrap();
        }
    }
}
