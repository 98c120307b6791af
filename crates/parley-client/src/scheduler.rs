//! Cancellable recurring tasks.
//!
//! Every timer the engine uses goes through [`Scheduler`]: `schedule` returns
//! a handle, `cancel` stops it and is safe to call any number of times.
//! [`TokioScheduler`] runs real timers; [`ManualScheduler`] only fires when
//! told to, which keeps scheduling tests deterministic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

pub trait Scheduler: Send {
    /// Run `task` every `interval`, first after one full interval.
    fn schedule(&mut self, interval: Duration, task: TimerCallback) -> TimerHandle;

    /// Stop a timer. Unknown or already-cancelled handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);

    /// Number of timers currently scheduled.
    fn live_count(&self) -> usize;
}

/// Timers backed by spawned tokio tasks. Must be used inside a runtime.
#[derive(Default)]
pub struct TokioScheduler {
    next_id: u64,
    tasks: HashMap<TimerHandle, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, interval: Duration, mut task: TimerCallback) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                task();
            }
        });
        self.tasks.insert(handle, join);
        debug!(timer = handle.0, ?interval, "Timer scheduled");
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(join) = self.tasks.remove(&handle) {
            join.abort();
            debug!(timer = handle.0, "Timer cancelled");
        }
    }

    fn live_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, join) in self.tasks.drain() {
            join.abort();
        }
    }
}

#[derive(Default)]
struct ManualTimers {
    next_id: u64,
    timers: BTreeMap<TimerHandle, (Duration, TimerCallback)>,
}

/// Timers that fire only through [`ManualScheduler::fire_all`].
///
/// Clones share the same timer table, so a test can keep one clone while the
/// engine owns another.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualTimers>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn timers(&self) -> std::sync::MutexGuard<'_, ManualTimers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire every live timer once. Returns how many fired.
    pub fn fire_all(&self) -> usize {
        let mut guard = self.timers();
        for (_, task) in guard.timers.values_mut() {
            task();
        }
        guard.timers.len()
    }

    /// Live timers and their intervals, oldest first.
    pub fn live(&self) -> Vec<(TimerHandle, Duration)> {
        self.timers()
            .timers
            .iter()
            .map(|(handle, (interval, _))| (*handle, *interval))
            .collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, interval: Duration, task: TimerCallback) -> TimerHandle {
        let mut guard = self.timers();
        guard.next_id += 1;
        let handle = TimerHandle(guard.next_id);
        guard.timers.insert(handle, (interval, task));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.timers().timers.remove(&handle);
    }

    fn live_count(&self) -> usize {
        self.timers().timers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, TimerCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_ticks_until_cancelled() {
        let mut scheduler = TokioScheduler::new();
        let (count, task) = counter();
        let handle = scheduler.schedule(Duration::from_secs(10), task);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        scheduler.cancel(handle);
        assert_eq!(scheduler.live_count(), 0);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let mut scheduler = TokioScheduler::new();
        let (_, task) = counter();
        let handle = scheduler.schedule(Duration::from_secs(1), task);
        scheduler.cancel(handle);
        scheduler.cancel(handle);
        assert_eq!(scheduler.live_count(), 0);
    }

    #[test]
    fn test_manual_scheduler_fires_on_demand() {
        let mut scheduler = ManualScheduler::new();
        let observer = scheduler.clone();
        let (count, task) = counter();
        let (other_count, other_task) = counter();

        let first = scheduler.schedule(Duration::from_secs(10), task);
        scheduler.schedule(Duration::from_secs(10), other_task);
        assert_eq!(observer.fire_all(), 2);

        scheduler.cancel(first);
        scheduler.cancel(first);
        assert_eq!(observer.fire_all(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(other_count.load(Ordering::SeqCst), 2);
        assert_eq!(observer.live().len(), 1);
    }
}
