//! Cooperative timers driven by an explicit clock.
//!
//! Nothing here sleeps or spawns: the owner advances virtual time and drains
//! due tasks one at a time with [`Scheduler::poll`], so a task handler may
//! cancel other pending tasks before they are delivered. A cancelled handle
//! never fires again.

use std::time::Duration;

/// Identifies one scheduled task. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<T> {
    pub handle: TaskHandle,
    pub at: Duration,
    pub task: T,
}

#[derive(Debug)]
struct Entry<T> {
    handle: TaskHandle,
    due: Duration,
    interval: Option<Duration>,
    task: T,
}

#[derive(Debug)]
pub struct Scheduler<T> {
    now: Duration,
    next_id: u64,
    entries: Vec<Entry<T>>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule_once(&mut self, delay: Duration, task: T) -> TaskHandle {
        self.push(delay, None, task)
    }

    /// Fires every `interval` until cancelled. A zero interval is bumped to
    /// one millisecond so draining always terminates.
    pub fn schedule_repeating(&mut self, interval: Duration, task: T) -> TaskHandle {
        let interval = interval.max(Duration::from_millis(1));
        self.push(interval, Some(interval), task)
    }

    fn push(&mut self, delay: Duration, interval: Option<Duration>, task: T) -> TaskHandle {
        let handle = TaskHandle(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            handle,
            due: self.now + delay,
            interval,
            task,
        });
        handle
    }

    /// Returns `true` when the handle was still pending.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.handle != handle);
        before != self.entries.len()
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.entries.iter().any(|entry| entry.handle == handle)
    }

    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Delivers the earliest task due at or before `deadline`, moving the
    /// clock to its due time. Ties go to the task scheduled first.
    pub fn poll(&mut self, deadline: Duration) -> Option<Fired<T>> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.due <= deadline)
            .min_by_key(|(_, entry)| (entry.due, entry.handle))
            .map(|(idx, _)| idx)?;
        let due = self.entries[idx].due;
        self.now = self.now.max(due);
        let fired = match self.entries[idx].interval {
            Some(interval) => {
                let entry = &mut self.entries[idx];
                entry.due += interval;
                Fired {
                    handle: entry.handle,
                    at: due,
                    task: entry.task.clone(),
                }
            }
            None => {
                let entry = self.entries.swap_remove(idx);
                Fired {
                    handle: entry.handle,
                    at: due,
                    task: entry.task,
                }
            }
        };
        Some(fired)
    }

    /// Moves the clock forward to `deadline` once every due task has been
    /// drained.
    pub fn settle(&mut self, deadline: Duration) {
        self.now = self.now.max(deadline);
    }
}
