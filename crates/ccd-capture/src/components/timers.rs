//! One-shot timers polled from the tick loop.
//!
//! Scheduling returns an owned [`TimerHandle`]. Cancelling or dropping the
//! handle is the only way to stop a timer, so a timer can never fire after
//! the record that owns its handle is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Owned cancellation handle for a scheduled timer.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Stop the timer. Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Entry<T> {
    id: u64,
    deadline: Instant,
    token: T,
    cancelled: Arc<AtomicBool>,
}

impl<T> Entry<T> {
    fn is_live(&self) -> bool {
        !self.cancelled.load(Ordering::Relaxed)
    }
}

/// Timer queue carrying a token per timer.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer firing at `deadline`. It stays armed while the returned
    /// handle is alive.
    pub fn schedule_at(&mut self, deadline: Instant, token: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.push(Entry {
            id,
            deadline,
            token,
            cancelled: cancelled.clone(),
        });
        TimerHandle { cancelled }
    }

    /// Remove and return tokens of live timers due at `now`, earliest first.
    pub fn poll(&mut self, now: Instant) -> Vec<T> {
        self.entries.retain(Entry::is_live);

        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.deadline <= now);
        self.entries = pending;

        due.sort_by_key(|e| (e.deadline, e.id));
        due.into_iter().map(|e| e.token).collect()
    }

    /// Live timers not yet fired whose token matches `predicate`.
    pub fn pending_where(&self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        self.entries
            .iter()
            .filter(|e| e.is_live() && predicate(&e.token))
            .count()
    }
}
