use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// What `push` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest buffered items until one slot is free.
    DropOldest,
    /// Discard the incoming item and keep the buffer as is.
    DropNewest,
}

/// Fixed-capacity FIFO that carries state, not work.
///
/// `push` never blocks beyond a short critical section. With the
/// [`OverflowPolicy::DropOldest`] policy a full queue always retains the
/// most recently pushed items.
pub struct BoundedLatestQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> BoundedLatestQueue<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            policy,
        }
    }

    /// Queue with the drop-oldest policy used by the frame and overlay buffers.
    pub fn drop_oldest(capacity: usize) -> Self {
        Self::new(capacity, OverflowPolicy::DropOldest)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Enqueues `item`, returning how many items were discarded to honor
    /// the capacity (evicted old items, or the new item itself).
    pub fn push(&self, item: T) -> usize {
        let mut items = self.lock();
        let mut dropped = 0;
        match self.policy {
            OverflowPolicy::DropOldest => {
                while items.len() >= self.capacity {
                    items.pop_front();
                    dropped += 1;
                }
                items.push_back(item);
            }
            OverflowPolicy::DropNewest => {
                if items.len() >= self.capacity {
                    return 1;
                }
                items.push_back(item);
            }
        }
        drop(items);
        self.available.notify_one();
        dropped
    }

    /// Waits up to `timeout` for an item. `None` means the wait timed out.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            items = self
                .available
                .wait_timeout(items, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Discards every buffered item except the newest, atomically.
    ///
    /// Returns the number of items discarded.
    pub fn try_drain_to_one(&self) -> usize {
        let mut items = self.lock();
        let excess = items.len().saturating_sub(1);
        items.drain(..excess);
        excess
    }

    /// Removes and returns the newest item, discarding anything older.
    pub fn take_latest(&self) -> Option<T> {
        let mut items = self.lock();
        let latest = items.pop_back();
        items.clear();
        latest
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
