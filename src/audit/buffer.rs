//! Fixed-capacity ring buffer shared by request producers and the drain task.
//!
//! Overflow policy: drop-oldest. `push` never blocks on capacity; the evicted
//! record is counted in [`RingBuffer::dropped`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

pub struct RingBuffer<T> {
    slots: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> RingBuffer<T> {
    /// Capacity is fixed for the buffer's lifetime (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RingBuffer {
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue `item`. Returns true when the oldest entry was evicted to make room.
    pub fn push(&self, item: T) -> bool {
        let mut slots = self.slots();
        let evicted = if slots.len() >= self.capacity {
            slots.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };
        slots.push_back(item);
        evicted
    }

    /// Remove up to `max` entries in FIFO order.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut slots = self.slots();
        let n = max.min(slots.len());
        slots.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
