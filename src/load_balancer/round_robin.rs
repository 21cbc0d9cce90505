//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin selector.
/// Stores an internal counter to rotate through targets.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the cursor and return the index to use.
    pub fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % len)
    }

    /// Index the next call to `next_index` would return.
    pub fn peek_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.counter.load(Ordering::Relaxed) % len)
    }

    pub fn set_index(&self, index: usize) {
        self.counter.store(index, Ordering::Relaxed);
    }
}
