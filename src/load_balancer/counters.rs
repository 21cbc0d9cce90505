//! Per-target request counters.
//!
//! # Responsibilities
//! - Count requests routed to each target
//! - Enforce optional per-target limits without locking
//! - Reset all counts when a new health pass is observed

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct RequestCounters {
    counts: Box<[AtomicU64]>,
    generation: AtomicU64,
}

impl RequestCounters {
    pub fn new(len: usize) -> Self {
        Self {
            counts: (0..len).map(|_| AtomicU64::new(0)).collect(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self, index: usize) -> u64 {
        self.counts
            .get(index)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Count a request with no limit applied.
    pub fn record(&self, index: usize) {
        if let Some(count) = self.counts.get(index) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a request if the target is still under `limit`.
    pub fn try_acquire(&self, index: usize, limit: Option<u32>) -> bool {
        let Some(count) = self.counts.get(index) else {
            return false;
        };
        let Some(limit) = limit else {
            count.fetch_add(1, Ordering::Relaxed);
            return true;
        };

        let mut prev = count.load(Ordering::Relaxed);
        loop {
            if prev >= u64::from(limit) {
                return false;
            }
            match count.compare_exchange_weak(prev, prev + 1, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(x) => prev = x,
            }
        }
    }

    pub fn has_capacity(&self, index: usize, limit: Option<u32>) -> bool {
        match limit {
            Some(limit) => self.get(index) < u64::from(limit),
            None => index < self.counts.len(),
        }
    }

    /// Reset counts the first time a newer health generation is seen.
    pub fn observe(&self, generation: u64) {
        let seen = self.generation.load(Ordering::Acquire);
        if generation > seen
            && self
                .generation
                .compare_exchange(seen, generation, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            for count in self.counts.iter() {
                count.store(0, Ordering::Relaxed);
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
