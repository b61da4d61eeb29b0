//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for store eviction.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Every touch stamps the key with a fresh tick; the smallest tick is the
/// least recently used key.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Tick of the last access per key
    ticks: HashMap<Vec<u8>, u64>,
    /// Keys ordered by access tick
    order: BTreeMap<u64, Vec<u8>>,
    /// Next tick to hand out
    clock: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used, tracking it if new.
    pub fn touch(&mut self, key: &[u8]) {
        self.clock += 1;
        let tick = self.clock;
        if let Some(previous) = self.ticks.insert(key.to_vec(), tick) {
            self.order.remove(&previous);
        }
        self.order.insert(tick, key.to_vec());
    }

    // == Remove ==
    /// Stops tracking a key.
    pub fn remove(&mut self, key: &[u8]) {
        if let Some(tick) = self.ticks.remove(key) {
            self.order.remove(&tick);
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<Vec<u8>> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }
}
