//! Keyed Store Module
//!
//! Defines the contract the proxy expects from its persistent keyed store and
//! ships an in-memory engine with TTL expiration and LRU eviction.

mod entry;
mod lru;
mod memory;
mod stats;


use std::io::Read;
use std::time::Duration;

use bytes::Bytes;

use crate::error::StoreError;

// Re-export public types
pub use entry::{current_timestamp_ms, StoredItem};
pub use lru::LruTracker;
pub use memory::MemoryStore;
pub use stats::StoreStats;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 16 * 1024;

// == Keyed Store ==
/// A concurrently accessible byte store with per-item TTL.
///
/// The proxy applies no locking of its own around calls to a store.
pub trait KeyedStore: Send + Sync {
    /// Returns the value for `key`, or `None` when absent or expired.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

    /// Stores `value` under `key`. A `ttl` of `None` never expires.
    fn set(&self, key: &[u8], value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Opens a transactional write. Nothing is visible until commit.
    fn begin_write(
        &self,
        key: &[u8],
        size_hint: usize,
        ttl: Duration,
    ) -> Result<Box<dyn WriteTxn + '_>, StoreError>;

    /// Opens a stored item for sequential reading.
    fn get_item(&self, key: &[u8]) -> Result<Option<Box<dyn ReadableItem>>, StoreError>;
}

/// A pending write. Dropping it without commit behaves like rollback.
pub trait WriteTxn {
    /// Appends bytes to the pending item.
    fn write(&mut self, buf: &[u8]) -> Result<(), StoreError>;

    /// Atomically publishes the item.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards everything written so far.
    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A stored item being read. Released when dropped.
pub trait ReadableItem: Read + Send {
    /// Total size of the item in bytes.
    fn size(&self) -> usize;
}
