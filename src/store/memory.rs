//! Memory Store Module
//!
//! In-memory keyed store combining HashMap storage with LRU tracking and TTL
//! expiration, behind a mutex so it can be shared across request tasks.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{
    KeyedStore, LruTracker, ReadableItem, StoreStats, StoredItem, WriteTxn, MAX_KEY_LENGTH,
};

// == Slots ==
/// The unsynchronised store state.
#[derive(Debug)]
struct Slots {
    /// Key-value storage
    entries: HashMap<Vec<u8>, StoredItem>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance statistics
    stats: StoreStats,
    /// Maximum number of entries allowed
    max_entries: usize,
}

impl Slots {
    fn insert(&mut self, key: &[u8], item: StoredItem) -> Result<(), StoreError> {
        let is_overwrite = self.entries.contains_key(key);

        if !is_overwrite && self.entries.len() >= self.max_entries {
            match self.lru.evict_oldest() {
                Some(evicted) => {
                    self.entries.remove(&evicted);
                    self.stats.record_eviction();
                }
                None => return Err(StoreError::Full),
            }
        }

        self.entries.insert(key.to_vec(), item);
        self.lru.touch(key);
        self.stats.set_total_entries(self.entries.len());
        Ok(())
    }

    fn lookup(&mut self, key: &[u8]) -> Option<Bytes> {
        let expired = match self.entries.get(key) {
            Some(item) if !item.is_expired() => {
                let value = item.value.clone();
                self.stats.record_hit();
                self.lru.touch(key);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
            self.lru.remove(key);
            self.stats.record_expirations(1);
            self.stats.set_total_entries(self.entries.len());
        }
        self.stats.record_miss();
        None
    }
}

// == Memory Store ==
/// Bounded in-memory store with LRU eviction and TTL support.
#[derive(Debug)]
pub struct MemoryStore {
    slots: Mutex<Slots>,
    /// Largest single item accepted, in bytes
    max_item_size: usize,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates a store holding at most `max_entries` items of at most
    /// `max_item_size` bytes each.
    pub fn new(max_entries: usize, max_item_size: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                stats: StoreStats::new(),
                max_entries,
            }),
            max_item_size,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slots>, StoreError> {
        self.slots.lock().map_err(|_| StoreError::Poisoned)
    }

    fn check_key(key: &[u8]) -> Result<(), StoreError> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(StoreError::KeyTooLong {
                size: key.len(),
                max: MAX_KEY_LENGTH,
            });
        }
        Ok(())
    }

    fn check_size(&self, size: usize) -> Result<(), StoreError> {
        if size > self.max_item_size {
            return Err(StoreError::TooLarge {
                size,
                max: self.max_item_size,
            });
        }
        Ok(())
    }

    // == Purge Expired ==
    /// Removes all expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut slots = self.lock()?;
        let expired: Vec<Vec<u8>> = slots
            .entries
            .iter()
            .filter(|(_, item)| item.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            slots.entries.remove(key);
            slots.lru.remove(key);
        }

        let len = slots.entries.len();
        slots.stats.record_expirations(expired.len());
        slots.stats.set_total_entries(len);
        Ok(expired.len())
    }

    // == Stats ==
    /// Returns current store statistics.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let slots = self.lock()?;
        let mut stats = slots.stats.clone();
        stats.set_total_entries(slots.entries.len());
        Ok(stats)
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.lock().map(|slots| slots.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyedStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        Ok(self.lock()?.lookup(key))
    }

    fn set(&self, key: &[u8], value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError> {
        Self::check_key(key)?;
        self.check_size(value.len())?;
        self.lock()?.insert(key, StoredItem::new(value, ttl))
    }

    fn begin_write(
        &self,
        key: &[u8],
        size_hint: usize,
        ttl: Duration,
    ) -> Result<Box<dyn WriteTxn + '_>, StoreError> {
        Self::check_key(key)?;
        self.check_size(size_hint)?;
        Ok(Box::new(MemoryWriteTxn {
            store: self,
            key: key.to_vec(),
            buf: Vec::with_capacity(size_hint),
            ttl,
        }))
    }

    fn get_item(&self, key: &[u8]) -> Result<Option<Box<dyn ReadableItem>>, StoreError> {
        let value = self.lock()?.lookup(key);
        Ok(value.map(|value| Box::new(MemoryItem::new(value)) as Box<dyn ReadableItem>))
    }
}

// == Write Transaction ==
/// Buffers writes privately until commit.
struct MemoryWriteTxn<'a> {
    store: &'a MemoryStore,
    key: Vec<u8>,
    buf: Vec<u8>,
    ttl: Duration,
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn write(&mut self, buf: &[u8]) -> Result<(), StoreError> {
        self.store.check_size(self.buf.len() + buf.len())?;
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let txn = *self;
        let item = StoredItem::new(Bytes::from(txn.buf), Some(txn.ttl));
        txn.store.lock()?.insert(&txn.key, item)
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        debug!(discarded = self.buf.len(), "write transaction rolled back");
        Ok(())
    }
}

// == Readable Item ==
/// A snapshot of a stored value; later overwrites do not affect it.
struct MemoryItem {
    data: Cursor<Bytes>,
}

impl MemoryItem {
    fn new(value: Bytes) -> Self {
        Self {
            data: Cursor::new(value),
        }
    }
}

impl Read for MemoryItem {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.data.read(buf)
    }
}

impl ReadableItem for MemoryItem {
    fn size(&self) -> usize {
        self.data.get_ref().len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn store() -> MemoryStore {
        MemoryStore::new(100, 1024)
    }

    #[test]
    fn test_store_new() {
        let store = store();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_set_and_get() {
        let store = store();

        store.set(b"key1", Bytes::from_static(b"value1"), None).unwrap();

        assert_eq!(store.get(b"key1").unwrap(), Some(Bytes::from_static(b"value1")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let store = store();
        assert!(store.get(b"nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_store_overwrite() {
        let store = store();

        store.set(b"key1", Bytes::from_static(b"value1"), None).unwrap();
        store.set(b"key1", Bytes::from_static(b"value2"), None).unwrap();

        assert_eq!(store.get(b"key1").unwrap(), Some(Bytes::from_static(b"value2")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let store = store();

        store
            .set(b"key1", Bytes::from_static(b"v"), Some(Duration::from_millis(50)))
            .unwrap();
        assert!(store.get(b"key1").unwrap().is_some());

        sleep(Duration::from_millis(80));

        assert!(store.get(b"key1").unwrap().is_none());
        assert!(store.is_empty(), "expired entry is removed on access");
    }

    #[test]
    fn test_store_lru_eviction() {
        let store = MemoryStore::new(3, 1024);

        store.set(b"key1", Bytes::from_static(b"1"), None).unwrap();
        store.set(b"key2", Bytes::from_static(b"2"), None).unwrap();
        store.set(b"key3", Bytes::from_static(b"3"), None).unwrap();
        store.get(b"key1").unwrap();
        store.set(b"key4", Bytes::from_static(b"4"), None).unwrap();

        assert_eq!(store.len(), 3);
        assert!(store.get(b"key1").unwrap().is_some());
        assert!(store.get(b"key2").unwrap().is_none());
        assert_eq!(store.stats().unwrap().evictions, 1);
    }

    #[test]
    fn test_store_stats() {
        let store = store();

        store.set(b"key1", Bytes::from_static(b"v"), None).unwrap();
        store.get(b"key1").unwrap();
        store.get(b"nonexistent").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_store_purge_expired() {
        let store = store();

        store
            .set(b"short", Bytes::from_static(b"v"), Some(Duration::from_millis(30)))
            .unwrap();
        store
            .set(b"long", Bytes::from_static(b"v"), Some(Duration::from_secs(60)))
            .unwrap();
        sleep(Duration::from_millis(60));

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(b"long").unwrap().is_some());
        assert_eq!(store.stats().unwrap().expirations, 1);
    }

    #[test]
    fn test_store_key_too_long() {
        let store = store();
        let long_key = vec![b'x'; MAX_KEY_LENGTH + 1];

        let result = store.set(&long_key, Bytes::new(), None);
        assert!(matches!(result, Err(StoreError::KeyTooLong { .. })));
    }

    #[test]
    fn test_store_value_too_large() {
        let store = store();

        let result = store.set(b"key", Bytes::from(vec![0u8; 1025]), None);
        assert!(matches!(result, Err(StoreError::TooLarge { .. })));
    }

    #[test]
    fn test_txn_invisible_until_commit() {
        let store = store();

        let mut txn = store.begin_write(b"obj", 10, Duration::from_secs(60)).unwrap();
        txn.write(b"hello").unwrap();
        assert!(store.get(b"obj").unwrap().is_none());
        txn.write(b"world").unwrap();
        txn.commit().unwrap();

        assert_eq!(store.get(b"obj").unwrap(), Some(Bytes::from_static(b"helloworld")));
    }

    #[test]
    fn test_txn_rollback_leaves_previous_value() {
        let store = store();
        store.set(b"obj", Bytes::from_static(b"old"), None).unwrap();

        let mut txn = store.begin_write(b"obj", 3, Duration::from_secs(60)).unwrap();
        txn.write(b"new").unwrap();
        txn.rollback().unwrap();

        assert_eq!(store.get(b"obj").unwrap(), Some(Bytes::from_static(b"old")));
    }

    #[test]
    fn test_txn_dropped_is_discarded() {
        let store = store();
        {
            let mut txn = store.begin_write(b"obj", 3, Duration::from_secs(60)).unwrap();
            txn.write(b"abc").unwrap();
        }
        assert!(store.get(b"obj").unwrap().is_none());
    }

    #[test]
    fn test_txn_rejects_oversized_writes() {
        let store = MemoryStore::new(10, 4);

        assert!(matches!(
            store.begin_write(b"obj", 5, Duration::from_secs(1)),
            Err(StoreError::TooLarge { .. })
        ));

        let mut txn = store.begin_write(b"obj", 4, Duration::from_secs(1)).unwrap();
        txn.write(b"abc").unwrap();
        assert!(matches!(txn.write(b"de"), Err(StoreError::TooLarge { .. })));
    }

    #[test]
    fn test_readable_item_is_a_snapshot() {
        let store = store();
        store.set(b"obj", Bytes::from_static(b"first"), None).unwrap();

        let mut item = store.get_item(b"obj").unwrap().unwrap();
        store.set(b"obj", Bytes::from_static(b"second"), None).unwrap();

        assert_eq!(item.size(), 5);
        let mut read = String::new();
        item.read_to_string(&mut read).unwrap();
        assert_eq!(read, "first");
    }

    #[test]
    fn test_get_item_missing() {
        let store = store();
        assert!(store.get_item(b"absent").unwrap().is_none());
    }
}
