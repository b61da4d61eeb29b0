//! Expiry Sweep Task
//!
//! Background task that periodically removes expired items from the
//! in-memory stores. Reads already skip expired items; the sweep only
//! reclaims their memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::MemoryStore;

/// Spawns a task that purges expired items from every store in `stores`
/// once per `interval`, then logs each store's statistics.
///
/// The returned handle can be used to abort the task during graceful
/// shutdown.
///
/// # Example
/// ```ignore
/// let objects = Arc::new(MemoryStore::new(1000, 1 << 20));
/// let cleanup_handle = spawn_cleanup_task(vec![objects.clone()], Duration::from_secs(30));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(stores: Vec<Arc<MemoryStore>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?interval, stores = stores.len(), "starting expiry sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let mut removed = 0;
            for (index, store) in stores.iter().enumerate() {
                match store.purge_expired() {
                    Ok(count) => removed += count,
                    Err(err) => warn!(error = %err, "expiry sweep failed"),
                }
                log_stats(index, store);
            }

            if removed > 0 {
                info!(removed, "expiry sweep removed expired items");
            } else {
                debug!("expiry sweep found nothing to remove");
            }
        }
    })
}

fn log_stats(index: usize, store: &MemoryStore) {
    match store.stats() {
        Ok(stats) => debug!(
            store = index,
            entries = stats.total_entries,
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = stats.hit_rate(),
            evictions = stats.evictions,
            expirations = stats.expirations,
            "store statistics"
        ),
        Err(err) => warn!(store = index, error = %err, "store statistics unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::store::KeyedStore;

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_items() {
        let store = Arc::new(MemoryStore::new(100, 1024));
        store
            .set(b"expire_soon", Bytes::from_static(b"v"), Some(Duration::from_millis(50)))
            .unwrap();

        let handle = spawn_cleanup_task(vec![store.clone()], Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(store.is_empty(), "expired item should have been swept");
        assert_eq!(store.stats().unwrap().expirations, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_live_items() {
        let meta = Arc::new(MemoryStore::new(100, 1024));
        let objects = Arc::new(MemoryStore::new(100, 1024));
        meta.set(b"vary", Bytes::from_static(b"[]"), None).unwrap();
        objects
            .set(b"obj", Bytes::from_static(b"v"), Some(Duration::from_secs(3600)))
            .unwrap();

        let handle = spawn_cleanup_task(
            vec![meta.clone(), objects.clone()],
            Duration::from_millis(50),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(meta.len(), 1);
        assert_eq!(objects.get(b"obj").unwrap(), Some(Bytes::from_static(b"v")));

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let handle = spawn_cleanup_task(Vec::new(), Duration::from_secs(1));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "task should be finished after abort");
    }
}
