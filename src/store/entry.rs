//! Stored Item Module
//!
//! Defines a single stored value with its TTL bookkeeping.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

// == Stored Item ==
/// A single value held by the memory store.
#[derive(Debug, Clone)]
pub struct StoredItem {
    /// The stored bytes
    pub value: Bytes,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl StoredItem {
    // == Constructor ==
    /// Creates a new item with optional TTL.
    pub fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        let now = current_timestamp_ms();
        let expires_at = ttl.map(|ttl| now.saturating_add(saturating_millis(ttl)));

        Self {
            value,
            created_at: now,
            expires_at,
        }
    }

    // == Is Expired ==
    /// Checks if the item has expired.
    ///
    /// An item is expired once the current time reaches its expiration time.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(saturating_millis)
        .unwrap_or(0)
}

/// Whole milliseconds in `duration`, clamped to `u64::MAX`.
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
