//! Object Store Module
//!
//! Encodes cached responses into store items and reads them back.
//!
//! Item layout: `[u16 LE length N][N bytes JSON header block][body]`. The
//! body runs to the end of the item.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EntryError, StoreError};
use crate::store::{KeyedStore, ReadableItem};

/// Largest header block the 2-byte prefix can describe.
pub const MAX_HEADER_BLOCK: usize = u16::MAX as usize;

// == Entry Meta ==
/// Everything stored ahead of the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub status: u16,
    /// Full origin header set, in origin order, duplicates kept. Values are
    /// raw bytes so obs-text survives the round trip.
    pub headers: Vec<(String, Vec<u8>)>,
    pub fetched: DateTime<Utc>,
}

impl EntryMeta {
    pub fn new(status: StatusCode, headers: &HeaderMap, fetched: DateTime<Utc>) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
            .collect();
        Self {
            status: status.as_u16(),
            headers,
            fetched,
        }
    }

    pub fn status(&self) -> Result<StatusCode, EntryError> {
        StatusCode::from_u16(self.status)
            .map_err(|_| EntryError::InvalidField(format!("status {}", self.status)))
    }

    /// Rebuilds the stored header set.
    pub fn header_map(&self) -> Result<HeaderMap, EntryError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| EntryError::InvalidField(format!("header name {name:?}")))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|_| EntryError::InvalidField(format!("value of {name}")))?;
            map.append(name, value);
        }
        Ok(map)
    }

    /// Time since the entry was fetched, zero if the clock went backwards.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched).to_std().unwrap_or(Duration::ZERO)
    }
}

// == Header Block Codec ==
/// Encodes `meta` with its length prefix.
pub fn encode_header_block(meta: &EntryMeta) -> Result<Vec<u8>, EntryError> {
    let json = serde_json::to_vec(meta)?;
    let len = u16::try_from(json.len()).map_err(|_| EntryError::HeaderTooLarge(json.len()))?;

    let mut block = Vec::with_capacity(2 + json.len());
    block.extend_from_slice(&len.to_le_bytes());
    block.extend_from_slice(&json);
    Ok(block)
}

/// Reads the length prefix and header block, leaving `reader` at the body.
pub fn decode_header_block<R: Read + ?Sized>(reader: &mut R) -> Result<EntryMeta, EntryError> {
    let mut prefix = [0u8; 2];
    reader.read_exact(&mut prefix)?;
    let len = u16::from_le_bytes(prefix) as usize;

    let mut json = vec![0u8; len];
    reader.read_exact(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

// == Cached Object ==
/// A decoded stored entry whose body is still unread.
pub struct CachedObject {
    pub meta: EntryMeta,
    pub body: Box<dyn ReadableItem>,
}

impl CachedObject {
    /// Decodes the header block of `item`.
    pub fn open(mut item: Box<dyn ReadableItem>) -> Result<Self, EntryError> {
        let meta = decode_header_block(&mut *item)?;
        Ok(Self { meta, body: item })
    }
}

// == Object Store ==
#[derive(Clone)]
pub struct ObjectStore {
    store: Arc<dyn KeyedStore>,
}

impl ObjectStore {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    /// Looks up the raw item for `key`.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Box<dyn ReadableItem>>, StoreError> {
        self.store.get_item(key)
    }

    /// Writes `meta` and `body` as one item, visible only once committed.
    ///
    /// Returns the number of bytes stored.
    pub fn put(
        &self,
        key: &[u8],
        meta: &EntryMeta,
        body: &[u8],
        ttl: Duration,
    ) -> Result<usize, EntryError> {
        let block = encode_header_block(meta)?;
        let total = block.len() + body.len();

        let mut txn = self.store.begin_write(key, total, ttl)?;
        let written = txn.write(&block).and_then(|()| txn.write(body));
        if let Err(err) = written {
            if let Err(rollback_err) = txn.rollback() {
                warn!(error = %rollback_err, "rollback of partial cache entry failed");
            }
            return Err(err.into());
        }
        txn.commit()?;
        Ok(total)
    }
}
