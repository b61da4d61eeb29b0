//! Vary Metadata Module
//!
//! Remembers, per base key, which request headers the last origin response
//! varied on. Lists are stored as JSON arrays of lowercase header names.

use std::sync::Arc;

use axum::http::HeaderName;
use bytes::Bytes;

use crate::error::EntryError;
use crate::store::KeyedStore;

// == Vary Store ==
#[derive(Clone)]
pub struct VaryStore {
    store: Arc<dyn KeyedStore>,
}

impl VaryStore {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    /// Returns the stored list for `base_key`, or `None` if never recorded.
    pub fn get(&self, base_key: &[u8]) -> Result<Option<Vec<HeaderName>>, EntryError> {
        let Some(raw) = self.store.get(base_key)? else {
            return Ok(None);
        };
        let names: Vec<String> = serde_json::from_slice(&raw)?;
        names
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| EntryError::InvalidField(format!("vary header name {name:?}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Replaces the list for `base_key`. The record never expires.
    pub fn put(&self, base_key: &[u8], names: &[HeaderName]) -> Result<(), EntryError> {
        let names: Vec<&str> = names.iter().map(HeaderName::as_str).collect();
        let raw = serde_json::to_vec(&names)?;
        self.store.set(base_key, Bytes::from(raw), None)?;
        Ok(())
    }
}
