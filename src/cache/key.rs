//! Cache Key Module
//!
//! Builds the base key for a request and extends it with the values of the
//! request headers a response varies on.

use std::fmt;

use axum::http::{header, HeaderMap, HeaderName, Method, Uri};
use tracing::debug;

// == Key Strategy ==
/// Derives a service's base cache key from a request.
pub trait KeyStrategy: Send + Sync + fmt::Debug {
    fn base_key(&self, method: &Method, service_id: &str, uri: &Uri) -> Vec<u8>;
}

/// `method ++ service id ++ path and query`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKey;

impl KeyStrategy for DefaultKey {
    fn base_key(&self, method: &Method, service_id: &str, uri: &Uri) -> Vec<u8> {
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        concat_key(method, service_id, target)
    }
}

/// `method ++ service id ++ path`, so query strings share one entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryIgnoringKey;

impl KeyStrategy for QueryIgnoringKey {
    fn base_key(&self, method: &Method, service_id: &str, uri: &Uri) -> Vec<u8> {
        concat_key(method, service_id, uri.path())
    }
}

fn concat_key(method: &Method, service_id: &str, target: &str) -> Vec<u8> {
    let method = method.as_str().as_bytes();
    let mut key = Vec::with_capacity(method.len() + service_id.len() + target.len());
    key.extend_from_slice(method);
    key.extend_from_slice(service_id.as_bytes());
    key.extend_from_slice(target.as_bytes());
    key
}

// == Extended Key ==
/// Prepends, in list order, the first value of each varied request header
/// to `base`. A missing header contributes nothing.
///
/// For `vary = [a, b]` the result is `value(b) ++ value(a) ++ base`.
pub fn extend_key(base: &[u8], headers: &HeaderMap, vary: &[HeaderName]) -> Vec<u8> {
    let values: Vec<&[u8]> = vary
        .iter()
        .map(|name| headers.get(name).map(|v| v.as_bytes()).unwrap_or_default())
        .collect();

    let len = base.len() + values.iter().map(|v| v.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    for value in values.iter().rev() {
        key.extend_from_slice(value);
    }
    key.extend_from_slice(base);
    key
}

// == Vary Parsing ==
/// Canonical header names listed in a response's `Vary` lines, in order.
pub fn parse_vary(response_headers: &HeaderMap) -> Vec<HeaderName> {
    response_headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => Some(name),
            Err(_) => {
                debug!(name, "ignoring invalid Vary header name");
                None
            }
        })
        .collect()
}
