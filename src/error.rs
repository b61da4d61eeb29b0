//! Error types for the caching proxy
//!
//! Provides unified error handling using thiserror. Only [`ProxyError`] ever
//! reaches a client, and always as a fixed status with a fixed body.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

// == Response Bodies ==
pub const UNKNOWN_HOST_BODY: &str = "Requested hostname is not configured.\n";
pub const BACKEND_ERROR_BODY: &str = "Error requesting to backend.\n";
pub const BACKEND_SLOW_BODY: &str = "Backend too slow.\n";
pub const CORRUPT_ENTRY_BODY: &str = "Error reading cached object.\n";

// == Store Error ==
/// Failures reported by a keyed store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Key exceeds the store's key length limit
    #[error("key of {size} bytes exceeds maximum of {max} bytes")]
    KeyTooLong { size: usize, max: usize },

    /// Item exceeds the store's item size limit
    #[error("item of {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },

    /// Store is full and no entry could be evicted
    #[error("store is full")]
    Full,

    /// A thread panicked while holding the store lock
    #[error("store lock poisoned")]
    Poisoned,
}

// == Entry Error ==
/// Failures encoding or decoding persisted cache data.
#[derive(Error, Debug)]
pub enum EntryError {
    /// Encoded header block does not fit the 2-byte length prefix
    #[error("header block of {0} bytes exceeds the 65535 byte limit")]
    HeaderTooLarge(usize),

    /// Stored item ended before the header block did
    #[error("entry truncated: {0}")]
    Truncated(#[from] std::io::Error),

    /// Header block or vary list is not valid JSON of the expected shape
    #[error("malformed entry: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Decoded entry carries a status or header the HTTP layer rejects
    #[error("invalid stored field: {0}")]
    InvalidField(String),

    /// The underlying store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

// == Config Error ==
/// Startup configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid PROXY_SERVICES: {0}")]
    InvalidServices(#[from] serde_json::Error),

    #[error("hostname {host} is claimed by both {first} and {second}")]
    DuplicateHost {
        host: String,
        first: String,
        second: String,
    },

    #[error("failed to build origin client: {0}")]
    Client(#[from] reqwest::Error),
}

// == Proxy Error ==
/// Client-visible request failures.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// No service is configured for the request's Host
    #[error("hostname not configured: {0}")]
    UnknownHost(String),

    /// Origin could not be reached or returned a transport error
    #[error("origin request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Origin did not send response headers in time
    #[error("origin response headers timed out")]
    UpstreamTimeout,

    /// A stored entry could not be decoded
    #[error("cached entry unreadable: {0}")]
    CorruptEntry(#[from] EntryError),
}

// == IntoResponse Implementation ==
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ProxyError::UnknownHost(_) => (StatusCode::NOT_FOUND, UNKNOWN_HOST_BODY),
            ProxyError::Upstream(_) => (StatusCode::BAD_GATEWAY, BACKEND_ERROR_BODY),
            ProxyError::UpstreamTimeout => (StatusCode::BAD_GATEWAY, BACKEND_SLOW_BODY),
            ProxyError::CorruptEntry(_) => (StatusCode::BAD_GATEWAY, CORRUPT_ENTRY_BODY),
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_host_response() {
        let response = ProxyError::UnknownHost("nowhere.test".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(response).await, UNKNOWN_HOST_BODY);
    }

    #[tokio::test]
    async fn test_timeout_response_is_bad_gateway() {
        let response = ProxyError::UpstreamTimeout.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_of(response).await, BACKEND_SLOW_BODY);
    }

    #[tokio::test]
    async fn test_corrupt_entry_hides_detail() {
        let err = EntryError::InvalidField("status 1000".into());
        let response = ProxyError::CorruptEntry(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_of(response).await;
        assert_eq!(body, CORRUPT_ENTRY_BODY);
        assert!(!body.contains("1000"));
    }
}
