//! Transaction Module
//!
//! Per-request context carried from lookup to response.

use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::error::ProxyError;

pub const PROCESSING_TIME_HEADER: HeaderName = HeaderName::from_static("x-proxy-time");
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");

/// Length of generated request ids.
const REQUEST_ID_LEN: usize = 12;

// == Transaction ==
#[derive(Debug, Clone)]
pub struct Transaction {
    pub started: Instant,
    /// Identifies the request in logs and in the response
    pub request_id: String,
    pub hit: bool,
    /// Time taken for the origin to answer with headers
    pub origin_time: Duration,
    /// Key of the Vary record
    pub base_key: Vec<u8>,
    /// Key of the cached object
    pub object_key: Vec<u8>,
}

impl Transaction {
    pub fn begin() -> Self {
        let mut request_id = Uuid::new_v4().simple().to_string();
        request_id.truncate(REQUEST_ID_LEN);
        Self {
            started: Instant::now(),
            request_id,
            hit: false,
            origin_time: Duration::ZERO,
            base_key: Vec::new(),
            object_key: Vec::new(),
        }
    }

    /// `HIT` or `MISS in <origin latency>`.
    pub fn cache_status(&self) -> String {
        if self.hit {
            "HIT".to_string()
        } else {
            format!("MISS in {}", millis(self.origin_time))
        }
    }

    // == Stamp ==
    /// Adds the observability headers to a response.
    pub fn stamp(&self, headers: &mut HeaderMap) {
        let elapsed = millis(self.started.elapsed());
        let values = [
            (PROCESSING_TIME_HEADER, elapsed),
            (REQUEST_ID_HEADER, self.request_id.clone()),
            (CACHE_STATUS_HEADER, self.cache_status()),
        ];
        for (name, value) in values {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
    }

    /// Turns `err` into its fixed response, stamped.
    pub fn fail(&self, err: ProxyError) -> Response {
        let mut response = err.into_response();
        self.stamp(response.headers_mut());
        response
    }
}

/// Milliseconds with three decimals, ASCII only so it is a valid header value.
fn millis(duration: Duration) -> String {
    format!("{:.3}ms", duration.as_secs_f64() * 1e3)
}
