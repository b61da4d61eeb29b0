//! Origin Client Module
//!
//! Issues the upstream request for a cache miss.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, request::Parts, HeaderMap, HeaderValue};
use tracing::debug;

use crate::error::{ConfigError, ProxyError};
use crate::proxy::hop::is_hop_by_hop;
use crate::proxy::Service;

/// Idle keep-alive connections kept per origin host.
const MAX_IDLE_PER_HOST: usize = 10;

// == Origin Client ==
#[derive(Debug, Clone)]
pub struct OriginClient {
    http: reqwest::Client,
    /// Bound on waiting for the origin's response headers
    header_timeout: Duration,
}

impl OriginClient {
    pub fn new(header_timeout: Duration) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            header_timeout,
        })
    }

    /// Forwards the client request to `service`'s origin and returns once
    /// response headers have arrived.
    pub async fn fetch(
        &self,
        service: &Service,
        parts: &Parts,
        body: Body,
    ) -> Result<reqwest::Response, ProxyError> {
        let url = service.origin_url(&parts.uri);
        debug!(%url, "fetching from origin");

        let mut request = self
            .http
            .request(parts.method.clone(), &url)
            .headers(upstream_headers(&parts.headers, &service.origin_host));
        if carries_body(&parts.headers) {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        match tokio::time::timeout(self.header_timeout, request.send()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProxyError::UpstreamTimeout),
        }
    }
}

/// Client headers minus Host and hop-by-hop fields, plus the origin's Host.
///
/// Conditional headers such as `If-None-Match` and `If-Modified-Since` pass
/// through, so the origin may answer `304`. A `304` carrying `max-age` is
/// cacheable and gets stored under the same key, and a later unconditional
/// request is then served that empty `304`.
fn upstream_headers(client: &HeaderMap, origin_host: &str) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(client.len() + 1);
    for (name, value) in client {
        if name == header::HOST || is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Ok(host) = HeaderValue::from_str(origin_host) {
        headers.insert(header::HOST, host);
    }
    headers
}

fn carries_body(headers: &HeaderMap) -> bool {
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0);
    declared_length || headers.contains_key(header::TRANSFER_ENCODING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_headers_replace_host() {
        let mut client = HeaderMap::new();
        client.insert(header::HOST, "cdn.test".parse().unwrap());
        client.insert(header::ACCEPT_LANGUAGE, "en".parse().unwrap());
        client.append(header::COOKIE, "a=1".parse().unwrap());
        client.append(header::COOKIE, "b=2".parse().unwrap());
        client.insert(header::CONNECTION, "keep-alive".parse().unwrap());

        let upstream = upstream_headers(&client, "www.origin.test");

        assert_eq!(upstream.get(header::HOST).unwrap(), "www.origin.test");
        assert_eq!(upstream.get(header::ACCEPT_LANGUAGE).unwrap(), "en");
        assert_eq!(upstream.get_all(header::COOKIE).iter().count(), 2);
        assert!(upstream.get(header::CONNECTION).is_none());
    }

    #[test]
    fn test_conditional_headers_pass_through() {
        let mut client = HeaderMap::new();
        client.insert(header::IF_NONE_MATCH, "\"v1\"".parse().unwrap());
        client.insert(
            header::IF_MODIFIED_SINCE,
            "Sun, 06 Nov 1994 08:49:37 GMT".parse().unwrap(),
        );

        let upstream = upstream_headers(&client, "www.origin.test");

        assert_eq!(upstream.get(header::IF_NONE_MATCH).unwrap(), "\"v1\"");
        assert!(upstream.contains_key(header::IF_MODIFIED_SINCE));
    }

    #[test]
    fn test_carries_body() {
        let mut headers = HeaderMap::new();
        assert!(!carries_body(&headers));

        headers.insert(header::CONTENT_LENGTH, "0".parse().unwrap());
        assert!(!carries_body(&headers));

        headers.insert(header::CONTENT_LENGTH, "12".parse().unwrap());
        assert!(carries_body(&headers));
    }
}
