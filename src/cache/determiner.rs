//! Cacheability Determiner Module
//!
//! Decides whether a response may be cached, whether it may be stored, and
//! for how long, following the parts of RFC 7234 sections 3 and 4.2.1 this
//! proxy implements.

use std::time::{Duration, SystemTime};

use axum::http::{header, HeaderMap, Method, StatusCode};

use crate::cache::directives::{pragma_no_cache, CacheControl};

/// Statuses that are cacheable without explicit freshness information.
pub const CACHEABLE_BY_DEFAULT: [u16; 2] = [200, 404];

// == Cache Decision ==
/// Outcome of a cacheability determination. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheDecision {
    /// The response may be served from cache
    pub cache: bool,
    /// The response may be written to persistent storage
    pub store: bool,
    /// A stale copy may be served
    pub allow_stale: bool,
    /// No explicit lifetime was found; the caller picks one
    pub allow_heuristic: bool,
    /// Explicit freshness lifetime
    pub ttl: Duration,
}

impl CacheDecision {
    /// Not cacheable, not storable.
    pub fn rejected() -> Self {
        Self::default()
    }

    // == Effective TTL ==
    /// Resolves the storage lifetime: `heuristic` stands in for a heuristic
    /// zero TTL, and the result is never below `floor`.
    pub fn effective_ttl(&self, heuristic: Duration, floor: Duration) -> Duration {
        let ttl = if self.allow_heuristic && self.ttl.is_zero() {
            heuristic
        } else {
            self.ttl
        };
        ttl.max(floor)
    }
}

// == Determiner ==
/// Cacheability rules for either a shared or a private cache.
#[derive(Debug, Clone)]
pub struct Determiner {
    /// Shared caches honour `s-maxage`, `proxy-revalidate` and `private`
    shared: bool,
    cacheable_by_default: Vec<u16>,
}

impl Determiner {
    pub fn new(shared: bool) -> Self {
        Self {
            shared,
            cacheable_by_default: CACHEABLE_BY_DEFAULT.to_vec(),
        }
    }

    /// Rules for a cache serving many clients.
    pub fn shared() -> Self {
        Self::new(true)
    }

    /// Rules for a single-client cache.
    pub fn private() -> Self {
        Self::new(false)
    }

    /// Determines cacheability using the current time for a missing `Date`.
    pub fn determine(
        &self,
        method: &Method,
        status: u16,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
    ) -> CacheDecision {
        self.determine_at(
            method,
            status,
            request_headers,
            response_headers,
            SystemTime::now(),
        )
    }

    /// Determines cacheability with `now` standing in for an absent or
    /// unparseable `Date` header.
    pub fn determine_at(
        &self,
        method: &Method,
        status: u16,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
        now: SystemTime,
    ) -> CacheDecision {
        if method != Method::GET {
            return CacheDecision::rejected();
        }

        let known_status = StatusCode::from_u16(status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .is_some();
        if !known_status {
            return CacheDecision::rejected();
        }

        let cc = CacheControl::from_headers(response_headers);
        if cc.no_store {
            return CacheDecision::rejected();
        }
        if self.shared && cc.private {
            return CacheDecision::rejected();
        }
        // Explicit permission through must-revalidate, public or s-maxage is
        // not honoured yet.
        if self.shared && request_headers.contains_key(header::AUTHORIZATION) {
            return CacheDecision::rejected();
        }

        let has_expires = response_headers.contains_key(header::EXPIRES);
        let eligible = has_expires
            || cc.has_max_age
            || (self.shared && cc.has_s_maxage)
            || cc.public
            || self.cacheable_by_default.contains(&status);
        if !eligible {
            return CacheDecision::rejected();
        }

        let mut decision = CacheDecision {
            cache: true,
            store: true,
            allow_stale: true,
            ..CacheDecision::default()
        };

        match self.freshness(&cc, response_headers, now) {
            Some(ttl) => decision.ttl = ttl,
            None => decision.allow_heuristic = true,
        }

        if cc.must_revalidate || (self.shared && cc.proxy_revalidate) {
            decision.allow_stale = false;
        }
        if cc.no_cache {
            decision.ttl = Duration::ZERO;
            decision.allow_stale = false;
        }
        if cc.no_store {
            decision.store = false;
        }
        if cc.public {
            decision.cache = true;
            decision.store = true;
        }
        if self.shared && cc.private {
            decision.cache = false;
            decision.store = false;
        }
        if !cc.present && pragma_no_cache(response_headers) {
            decision.cache = false;
            decision.store = false;
        }

        decision
    }

    // == Freshness Lifetime ==
    /// Explicit lifetime from directives, then from `Expires - Date`.
    fn freshness(
        &self,
        cc: &CacheControl,
        response_headers: &HeaderMap,
        now: SystemTime,
    ) -> Option<Duration> {
        if let Some(secs) = cc.freshness_secs(self.shared) {
            return Some(Duration::from_secs(secs));
        }

        let expires = response_headers.get(header::EXPIRES)?;
        let date = http_date(response_headers.get(header::DATE)).unwrap_or(now);
        // An unparseable Expires means already expired
        let ttl = http_date(Some(expires))
            .and_then(|expires| expires.duration_since(date).ok())
            .unwrap_or(Duration::ZERO);
        Some(ttl)
    }
}

impl Default for Determiner {
    fn default() -> Self {
        Self::shared()
    }
}

fn http_date(value: Option<&header::HeaderValue>) -> Option<SystemTime> {
    let value = value?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok()
}
