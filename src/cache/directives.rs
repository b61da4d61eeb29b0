//! Cache-Control Directive Module
//!
//! Turns raw `Cache-Control` and `Pragma` header values into the flags and
//! numbers the determiner works from. Detection is substring based, so a
//! stricter grammar can replace [`CacheControl::parse`] without touching the
//! decision rules.

use axum::http::{header, HeaderMap};

// == Cache Control ==
/// Directives found in a response's `Cache-Control` header lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// At least one `Cache-Control` line was present
    pub present: bool,
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    /// `max-age` appears, whether or not its value parses
    pub has_max_age: bool,
    /// `s-maxage` appears, whether or not its value parses
    pub has_s_maxage: bool,
    /// Parsed `max-age` seconds
    pub max_age: Option<u64>,
    /// Parsed `s-maxage` seconds
    pub s_maxage: Option<u64>,
}

impl CacheControl {
    /// Reads every `Cache-Control` line of `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::parse(
            headers
                .get_all(header::CACHE_CONTROL)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        )
    }

    /// Parses raw header lines.
    pub fn parse<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut cc = Self::default();

        for line in lines {
            cc.present = true;
            cc.no_store |= line.contains("no-store");
            cc.no_cache |= line.contains("no-cache");
            cc.private |= line.contains("private");
            cc.public |= line.contains("public");
            cc.must_revalidate |= line.contains("must-revalidate");
            cc.proxy_revalidate |= line.contains("proxy-revalidate");
            cc.has_max_age |= line.contains("max-age");
            cc.has_s_maxage |= line.contains("s-maxage");

            if cc.max_age.is_none() {
                cc.max_age = numeric_directive(line, "max-age");
            }
            if cc.s_maxage.is_none() {
                cc.s_maxage = numeric_directive(line, "s-maxage");
            }
        }

        cc
    }

    // == Freshness ==
    /// Explicit freshness lifetime in seconds: `s-maxage` when shared and
    /// valid, then `max-age` when valid.
    pub fn freshness_secs(&self, shared: bool) -> Option<u64> {
        let s_maxage = if shared { self.s_maxage } else { None };
        s_maxage.or(self.max_age)
    }
}

/// Extracts `name=value` from the first comma-separated segment of `line`
/// that mentions `name`. Any other shape yields `None`.
fn numeric_directive(line: &str, name: &str) -> Option<u64> {
    let segment = line.split(',').find(|segment| segment.contains(name))?;
    let mut parts = segment.split('=');
    let _name = parts.next()?;
    let value = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    value.trim().parse().ok()
}

// == Pragma ==
/// True when any `Pragma` line contains `no-cache`.
pub fn pragma_no_cache(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::PRAGMA)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("no-cache"))
}
