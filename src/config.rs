//! Configuration Module
//!
//! Handles loading and managing proxy configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

// == Service Config ==
/// How a service derives its base cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Method, service id, path and query
    Default,
    /// Method, service id and path only
    IgnoreQuery,
}

/// One origin and the hostnames it is served under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    /// Unique id, part of every cache key
    pub id: String,
    /// Descriptive name
    #[serde(default)]
    pub name: Option<String>,
    /// Address (host[:port]) to connect to
    pub origin: String,
    /// Host header sent upstream, defaults to `origin`
    #[serde(default)]
    pub origin_host: Option<String>,
    /// Connect to the origin over https
    #[serde(default)]
    pub origin_tls: bool,
    /// Hostnames this service answers for
    pub hostnames: Vec<String>,
    /// Base key derivation, defaults to [`KeyMode::Default`]
    #[serde(default)]
    pub key: Option<KeyMode>,
}

impl ServiceConfig {
    /// A plain-http service with default keying.
    pub fn new(id: impl Into<String>, origin: impl Into<String>, hostnames: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: None,
            origin: origin.into(),
            origin_host: None,
            origin_tls: false,
            hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
            key: None,
        }
    }
}

// == Config ==
/// Proxy configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Overall time allowed to serve one request
    pub read_timeout: Duration,
    /// Time allowed for the origin to send response headers
    pub origin_header_timeout: Duration,
    /// Apply shared-cache rules
    pub shared_cache: bool,
    /// Lower bound on every storage TTL
    pub min_ttl: Duration,
    /// TTL used when a response carries no explicit lifetime
    pub heuristic_ttl: Duration,
    /// Maximum number of Vary records
    pub meta_max_entries: usize,
    /// Maximum number of cached objects
    pub obj_max_entries: usize,
    /// Largest cached object in bytes
    pub obj_max_item_bytes: usize,
    /// Interval between expired-item sweeps
    pub cleanup_interval: Duration,
    /// Routing table source
    pub services: Vec<ServiceConfig>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 8066)
    /// - `READ_TIMEOUT` - Seconds per request (default: 300)
    /// - `ORIGIN_HEADER_TIMEOUT` - Seconds to wait for origin headers (default: 60)
    /// - `SHARED_CACHE` - Shared cache rules (default: true)
    /// - `MIN_TTL` - Minimum storage TTL in seconds (default: 60)
    /// - `HEURISTIC_TTL` - Heuristic TTL in seconds (default: 86400)
    /// - `META_MAX_ENTRIES` - Vary record capacity (default: 500000)
    /// - `OBJ_MAX_ENTRIES` - Object capacity (default: 500000)
    /// - `OBJ_MAX_ITEM_BYTES` - Largest object (default: 64 MiB)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 30)
    /// - `PROXY_SERVICES` - JSON array of services (default: one demo service)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let services = match env::var("PROXY_SERVICES") {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => defaults.services,
        };

        Ok(Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            read_timeout: secs_var("READ_TIMEOUT").unwrap_or(defaults.read_timeout),
            origin_header_timeout: secs_var("ORIGIN_HEADER_TIMEOUT")
                .unwrap_or(defaults.origin_header_timeout),
            shared_cache: parse_var("SHARED_CACHE").unwrap_or(defaults.shared_cache),
            min_ttl: secs_var("MIN_TTL").unwrap_or(defaults.min_ttl),
            heuristic_ttl: secs_var("HEURISTIC_TTL").unwrap_or(defaults.heuristic_ttl),
            meta_max_entries: parse_var("META_MAX_ENTRIES").unwrap_or(defaults.meta_max_entries),
            obj_max_entries: parse_var("OBJ_MAX_ENTRIES").unwrap_or(defaults.obj_max_entries),
            obj_max_item_bytes: parse_var("OBJ_MAX_ITEM_BYTES")
                .unwrap_or(defaults.obj_max_item_bytes),
            cleanup_interval: secs_var("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            services,
        })
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn secs_var(name: &str) -> Option<Duration> {
    parse_var(name).map(Duration::from_secs)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 8066,
            read_timeout: Duration::from_secs(300),
            origin_header_timeout: Duration::from_secs(60),
            shared_cache: true,
            min_ttl: Duration::from_secs(60),
            heuristic_ttl: Duration::from_secs(24 * 60 * 60),
            meta_max_entries: 500_000,
            obj_max_entries: 500_000,
            obj_max_item_bytes: 64 * 1024 * 1024,
            cleanup_interval: Duration::from_secs(30),
            services: vec![ServiceConfig {
                name: Some("demo".to_string()),
                origin_host: Some("www.example.com".to_string()),
                ..ServiceConfig::new("demo", "www.example.com", &["localhost:8066"])
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 8066);
        assert_eq!(config.min_ttl, Duration::from_secs(60));
        assert_eq!(config.heuristic_ttl, Duration::from_secs(86_400));
        assert!(config.shared_cache);
        assert_eq!(config.services.len(), 1);
    }

    #[test]
    fn test_service_json_defaults() {
        let raw = r#"[{"id":"foo","origin":"www.cdnplanet.com","hostnames":["cdn.cdnplanet.com"]}]"#;
        let services: Vec<ServiceConfig> = serde_json::from_str(raw).unwrap();

        assert_eq!(
            services,
            vec![ServiceConfig::new("foo", "www.cdnplanet.com", &["cdn.cdnplanet.com"])]
        );
    }

    #[test]
    fn test_service_json_full() {
        let raw = r#"[{
            "id": "foo",
            "name": "bar",
            "origin": "10.0.0.1:8443",
            "origin_host": "www.cdnplanet.com",
            "origin_tls": true,
            "hostnames": ["a.test", "b.test"],
            "key": "ignore_query"
        }]"#;
        let services: Vec<ServiceConfig> = serde_json::from_str(raw).unwrap();

        let service = &services[0];
        assert_eq!(service.name.as_deref(), Some("bar"));
        assert_eq!(service.origin_host.as_deref(), Some("www.cdnplanet.com"));
        assert!(service.origin_tls);
        assert_eq!(service.key, Some(KeyMode::IgnoreQuery));
        assert_eq!(service.hostnames.len(), 2);
    }

    #[test]
    fn test_service_json_rejects_missing_origin() {
        let raw = r#"[{"id":"foo","hostnames":[]}]"#;
        assert!(serde_json::from_str::<Vec<ServiceConfig>>(raw).is_err());
    }
}
