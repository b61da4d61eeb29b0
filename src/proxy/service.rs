//! Service Module
//!
//! Services describe an origin and the hostnames it answers for. The routing
//! table maps a request's Host to its service and is read-only once built.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, Uri};
use tracing::info;

use crate::cache::{DefaultKey, KeyStrategy, QueryIgnoringKey};
use crate::config::{KeyMode, ServiceConfig};
use crate::error::ConfigError;
use crate::proxy::OriginClient;

// == Service ==
/// An origin served under one or more hostnames. Immutable after startup.
#[derive(Debug)]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Address to connect to
    pub origin: String,
    /// Host header sent upstream
    pub origin_host: String,
    pub origin_tls: bool,
    pub hostnames: Vec<String>,
    key_strategy: Arc<dyn KeyStrategy>,
    client: OriginClient,
}

impl Service {
    /// Builds a service and its origin client from configuration.
    pub fn from_config(
        config: &ServiceConfig,
        header_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let key_strategy: Arc<dyn KeyStrategy> = match config.key {
            Some(KeyMode::Default) => Arc::new(DefaultKey),
            Some(KeyMode::IgnoreQuery) => Arc::new(QueryIgnoringKey),
            None => {
                info!(service = %config.id, "no key strategy configured, using default");
                Arc::new(DefaultKey)
            }
        };

        Ok(Self {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            origin: config.origin.clone(),
            origin_host: config
                .origin_host
                .clone()
                .unwrap_or_else(|| config.origin.clone()),
            origin_tls: config.origin_tls,
            hostnames: config.hostnames.clone(),
            key_strategy,
            client: OriginClient::new(header_timeout)?,
        })
    }

    /// Replaces the key strategy.
    pub fn with_key_strategy(mut self, key_strategy: Arc<dyn KeyStrategy>) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    /// Base cache key for a request to this service.
    pub fn base_key(&self, method: &Method, uri: &Uri) -> Vec<u8> {
        self.key_strategy.base_key(method, &self.id, uri)
    }

    /// Absolute origin URL for a client request target.
    pub fn origin_url(&self, uri: &Uri) -> String {
        let scheme = if self.origin_tls { "https" } else { "http" };
        let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{scheme}://{}{target}", self.origin)
    }

    pub fn client(&self) -> &OriginClient {
        &self.client
    }
}

// == Routing Table ==
/// Exact Host header to service mapping.
#[derive(Debug, Default)]
pub struct RoutingTable {
    by_host: HashMap<String, Arc<Service>>,
}

impl RoutingTable {
    /// Indexes `services` by each of their hostnames.
    pub fn new(services: Vec<Service>) -> Result<Self, ConfigError> {
        let mut by_host: HashMap<String, Arc<Service>> = HashMap::new();
        for service in services {
            let service = Arc::new(service);
            for host in &service.hostnames {
                if let Some(existing) = by_host.insert(host.clone(), service.clone()) {
                    return Err(ConfigError::DuplicateHost {
                        host: host.clone(),
                        first: existing.id.clone(),
                        second: service.id.clone(),
                    });
                }
            }
        }
        Ok(Self { by_host })
    }

    /// Builds every configured service.
    pub fn from_configs(
        configs: &[ServiceConfig],
        header_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let services = configs
            .iter()
            .map(|config| Service::from_config(config, header_timeout))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(services)
    }

    pub fn resolve(&self, host: &str) -> Option<&Arc<Service>> {
        self.by_host.get(host)
    }

    /// Number of routed hostnames.
    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}
