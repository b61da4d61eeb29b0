//! Mini CDN - A caching reverse proxy
//!
//! Routes requests by hostname to configured origins, caches cacheable
//! responses in memory, and serves later requests for the same object
//! without contacting the origin.

pub mod cache;
pub mod config;
pub mod error;
pub mod proxy;
pub mod store;
pub mod tasks;

pub use config::{Config, ServiceConfig};
pub use proxy::{create_router, ProxySettings, ProxyState, RoutingTable};
pub use store::{KeyedStore, MemoryStore};
pub use tasks::spawn_cleanup_task;
