//! Proxy Module
//!
//! Host routing, origin fetching and the per-request coordinator.

mod handler;
mod hop;
mod origin;
mod routes;
mod service;
mod transaction;

pub use handler::{proxy_handler, ProxySettings, ProxyState};
pub use hop::{is_hop_by_hop, strip_hop_by_hop};
pub use origin::OriginClient;
pub use routes::create_router;
pub use service::{RoutingTable, Service};
pub use transaction::{
    Transaction, CACHE_STATUS_HEADER, PROCESSING_TIME_HEADER, REQUEST_ID_HEADER,
};
