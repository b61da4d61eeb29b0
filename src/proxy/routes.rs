//! Proxy Routes
//!
//! Every path and method falls through to the proxy handler.

use std::time::Duration;

use axum::Router;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::handler::{proxy_handler, ProxyState};

/// Creates the proxy router.
///
/// # Middleware
/// - Timeout: bounds the whole request at `read_timeout`
/// - Tracing: logs all requests
pub fn create_router(state: ProxyState, read_timeout: Duration) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(TimeoutLayer::new(read_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
