//! Mini CDN - A caching reverse proxy
//!
//! Binary entry point: loads configuration, builds the stores and routing
//! table, and serves until SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mini_cdn::{
    create_router, spawn_cleanup_task, Config, MemoryStore, ProxySettings, ProxyState,
    RoutingTable,
};

/// Main entry point for the caching proxy.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the Vary and object stores
/// 4. Build the routing table and origin clients
/// 5. Start background expiry sweep
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mini_cdn=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Mini CDN caching proxy");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        port = config.server_port,
        shared_cache = config.shared_cache,
        min_ttl = ?config.min_ttl,
        heuristic_ttl = ?config.heuristic_ttl,
        services = config.services.len(),
        "Configuration loaded"
    );

    let meta_store = Arc::new(MemoryStore::new(
        config.meta_max_entries,
        config.obj_max_item_bytes,
    ));
    let object_store = Arc::new(MemoryStore::new(
        config.obj_max_entries,
        config.obj_max_item_bytes,
    ));

    let routes = RoutingTable::from_configs(&config.services, config.origin_header_timeout)
        .context("invalid service table")?;
    info!(hostnames = routes.len(), "Routing table built");

    let cleanup_handle = spawn_cleanup_task(
        vec![meta_store.clone(), object_store.clone()],
        config.cleanup_interval,
    );

    let state = ProxyState::new(
        routes,
        meta_store,
        object_store,
        ProxySettings::from_config(&config),
    );
    let app = create_router(state, config.read_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the sweep task and allows graceful shutdown.
async fn shutdown_signal(cleanup_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cleanup_handle.abort();
    warn!("Expiry sweep task aborted");
}
