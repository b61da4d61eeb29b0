//! Request Coordinator
//!
//! Drives one request through lookup, then either serves the stored entry or
//! fetches the origin, decides cacheability, and streams the body to the
//! client. Storable bodies are teed so a copy can be committed afterwards.

use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, Stream};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cache::{
    extend_key, parse_vary, tee, CachedObject, Capture, Determiner, EntryMeta,
    ObjectStore, VaryStore,
};
use crate::config::Config;
use crate::error::{EntryError, ProxyError};
use crate::proxy::hop::strip_hop_by_hop;
use crate::proxy::{RoutingTable, Service, Transaction};
use crate::store::{KeyedStore, ReadableItem};

/// Chunk size used when streaming a stored body.
const READ_CHUNK: usize = 16 * 1024;

// == Proxy Settings ==
/// Deployment choices applied on top of the determiner.
#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub shared_cache: bool,
    /// Lower bound on every storage TTL
    pub min_ttl: Duration,
    /// Replaces a heuristic zero TTL
    pub heuristic_ttl: Duration,
    /// Largest body captured for storage
    pub max_object_bytes: usize,
}

impl ProxySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            shared_cache: config.shared_cache,
            min_ttl: config.min_ttl,
            heuristic_ttl: config.heuristic_ttl,
            max_object_bytes: config.obj_max_item_bytes,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// == Proxy State ==
/// Everything a request needs, shared across all handlers.
#[derive(Clone)]
pub struct ProxyState {
    routes: Arc<RoutingTable>,
    determiner: Determiner,
    vary: VaryStore,
    objects: ObjectStore,
    settings: ProxySettings,
}

impl ProxyState {
    /// Creates the state from a routing table and the two stores.
    pub fn new(
        routes: RoutingTable,
        meta_store: Arc<dyn KeyedStore>,
        object_store: Arc<dyn KeyedStore>,
        settings: ProxySettings,
    ) -> Self {
        Self {
            routes: Arc::new(routes),
            determiner: Determiner::new(settings.shared_cache),
            vary: VaryStore::new(meta_store),
            objects: ObjectStore::new(object_store),
            settings,
        }
    }

    // == Lookup ==
    async fn handle(&self, mut txn: Transaction, req: Request) -> Response {
        let host = request_host(&req);
        let Some(service) = self.routes.resolve(&host).cloned() else {
            info!(%host, "hostname not configured");
            return txn.fail(ProxyError::UnknownHost(host));
        };

        txn.base_key = service.base_key(req.method(), req.uri());
        debug!(base_key = %String::from_utf8_lossy(&txn.base_key), "computed base key");

        let vary = match self.vary.get(&txn.base_key) {
            Ok(vary) => vary.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "vary lookup failed, using base key");
                Vec::new()
            }
        };
        txn.object_key = extend_key(&txn.base_key, req.headers(), &vary);

        match self.objects.lookup(&txn.object_key) {
            Ok(Some(item)) => return self.serve_hit(txn, item),
            Ok(None) => debug!("cache miss"),
            Err(err) => warn!(error = %err, "object lookup failed, fetching from origin"),
        }

        self.serve_miss(txn, &service, req).await
    }

    // == Hit ==
    fn serve_hit(&self, mut txn: Transaction, item: Box<dyn ReadableItem>) -> Response {
        txn.hit = true;
        match cached_response(&txn, item) {
            Ok(response) => {
                info!("served from cache");
                response
            }
            Err(err) => {
                error!(error = %err, "stored entry is unreadable");
                txn.fail(ProxyError::CorruptEntry(err))
            }
        }
    }

    // == Miss ==
    async fn serve_miss(&self, mut txn: Transaction, service: &Service, req: Request) -> Response {
        let (parts, body) = req.into_parts();

        let fetch_started = Instant::now();
        let origin = match service.client().fetch(service, &parts, body).await {
            Ok(origin) => origin,
            Err(err) => {
                warn!(error = %err, "origin fetch failed");
                return txn.fail(err);
            }
        };
        txn.origin_time = fetch_started.elapsed();

        let status = origin.status();
        let origin_headers = origin.headers().clone();
        let decision = self.determiner.determine(
            &parts.method,
            status.as_u16(),
            &parts.headers,
            &origin_headers,
        );
        let ttl = decision.effective_ttl(self.settings.heuristic_ttl, self.settings.min_ttl);
        debug!(?decision, ?ttl, status = status.as_u16(), "cacheability determined");

        let vary = parse_vary(&origin_headers);
        if let Err(err) = self.vary.put(&txn.base_key, &vary) {
            warn!(error = %err, "failed to record vary headers");
        }
        txn.object_key = extend_key(&txn.base_key, &parts.headers, &vary);

        let mut headers = origin_headers.clone();
        strip_hop_by_hop(&mut headers);
        txn.stamp(&mut headers);

        let body = if decision.cache && decision.store {
            let (body, capture) = tee(origin.bytes_stream(), self.settings.max_object_bytes);
            let pending = PendingStore {
                objects: self.objects.clone(),
                key: txn.object_key.clone(),
                meta: EntryMeta::new(status, &origin_headers, Utc::now()),
                ttl,
            };
            tokio::spawn(
                async move {
                    let captured = capture.wait().await;
                    pending.finish(captured);
                }
                .in_current_span(),
            );
            Body::from_stream(body)
        } else {
            debug!("response not storable, streaming without capture");
            Body::from_stream(origin.bytes_stream())
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        info!(status = status.as_u16(), origin_time = ?txn.origin_time, "served from origin");
        response
    }
}

// == Store-Side Completion ==
/// What the storage side needs once the tee finishes.
struct PendingStore {
    objects: ObjectStore,
    key: Vec<u8>,
    meta: EntryMeta,
    ttl: Duration,
}

impl PendingStore {
    fn finish(self, captured: Capture) {
        if let Some(err) = captured.error {
            warn!(error = %err, "origin body not captured in full, not caching");
            return;
        }

        match self.objects.put(&self.key, &self.meta, &captured.body, self.ttl) {
            Ok(bytes) => info!(bytes, ttl = ?self.ttl, "stored in cache"),
            Err(err) => warn!(error = %err, "failed to store in cache"),
        }
    }
}

// == Handler ==
/// Fallback handler for every request.
pub async fn proxy_handler(State(state): State<ProxyState>, req: Request) -> Response {
    let txn = Transaction::begin();
    let span = info_span!(
        "request",
        request_id = %txn.request_id,
        method = %req.method(),
        uri = %req.uri(),
    );
    state.handle(txn, req).instrument(span).await
}

/// Host header, falling back to the URI authority.
fn request_host(req: &Request) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or_default()
        .to_string()
}

/// Builds the response for a stored entry.
fn cached_response(
    txn: &Transaction,
    item: Box<dyn ReadableItem>,
) -> Result<Response, EntryError> {
    let object = CachedObject::open(item)?;
    let status = object.meta.status()?;
    let mut headers: HeaderMap = object.meta.header_map()?;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::DATE);

    let age = object.meta.age(Utc::now()).as_secs();
    headers.insert(header::AGE, HeaderValue::from(age));
    txn.stamp(&mut headers);

    let mut response = Response::new(Body::from_stream(read_chunks(object.body)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Streams the unread remainder of a stored item.
fn read_chunks(
    item: Box<dyn ReadableItem>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    stream::unfold(Some(item), |item| async move {
        let mut item = item?;
        let mut buf = vec![0u8; READ_CHUNK];
        match item.read(&mut buf) {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(item)))
            }
            Err(err) => Some((Err(err), None)),
        }
    })
}
