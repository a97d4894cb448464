//! Request-scoped context storage and the process-wide application context.
//!
//! Thousands of request coroutines interleave inside one worker. The only
//! place their mutable per-request state lives is the [`ContextStore`]: three
//! concurrent maps (request, response, route) keyed by
//! `(worker_id, coroutine_id)`. A coroutine registers its objects at the very
//! start of handling and takes a [`ScopeGuard`]; the guard's `Drop` deletes
//! all three entries, so cleanup runs on normal return, on pipeline
//! rejection, and on panic unwind alike. Nothing request-specific is ever
//! held in a global or thread-local.
//!
//! [`AppContext`] replaces the singleton accessors a server like this tends
//! to grow: it is constructed exactly once per process and handed by `Arc` to
//! every component that needs the config, the shared tables, the router, or
//! the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::ids::ConnId;
use crate::router::{Route, Router};
use crate::server::request::HttpRequest;
use crate::table::{BindTable, ReloadTable};

/// Key identifying one in-flight request within the process.
///
/// Coroutine ids come from a monotonic counter, so a key is never reused
/// while its originating coroutine is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub worker_id: usize,
    pub coroutine_id: u64,
}

impl ContextKey {
    pub fn new(worker_id: usize, coroutine_id: u64) -> Self {
        Self {
            worker_id,
            coroutine_id,
        }
    }
}

#[derive(Debug, Default)]
struct BufferInner {
    status: Option<u16>,
    buf: Vec<u8>,
}

/// Outbound response object stored in the context store.
///
/// Handlers that want to write the body themselves (instead of returning a
/// value to be serialized) append into this buffer; the dispatcher flushes it
/// when the handler returns empty or raises the early-exit fault.
#[derive(Debug, Clone, Default)]
pub struct ResponseBuffer {
    inner: Arc<Mutex<BufferInner>>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, status: u16) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.status = Some(status);
    }

    pub fn write(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.buf.extend_from_slice(bytes);
    }

    pub fn write_str(&self, text: &str) {
        self.write(text.as_bytes());
    }

    pub fn write_json(&self, value: &Value) {
        if let Ok(bytes) = serde_json::to_vec(value) {
            self.write(&bytes);
        }
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.buf.is_empty()
    }

    /// Take everything buffered so far, leaving the buffer empty.
    ///
    /// Returns the handler-set status (default 200) and the body bytes.
    pub fn flush(&self) -> (u16, Vec<u8>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let status = inner.status.unwrap_or(200);
        (status, std::mem::take(&mut inner.buf))
    }
}

/// Per-process store of in-flight request state.
#[derive(Default)]
pub struct ContextStore {
    requests: DashMap<ContextKey, Arc<HttpRequest>>,
    responses: DashMap<ContextKey, ResponseBuffer>,
    routes: DashMap<ContextKey, Route>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_request(&self, key: ContextKey, request: Arc<HttpRequest>) {
        self.requests.insert(key, request);
    }

    pub fn get_request(&self, key: ContextKey) -> Option<Arc<HttpRequest>> {
        self.requests.get(&key).map(|r| Arc::clone(r.value()))
    }

    pub fn del_request(&self, key: ContextKey) -> bool {
        self.requests.remove(&key).is_some()
    }

    pub fn set_response(&self, key: ContextKey, response: ResponseBuffer) {
        self.responses.insert(key, response);
    }

    pub fn get_response(&self, key: ContextKey) -> Option<ResponseBuffer> {
        self.responses.get(&key).map(|r| r.value().clone())
    }

    pub fn del_response(&self, key: ContextKey) -> bool {
        self.responses.remove(&key).is_some()
    }

    pub fn set_route(&self, key: ContextKey, route: Route) {
        self.routes.insert(key, route);
    }

    pub fn get_route(&self, key: ContextKey) -> Option<Route> {
        self.routes.get(&key).map(|r| r.value().clone())
    }

    pub fn del_route(&self, key: ContextKey) -> bool {
        self.routes.remove(&key).is_some()
    }

    /// Number of live request entries; used by shutdown diagnostics.
    pub fn live(&self) -> usize {
        self.requests.len()
    }

    /// Bind a cleanup guard for `key`. Dropping the guard deletes the
    /// request, response, and route entries; dropping it twice-over (or
    /// after manual deletion) is a no-op.
    pub fn begin(self: &Arc<Self>, key: ContextKey) -> ScopeGuard {
        ScopeGuard {
            key,
            store: Arc::clone(self),
        }
    }

    /// Cheap cloneable handle threaded through the handler call chain.
    pub fn scope(self: &Arc<Self>, key: ContextKey) -> RequestScope {
        RequestScope {
            key,
            store: Arc::clone(self),
        }
    }
}

/// Deferred cleanup bound at the top of request handling.
///
/// Runs on every exit path, including panic unwind.
pub struct ScopeGuard {
    key: ContextKey,
    store: Arc<ContextStore>,
}

impl ScopeGuard {
    pub fn key(&self) -> ContextKey {
        self.key
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.store.del_request(self.key);
        self.store.del_response(self.key);
        self.store.del_route(self.key);
        debug!(
            worker_id = self.key.worker_id,
            coroutine_id = self.key.coroutine_id,
            "Request context reclaimed"
        );
    }
}

/// Handle a handler uses to reach its own request-scoped state.
#[derive(Clone)]
pub struct RequestScope {
    key: ContextKey,
    store: Arc<ContextStore>,
}

impl RequestScope {
    pub fn key(&self) -> ContextKey {
        self.key
    }

    pub fn request(&self) -> Option<Arc<HttpRequest>> {
        self.store.get_request(self.key)
    }

    pub fn response(&self) -> Option<ResponseBuffer> {
        self.store.get_response(self.key)
    }

    pub fn route(&self) -> Option<Route> {
        self.store.get_route(self.key)
    }
}

/// Process-wide application context: configuration, the shared tables, the
/// routing table, and the context store.
///
/// Constructed once at startup and shared by `Arc`; components never reach
/// for hidden globals.
pub struct AppContext {
    pub config: AppConfig,
    pub router: Router,
    pub bind_table: BindTable,
    pub reload_table: ReloadTable,
    pub store: Arc<ContextStore>,
    coroutine_seq: AtomicU64,
    conn_seq: AtomicU64,
}

impl AppContext {
    pub fn new(config: AppConfig, router: Router) -> Arc<Self> {
        let bind_table = BindTable::with_capacity(config.bind_capacity());
        let reload_table = ReloadTable::with_capacity(config.reload_capacity());
        Arc::new(Self {
            config,
            router,
            bind_table,
            reload_table,
            store: Arc::new(ContextStore::new()),
            coroutine_seq: AtomicU64::new(0),
            conn_seq: AtomicU64::new(0),
        })
    }

    /// Allocate a coroutine id; never reused within the process lifetime.
    pub fn next_coroutine_id(&self) -> u64 {
        self.coroutine_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate a connection id for a newly accepted connection.
    pub fn next_conn_id(&self) -> ConnId {
        ConnId(self.conn_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
