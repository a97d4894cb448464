//! # Banyan
//!
//! **Banyan** is an event-driven application-server runtime built on the
//! [`may`] coroutine runtime and `may_minihttp`: a fixed pool of request
//! workers and task workers, a two-stage request pipeline (validation, then
//! handler), and deterministic reclamation of per-request state on every
//! exit path.
//!
//! ## Architecture
//!
//! - **[`table`]** - fixed-capacity shared tables: the connection binding
//!   table and the hot-reload tracking table
//! - **[`context`]** - request-context store keyed by
//!   `(worker_id, coroutine_id)`, with guaranteed scoped cleanup, plus the
//!   process-wide [`context::AppContext`]
//! - **[`router`]** - startup-built URI registration table
//! - **[`dispatcher`]** - the validation → handler pipeline
//! - **[`lifecycle`]** - worker/task-worker pools, lifecycle hooks, graceful
//!   reload and shutdown
//! - **[`task`]** - task offload bridge between request coroutines and task
//!   workers
//! - **[`hot_reload`]** - interval scan of tracked files against the reload
//!   table
//! - **[`server`]** - the HTTP edge: parsing, response writing, the
//!   connection-scoped service
//! - **[`cors`]**, **[`static_files`]** - pre-dispatch concerns
//!
//! ## Request flow
//!
//! A connection's first request assigns it a connection id, registers it in
//! the binding table, and fires the `open` hook. Each request is parsed at
//! the edge, queued to its connection's worker, and handled in a fresh
//! coroutine: the coroutine registers its request/response objects in the
//! context store under its own `(worker, coroutine)` key, binds the cleanup
//! guard, resolves the route, merges the input sources (left-biased), runs
//! the form stage, then the controller. The guard reclaims the context
//! entries no matter how any of that ends.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use banyan::config::AppConfig;
//! use banyan::context::AppContext;
//! use banyan::dispatcher::Dispatcher;
//! use banyan::lifecycle::{NoopHooks, ServerRuntime};
//! use banyan::router::Router;
//! use banyan::server::{AppService, HttpServer};
//!
//! let mut router = Router::new();
//! router.route("/demo/hello", "demo", "hello");
//! let dispatcher = Dispatcher::new();
//! // dispatcher.register_controller("demo", ...);
//!
//! let ctx = AppContext::new(AppConfig::default(), router);
//! let runtime = ServerRuntime::new(Arc::clone(&ctx), dispatcher, Arc::new(NoopHooks));
//! runtime.start().unwrap();
//! let handle = HttpServer(AppService::new(runtime)).start("0.0.0.0:9501").unwrap();
//! handle.join().unwrap();
//! ```
//!
//! ## Runtime considerations
//!
//! Banyan runs on `may`, not tokio: handlers execute in coroutines,
//! suspension happens only at I/O boundaries, and CPU-bound work on the
//! request path starves the worker; offload it through
//! [`task::TaskBridge`] instead. Coroutine stack size is configurable via
//! the `BANYAN_STACK_SIZE` environment variable.

pub mod cli;
pub mod config;
pub mod context;
pub mod cors;
pub mod dispatcher;
pub mod fault;
pub mod hot_reload;
pub mod ids;
pub mod lifecycle;
pub mod router;
pub mod server;
pub mod static_files;
pub mod table;
pub mod task;

mod demo;

pub use config::AppConfig;
pub use context::{AppContext, ContextKey, ContextStore, RequestScope, ResponseBuffer};
pub use dispatcher::{Controller, DispatchReply, Dispatcher, FormValidator};
pub use fault::Fault;
pub use ids::{ConnId, RequestId};
pub use lifecycle::{AppHooks, NoopHooks, PoolSet, ServerRuntime, WorkerIdentity};
pub use router::{Route, Router};
pub use table::{BindEntry, BindTable, ReloadEntry, ReloadTable, TableError};
pub use task::{TaskBridge, TaskUnit};
