//! Worker and task-worker lifecycle management.
//!
//! The [`ServerRuntime`] pre-spawns a fixed pool of request workers and a
//! fixed pool of task workers, each a `may` coroutine owning its own job
//! channel. Requests are connection-sticky: the protocol edge picks the
//! worker as `conn_id % worker_num`, so one connection's requests always
//! land on the same worker. Inside a worker, every job spawns a request
//! coroutine tagged `(worker_id, coroutine_id)`, the key under which all of
//! that request's state lives until its scope guard reclaims it.
//!
//! Each worker walks the same state machine:
//!
//! ```text
//! Start -> Running -> (Stop | Error) -> Exit
//! ```
//!
//! On `Start` the application start hook is invoked from its own coroutine;
//! a `false` or panicking hook shuts the whole server down, since a
//! half-initialized worker must never serve traffic. Request worker 0
//! additionally warms the configured connection pools (a failure there is a
//! startup fault and also shuts the server down), prints the startup banner,
//! and arms the hot-reload ticker. `Exit` cancels that ticker and invokes
//! the application exit hook.
//!
//! Hot reload swaps in a complete replacement worker generation before the
//! old one is retired: old workers see their channels close, drain what they
//! already accepted, and walk Stop → Exit while in-flight request coroutines
//! finish undisturbed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use may::sync::mpsc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config;
use crate::context::{AppContext, ContextKey};
use crate::dispatcher::{DispatchReply, Dispatcher};
use crate::hot_reload::{ReloadTicker, ReloadWatcher};
use crate::ids::ConnId;
use crate::server::request::HttpRequest;
use crate::task::{TaskBridge, TaskEnvelope, TaskUnit};

/// Width of the startup banner.
const ECHO_WIDTH: usize = 75;

/// Lifecycle states a worker moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Start,
    Running,
    Stop,
    Error,
    Exit,
}

/// Identity of one worker in the runtime.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    pub id: usize,
    pub task_worker: bool,
}

impl WorkerIdentity {
    fn kind(&self) -> &'static str {
        if self.task_worker {
            "task"
        } else {
            "worker"
        }
    }
}

/// Application-level lifecycle hooks.
///
/// The runtime invokes these at the corresponding lifecycle points. `start`
/// returns a success flag; everything else is a notification.
pub trait AppHooks: Send + Sync {
    /// Invoked once per worker as it starts; `false` aborts the server.
    fn start(&self, worker: &WorkerIdentity) -> bool {
        let _ = worker;
        true
    }

    /// Invoked when a worker stops receiving jobs.
    fn stop(&self, worker: &WorkerIdentity) {
        let _ = worker;
    }

    /// Invoked as a worker exits, after its reload ticker (if any) is
    /// cancelled.
    fn exit(&self, worker: &WorkerIdentity) {
        let _ = worker;
    }

    /// A connection was opened.
    fn open(&self, conn: ConnId) {
        let _ = conn;
    }

    /// A connection closed.
    fn close(&self, conn: ConnId) {
        let _ = conn;
    }

    /// An out-of-band frame arrived for a bound connection.
    fn message(&self, conn: ConnId, frame: &[u8]) {
        let _ = (conn, frame);
    }

    /// Execute an offloaded task unit on a task worker.
    fn task(&self, unit: &TaskUnit) -> Option<Value> {
        let _ = unit;
        None
    }
}

/// Hooks implementation that does nothing.
pub struct NoopHooks;

impl AppHooks for NoopHooks {}

/// Worker-local connection pools, opened once by request worker 0.
pub trait PoolSet: Send + Sync {
    fn open(&self, name: &str) -> anyhow::Result<()>;
}

/// One unit of request work queued to a worker.
pub struct RequestJob {
    pub request: Arc<HttpRequest>,
    pub reply_tx: mpsc::Sender<DispatchReply>,
}

/// Process manager for the worker and task-worker pools.
pub struct ServerRuntime {
    ctx: Arc<AppContext>,
    dispatcher: Arc<Dispatcher>,
    hooks: Arc<dyn AppHooks>,
    pools: Option<Arc<dyn PoolSet>>,
    request_workers: ArcSwap<Vec<mpsc::Sender<RequestJob>>>,
    task_bridge: Arc<TaskBridge>,
    generation: AtomicU64,
    shutting_down: AtomicBool,
    stack_size: usize,
}

impl ServerRuntime {
    pub fn new(
        ctx: Arc<AppContext>,
        dispatcher: Dispatcher,
        hooks: Arc<dyn AppHooks>,
    ) -> Arc<Self> {
        Self::with_pools(ctx, dispatcher, hooks, None)
    }

    pub fn with_pools(
        ctx: Arc<AppContext>,
        dispatcher: Dispatcher,
        hooks: Arc<dyn AppHooks>,
        pools: Option<Arc<dyn PoolSet>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            dispatcher: Arc::new(dispatcher),
            hooks,
            pools,
            request_workers: ArcSwap::from_pointee(Vec::new()),
            task_bridge: Arc::new(TaskBridge::new()),
            generation: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            stack_size: config::stack_size(),
        })
    }

    pub fn ctx(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn hooks(&self) -> &Arc<dyn AppHooks> {
        &self.hooks
    }

    pub fn task_bridge(&self) -> &Arc<TaskBridge> {
        &self.task_bridge
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Spawn the initial worker generation.
    ///
    /// # Errors
    ///
    /// Fails when the pid file is configured but cannot be written.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        if let Some(pid_file) = &self.ctx.config.server.pid_file {
            std::fs::write(pid_file, std::process::id().to_string())?;
            info!(pid_file = %pid_file.display(), "Pid file written");
        }
        info!(
            worker_num = self.ctx.config.server.worker_num,
            task_num = self.ctx.config.task_num(),
            "Starting worker pools"
        );
        self.spawn_generation(0);
        Ok(())
    }

    /// Spawn a replacement worker generation, then let the previous one
    /// retire by closing its channels. In-flight requests on old workers
    /// complete undisturbed.
    pub fn reload(self: &Arc<Self>) {
        if self.is_shutting_down() {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation, "Hot reload: spawning replacement workers");
        self.spawn_generation(generation);
    }

    /// Retire every worker. Queued jobs drain; new submissions are refused.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            live_requests = self.ctx.store.live(),
            "Server shutdown: retiring all workers"
        );
        self.request_workers.store(Arc::new(Vec::new()));
        self.task_bridge.replace_workers(Vec::new());
    }

    /// Queue a request on its connection's worker and wait for the reply.
    pub fn submit(&self, request: Arc<HttpRequest>) -> DispatchReply {
        // load_full: the reply wait below can outlive any sane guard window.
        let senders = self.request_workers.load_full();
        if senders.is_empty() {
            warn!(conn = %request.conn, "No workers available");
            return DispatchReply::error(500, "no workers available");
        }
        let idx = (request.conn.0 as usize) % senders.len();
        let (reply_tx, reply_rx) = mpsc::channel();
        let request_id = request.id;
        let job = RequestJob { request, reply_tx };
        if senders[idx].send(job).is_err() {
            error!(request_id = %request_id, worker_id = idx, "Worker channel closed");
            return DispatchReply::error(500, "worker unavailable");
        }
        match reply_rx.recv() {
            Ok(reply) => reply,
            Err(_) => {
                error!(request_id = %request_id, worker_id = idx, "Request coroutine dropped without replying");
                DispatchReply::error(500, "request coroutine failed")
            }
        }
    }

    fn spawn_generation(self: &Arc<Self>, generation: u64) {
        let worker_num = self.ctx.config.server.worker_num;
        let mut request_senders = Vec::with_capacity(worker_num);
        for id in 0..worker_num {
            let (tx, rx) = mpsc::channel();
            request_senders.push(tx);
            let rt = Arc::clone(self);
            let identity = WorkerIdentity {
                id,
                task_worker: false,
            };
            if let Err(err) = spawn_coroutine(self.stack_size, move || {
                run_request_worker(rt, identity, generation, rx);
            }) {
                error!(worker_id = id, error = %err, "Failed to spawn request worker");
            }
        }

        let task_num = self.ctx.config.task_num();
        let mut task_senders = Vec::with_capacity(task_num);
        for id in 0..task_num {
            let (tx, rx) = mpsc::channel();
            task_senders.push(tx);
            let rt = Arc::clone(self);
            let identity = WorkerIdentity {
                id,
                task_worker: true,
            };
            if let Err(err) = spawn_coroutine(self.stack_size, move || {
                run_task_worker(rt, identity, generation, rx);
            }) {
                error!(worker_id = id, error = %err, "Failed to spawn task worker");
            }
        }

        // New generation goes live before the old one's channels close.
        self.request_workers.store(Arc::new(request_senders));
        self.task_bridge.replace_workers(task_senders);
    }

    fn warmup(&self) -> anyhow::Result<()> {
        if let Some(pools) = &self.pools {
            for name in &self.ctx.config.pool.default_init_list {
                pools.open(name)?;
                info!(pool = %name, "Connection pool opened");
            }
        }
        Ok(())
    }
}

fn spawn_coroutine<F>(stack_size: usize, f: F) -> std::io::Result<may::coroutine::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may
    // runtime. The closure is Send + 'static and owns all its state, and
    // spawning only happens after the runtime is configured.
    unsafe {
        may::coroutine::Builder::new()
            .stack_size(stack_size)
            .spawn(f)
    }
}

/// Invoke the application start hook from its own coroutine; a failed hook
/// shuts the server down.
fn spawn_start_hook(rt: &Arc<ServerRuntime>, identity: &WorkerIdentity) {
    let hooks = Arc::clone(&rt.hooks);
    let rt = Arc::clone(rt);
    let identity = identity.clone();
    let spawned = spawn_coroutine(rt.stack_size, move || {
        match catch_unwind(AssertUnwindSafe(|| hooks.start(&identity))) {
            Ok(true) => {
                info!(
                    kind = identity.kind(),
                    worker_id = identity.id,
                    "start success"
                );
            }
            Ok(false) => {
                error!(
                    kind = identity.kind(),
                    worker_id = identity.id,
                    "start fail; shutting down"
                );
                rt.shutdown();
            }
            Err(_) => {
                error!(
                    kind = identity.kind(),
                    worker_id = identity.id,
                    "start hook panicked; shutting down"
                );
                rt.shutdown();
            }
        }
    });
    if let Err(err) = spawned {
        error!(error = %err, "Failed to spawn start hook coroutine");
    }
}

fn run_request_worker(
    rt: Arc<ServerRuntime>,
    identity: WorkerIdentity,
    generation: u64,
    rx: mpsc::Receiver<RequestJob>,
) {
    info!(
        kind = identity.kind(),
        worker_id = identity.id,
        generation,
        state = ?WorkerState::Start,
        "Worker starting"
    );

    // Worker 0 duties: pool warmup, banner, reload ticker.
    let mut reload_ticker: Option<ReloadTicker> = None;
    if identity.id == 0 {
        let warm = catch_unwind(AssertUnwindSafe(|| rt.warmup()));
        let failed = match warm {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("pool warmup panicked".to_string()),
        };
        if let Some(cause) = failed {
            // A corrupted worker is never left partially running.
            error!(
                worker_id = identity.id,
                error = %cause,
                state = ?WorkerState::Error,
                "Startup fault; stopping worker and shutting down the server"
            );
            rt.shutdown();
            rt.hooks.exit(&identity);
            info!(worker_id = identity.id, state = ?WorkerState::Exit, "Worker exit");
            return;
        }
        print_banner(&rt.ctx);
        if rt.ctx.config.app.auto_reload && !rt.ctx.config.app.watch_paths.is_empty() {
            let watcher = ReloadWatcher::new(Arc::clone(&rt.ctx));
            watcher.prime();
            let reload_rt = Arc::clone(&rt);
            reload_ticker = Some(watcher.spawn(move || reload_rt.reload()));
        }
    }

    spawn_start_hook(&rt, &identity);

    debug!(worker_id = identity.id, state = ?WorkerState::Running, "Worker running");
    let loop_result = catch_unwind(AssertUnwindSafe(|| {
        for job in rx.iter() {
            let coroutine_id = rt.ctx.next_coroutine_id();
            let key = ContextKey::new(identity.id, coroutine_id);
            let ctx = Arc::clone(&rt.ctx);
            let dispatcher = Arc::clone(&rt.dispatcher);
            let spawned = spawn_coroutine(rt.stack_size, move || {
                let RequestJob { request, reply_tx } = job;
                let reply = dispatcher.execute(&ctx, key, request);
                // The connection coroutine may have given up; nothing to do.
                let _ = reply_tx.send(reply);
            });
            if let Err(err) = spawned {
                // The closure (and with it the reply sender) is dropped; the
                // connection side observes the closed channel.
                error!(
                    worker_id = identity.id,
                    coroutine_id,
                    error = %err,
                    "Failed to spawn request coroutine"
                );
            }
        }
    }));

    match loop_result {
        Ok(()) => {
            info!(
                kind = identity.kind(),
                worker_id = identity.id,
                generation,
                state = ?WorkerState::Stop,
                "Worker stopping"
            );
            rt.hooks.stop(&identity);
        }
        Err(_) => {
            // Siblings keep running; supervision is the host's concern.
            error!(
                kind = identity.kind(),
                worker_id = identity.id,
                generation,
                state = ?WorkerState::Error,
                "Worker loop panicked"
            );
        }
    }

    if let Some(ticker) = reload_ticker {
        ticker.cancel();
    }
    rt.hooks.exit(&identity);
    info!(
        kind = identity.kind(),
        worker_id = identity.id,
        generation,
        state = ?WorkerState::Exit,
        "Worker exit"
    );
}

fn run_task_worker(
    rt: Arc<ServerRuntime>,
    identity: WorkerIdentity,
    generation: u64,
    rx: mpsc::Receiver<TaskEnvelope>,
) {
    info!(
        kind = identity.kind(),
        worker_id = identity.id,
        generation,
        state = ?WorkerState::Start,
        "Worker starting"
    );
    spawn_start_hook(&rt, &identity);

    debug!(worker_id = identity.id, state = ?WorkerState::Running, "Worker running");
    let loop_result = catch_unwind(AssertUnwindSafe(|| {
        for envelope in rx.iter() {
            let TaskEnvelope { unit, reply_tx } = envelope;
            debug!(
                task_id = unit.id,
                kind = %unit.kind,
                worker_id = identity.id,
                "Task received"
            );
            match catch_unwind(AssertUnwindSafe(|| rt.hooks.task(&unit))) {
                Ok(result) => {
                    if let Some(tx) = reply_tx {
                        let _ = tx.send(result);
                    }
                }
                Err(_) => {
                    // Dropping the reply sender signals the waiter.
                    error!(
                        task_id = unit.id,
                        kind = %unit.kind,
                        worker_id = identity.id,
                        "Task hook panicked - CRITICAL"
                    );
                }
            }
        }
    }));

    match loop_result {
        Ok(()) => {
            info!(
                kind = identity.kind(),
                worker_id = identity.id,
                generation,
                state = ?WorkerState::Stop,
                "Worker stopping"
            );
            rt.hooks.stop(&identity);
        }
        Err(_) => {
            error!(
                kind = identity.kind(),
                worker_id = identity.id,
                generation,
                state = ?WorkerState::Error,
                "Worker loop panicked"
            );
        }
    }

    rt.hooks.exit(&identity);
    info!(
        kind = identity.kind(),
        worker_id = identity.id,
        generation,
        state = ?WorkerState::Exit,
        "Worker exit"
    );
}

fn print_banner(ctx: &AppContext) {
    let line = "#".repeat(ECHO_WIDTH);
    let inner = ECHO_WIDTH - 2;
    println!("{line}");
    for text in [
        "banyan server".to_string(),
        format!("listening on {}", ctx.config.server.addr),
        format!(
            "workers: {}    task workers: {}",
            ctx.config.server.worker_num,
            ctx.config.task_num()
        ),
    ] {
        println!("|{text:^inner$}|");
    }
    println!("{line}");
}
