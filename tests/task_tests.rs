//! Task offload bridge tests: correlated results, fire-and-forget, panic
//! isolation, and push-target resolution through the binding table.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use banyan::config::AppConfig;
use banyan::context::AppContext;
use banyan::dispatcher::Dispatcher;
use banyan::ids::ConnId;
use banyan::lifecycle::{AppHooks, ServerRuntime};
use banyan::router::Router;
use banyan::task::TaskUnit;

mod common;
use common::poll::wait_until;
use common::test_server::setup_may_runtime;

/// Task hooks exercising the worker side of the bridge.
///
/// Task workers run outside the request's context; anything that must reach
/// a connection goes through the shared binding table, which is exactly what
/// the `push` kind does here.
struct TaskHooks {
    ctx: Arc<AppContext>,
    notified: AtomicBool,
}

impl AppHooks for TaskHooks {
    fn task(&self, unit: &TaskUnit) -> Option<Value> {
        match unit.kind.as_str() {
            "sum" => {
                let a = unit.payload.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
                let b = unit.payload.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
                Some(json!(a + b))
            }
            "notify" => {
                self.notified.store(true, Ordering::SeqCst);
                None
            }
            "push" => {
                let conn = unit.payload.get("conn").and_then(|v| v.as_u64())?;
                let entry = self.ctx.bind_table.lookup(ConnId(conn))?;
                Some(json!({
                    "channel": entry.channel.as_str(),
                    "handler": entry.handler.as_str(),
                    "http": entry.http,
                }))
            }
            _ => None,
        }
    }
}

fn start_runtime() -> (Arc<ServerRuntime>, Arc<TaskHooks>) {
    setup_may_runtime();
    let mut config = AppConfig::default();
    config.server.worker_num = 1;
    config.server.task_num = Some(2);
    let ctx = AppContext::new(config, Router::new());
    let hooks = Arc::new(TaskHooks {
        ctx: Arc::clone(&ctx),
        notified: AtomicBool::new(false),
    });
    let runtime = ServerRuntime::new(ctx, Dispatcher::new(), Arc::clone(&hooks) as Arc<dyn AppHooks>);
    runtime.start().unwrap();
    (runtime, hooks)
}

#[test]
fn test_dispatch_wait_returns_correlated_result() {
    let (runtime, _hooks) = start_runtime();
    let bridge = runtime.task_bridge();
    let unit = bridge.new_unit("sum", json!({"a": 19, "b": 23}));
    let result = bridge.dispatch_wait(unit).unwrap();
    assert_eq!(result, Some(json!(42)));
    runtime.shutdown();
}

#[test]
fn test_fire_and_forget_dispatch() {
    let (runtime, hooks) = start_runtime();
    let bridge = runtime.task_bridge();
    let unit = bridge.new_unit("notify", Value::Null);
    bridge.dispatch(unit).unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        hooks.notified.load(Ordering::SeqCst)
    }));
    runtime.shutdown();
}

#[test]
fn test_unhandled_kind_yields_empty_result() {
    let (runtime, _hooks) = start_runtime();
    let bridge = runtime.task_bridge();

    let unknown = bridge.new_unit("unknown-kind", Value::Null);
    assert_eq!(bridge.dispatch_wait(unknown).unwrap(), None);

    // The pool keeps serving afterwards.
    let unit = bridge.new_unit("sum", json!({"a": 1, "b": 2}));
    assert_eq!(bridge.dispatch_wait(unit).unwrap(), Some(json!(3)));
    runtime.shutdown();
}

#[test]
fn test_task_worker_reaches_connection_through_binding_table() {
    let (runtime, _hooks) = start_runtime();
    let ctx = runtime.ctx();
    ctx.bind_table
        .bind_channel(ConnId(77), "alerts", "AlertHandler")
        .unwrap();

    let bridge = runtime.task_bridge();
    let unit = bridge.new_unit("push", json!({"conn": 77}));
    let result = bridge.dispatch_wait(unit).unwrap();
    assert_eq!(
        result,
        Some(json!({"channel": "alerts", "handler": "AlertHandler", "http": false}))
    );
    runtime.shutdown();
}

#[test]
fn test_dispatch_after_shutdown_fails() {
    let (runtime, _hooks) = start_runtime();
    runtime.shutdown();
    let bridge = runtime.task_bridge();
    let unit = bridge.new_unit("sum", json!({"a": 1, "b": 1}));
    assert!(bridge.dispatch(unit).is_err());
}
