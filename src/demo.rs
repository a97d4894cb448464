//! Built-in demo registry used by `banyan serve` and `banyan routes`.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::dispatcher::{Controller, ControllerRequest, Dispatcher};
use crate::fault::Fault;
use crate::router::Router;

struct DemoController;

impl Controller for DemoController {
    fn handles(&self, method: &str) -> bool {
        matches!(method, "hello" | "echo")
    }

    fn call(&self, method: &str, req: ControllerRequest) -> Result<Value, Fault> {
        match method {
            "hello" => Ok(json!({ "msg": "hello world" })),
            "echo" => Ok(Value::Object(req.input)),
            other => Err(Fault::MethodNotFound {
                handler: "demo".to_string(),
                method: other.to_string(),
            }),
        }
    }
}

pub(crate) fn demo_router() -> Router {
    let mut router = Router::new();
    router.route("/demo/hello", "demo", "hello");
    router.route("/demo/echo", "demo", "echo");
    router
}

pub(crate) fn demo_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_controller("demo", Arc::new(DemoController));
    dispatcher
}
