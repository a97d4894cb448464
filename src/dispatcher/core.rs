//! Dispatcher core - hot path for request dispatch.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use crate::context::{AppContext, ContextKey, RequestScope, ResponseBuffer};
use crate::fault::Fault;
use crate::server::request::HttpRequest;

/// Maximum inline headers before heap allocation; most replies carry far
/// fewer.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage for the hot path.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Merged request input: query, form body, and raw-JSON body folded into one
/// map.
pub type InputMap = serde_json::Map<String, Value>;

/// A business handler ("controller").
///
/// Controllers receive the merged, form-transformed input and a
/// [`RequestScope`] handle to their own request-scoped state. A returned
/// `Value::Null` means the response was (or will be) written directly into
/// the scoped response buffer; any other value is serialized for the client.
pub trait Controller: Send + Sync {
    /// Whether this controller exposes the routed method.
    fn handles(&self, method: &str) -> bool;

    fn call(&self, method: &str, req: ControllerRequest) -> Result<Value, Fault>;
}

/// Input handed to a controller method.
pub struct ControllerRequest {
    pub input: InputMap,
    pub scope: RequestScope,
}

/// A validation/middleware unit attached to a handler.
///
/// Runs before the controller with the raw merged input; may transform or
/// replace it, or reject the request with [`Fault::ValidationRejected`].
pub trait FormValidator: Send + Sync {
    /// Whether this form covers the routed method.
    fn handles(&self, method: &str) -> bool;

    fn validate(&self, method: &str, input: InputMap) -> Result<InputMap, Fault>;
}

/// Reply body shapes produced by the pipeline.
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// Final result of dispatching one request.
#[derive(Debug, Clone)]
pub struct DispatchReply {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Body,
}

impl DispatchReply {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Body::Empty,
        }
    }

    pub fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Body::Json(value),
        }
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Body::Text(text.into()),
        }
    }

    pub fn bytes(status: u16, bytes: Vec<u8>) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Body::Bytes(bytes),
        }
    }

    /// JSON error envelope, used for transport-level failures.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    /// Add or replace a header (case-insensitive on the name).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body rendered as UTF-8 where possible; test convenience.
    pub fn body_string(&self) -> String {
        match &self.body {
            Body::Empty => String::new(),
            Body::Json(v) => v.to_string(),
            Body::Text(s) => s.clone(),
            Body::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

/// Fold the three request-data sources into one input map.
///
/// Left-biased: merge order is query → form body → raw JSON, and each source
/// only fills keys no earlier source has set. Swapping this for the usual
/// right-biased overwrite changes externally observable behavior.
pub fn merge_request_data(
    query: &InputMap,
    form: &InputMap,
    raw_json: Option<&Value>,
) -> InputMap {
    let mut merged = query.clone();
    for (k, v) in form {
        merged.entry(k.clone()).or_insert_with(|| v.clone());
    }
    if let Some(Value::Object(raw)) = raw_json {
        for (k, v) in raw {
            merged.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    merged
}

/// Routes requests through the validation → handler pipeline.
///
/// Controllers and forms are registered by handler name at startup; the
/// router supplies the name at dispatch time.
#[derive(Default, Clone)]
pub struct Dispatcher {
    controllers: HashMap<String, Arc<dyn Controller>>,
    forms: HashMap<String, Arc<dyn FormValidator>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller. Re-registering a name replaces the previous
    /// controller.
    pub fn register_controller(&mut self, name: &str, controller: Arc<dyn Controller>) {
        if self.controllers.insert(name.to_string(), controller).is_some() {
            warn!(handler_name = name, "Replaced existing controller");
        } else {
            info!(
                handler_name = name,
                total_handlers = self.controllers.len(),
                "Controller registered"
            );
        }
    }

    /// Attach a validation unit to a handler name.
    pub fn register_form(&mut self, name: &str, form: Arc<dyn FormValidator>) {
        if self.forms.insert(name.to_string(), form).is_some() {
            warn!(handler_name = name, "Replaced existing form");
        }
    }

    pub fn has_controller(&self, name: &str) -> bool {
        self.controllers.contains_key(name)
    }

    /// Run the full pipeline for one request.
    ///
    /// Never panics outward: the pipeline body runs under `catch_unwind`, so
    /// a buggy stage still produces a 500 and the scope guard still reclaims
    /// the context entries.
    pub fn execute(
        &self,
        ctx: &Arc<AppContext>,
        key: ContextKey,
        request: Arc<HttpRequest>,
    ) -> DispatchReply {
        let request_id = request.id;
        let path = request.path.clone();
        match catch_unwind(AssertUnwindSafe(|| self.run_pipeline(ctx, key, request))) {
            Ok(reply) => reply,
            Err(panic) => {
                error!(
                    request_id = %request_id,
                    path = %path,
                    panic_message = %panic_message(panic.as_ref()),
                    "Dispatch pipeline panicked - CRITICAL"
                );
                DispatchReply::empty(500)
            }
        }
    }

    fn run_pipeline(
        &self,
        ctx: &Arc<AppContext>,
        key: ContextKey,
        request: Arc<HttpRequest>,
    ) -> DispatchReply {
        let debug_mode = ctx.config.app.debug;
        let store = &ctx.store;
        let response = ResponseBuffer::new();
        store.set_request(key, Arc::clone(&request));
        store.set_response(key, response.clone());
        // Cleanup for all three entries runs when this guard drops, on every
        // exit path out of this function.
        let _guard = store.begin(key);

        let request_id = request.id;

        let route = match ctx.router.resolve(&request.path) {
            Ok(route) => route,
            Err(fault) => {
                debug!(request_id = %request_id, %fault, "Route resolution failed");
                return diagnostic_or_empty(404, format!("404 {fault}"), debug_mode);
            }
        };
        store.set_route(key, route.clone());

        info!(
            request_id = %request_id,
            worker_id = key.worker_id,
            coroutine_id = key.coroutine_id,
            handler = %route.handler,
            method = %route.method,
            path = %request.path,
            "Request dispatched to pipeline"
        );

        let mut input = merge_request_data(&request.query, &request.form, request.raw_json.as_ref());

        // Validation stage. A rejection or fault here means the handler
        // stage is never reached.
        if let Some(form) = self.forms.get(route.handler.as_ref()) {
            if form.handles(&route.method) {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    form.validate(&route.method, input.clone())
                }));
                match outcome {
                    Ok(Ok(transformed)) => input = transformed,
                    Ok(Err(fault)) => {
                        warn!(request_id = %request_id, handler = %route.handler, %fault, "Form stage rejected request");
                        return fault_reply(&fault, debug_mode);
                    }
                    Err(panic) => {
                        let fault = Fault::uncaught(panic_message(panic.as_ref()));
                        error!(request_id = %request_id, handler = %route.handler, %fault, "Form stage panicked");
                        return fault_reply(&fault, debug_mode);
                    }
                }
            }
        }

        // Handler stage.
        let controller = match self.controllers.get(route.handler.as_ref()) {
            Some(controller) => controller,
            None => {
                let fault = Fault::HandlerNotFound {
                    handler: route.handler.to_string(),
                };
                error!(
                    request_id = %request_id,
                    %fault,
                    available_handlers = self.controllers.len(),
                    "Handler not found"
                );
                return diagnostic_or_empty(
                    404,
                    format!("404 {}: {fault}", request.path),
                    debug_mode,
                );
            }
        };
        if !controller.handles(&route.method) {
            let fault = Fault::MethodNotFound {
                handler: route.handler.to_string(),
                method: route.method.to_string(),
            };
            warn!(request_id = %request_id, %fault, "Method not found");
            return diagnostic_or_empty(
                403,
                format!("403 {}: {fault}", request.path),
                debug_mode,
            );
        }

        let scope = store.scope(key);
        let execution_start = Instant::now();
        let call = catch_unwind(AssertUnwindSafe(|| {
            controller.call(&route.method, ControllerRequest { input, scope })
        }));
        let execution_time_ms = execution_start.elapsed().as_millis() as u64;

        match call {
            Ok(Ok(Value::Null)) => {
                // Empty result: the handler wrote (or wrote nothing) into
                // its response buffer directly.
                let (status, buf) = response.flush();
                info!(request_id = %request_id, status, execution_time_ms, "Handler wrote response directly");
                if buf.is_empty() {
                    DispatchReply::empty(status)
                } else {
                    DispatchReply::bytes(status, buf)
                }
            }
            Ok(Ok(value)) => {
                info!(request_id = %request_id, status = 200, execution_time_ms, "Handler returned value");
                match value {
                    Value::String(text) => DispatchReply::text(200, text),
                    structured => DispatchReply::json(200, structured),
                }
            }
            Ok(Err(Fault::EarlyExit)) => {
                // Intentional early termination: flush whatever partial
                // content is buffered instead of an error body.
                let (_, buf) = response.flush();
                info!(request_id = %request_id, buffered = buf.len(), "Handler exited early; flushing buffer");
                DispatchReply::bytes(200, buf)
            }
            Ok(Err(fault)) => {
                error!(request_id = %request_id, handler = %route.handler, %fault, execution_time_ms, "Handler fault");
                fault_reply(&fault, debug_mode)
            }
            Err(panic) => {
                let fault = Fault::uncaught(panic_message(panic.as_ref()));
                error!(request_id = %request_id, handler = %route.handler, %fault, execution_time_ms, "Handler panicked - CRITICAL");
                fault_reply(&fault, debug_mode)
            }
        }
    }
}

/// Debug mode surfaces the fault inline at 200; production returns the bare
/// status with an empty body.
fn fault_reply(fault: &Fault, debug_mode: bool) -> DispatchReply {
    if debug_mode {
        let trace = std::backtrace::Backtrace::force_capture();
        DispatchReply::text(200, format!("{fault}\n{trace}"))
    } else {
        DispatchReply::empty(500)
    }
}

fn diagnostic_or_empty(status: u16, message: String, debug_mode: bool) -> DispatchReply {
    if debug_mode {
        DispatchReply::text(200, message)
    } else {
        DispatchReply::empty(status)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> InputMap {
        match value {
            Value::Object(m) => m,
            _ => InputMap::new(),
        }
    }

    #[test]
    fn test_merge_is_left_biased() {
        let query = map(json!({"a": 1}));
        let form = map(json!({"a": 2, "b": 3}));
        let raw = json!({"b": 4, "c": 5});
        let merged = merge_request_data(&query, &form, Some(&raw));
        assert_eq!(Value::Object(merged), json!({"a": 1, "b": 3, "c": 5}));
    }

    #[test]
    fn test_merge_ignores_non_object_raw_body() {
        let query = map(json!({"a": 1}));
        let merged = merge_request_data(&query, &InputMap::new(), Some(&json!("scalar")));
        assert_eq!(Value::Object(merged), json!({"a": 1}));
    }

    #[test]
    fn test_reply_headers() {
        let mut reply = DispatchReply::empty(200);
        reply.set_header("X-Token", "a".to_string());
        reply.set_header("x-token", "b".to_string());
        assert_eq!(reply.get_header("X-TOKEN"), Some("b"));
        assert_eq!(reply.headers.len(), 1);
    }
}
