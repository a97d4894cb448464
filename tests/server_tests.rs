//! End-to-end tests over real HTTP: edge parsing, CORS, the favicon
//! special case, pipeline status mapping, and connection-close cleanup.

use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use banyan::config::AppConfig;
use banyan::context::AppContext;
use banyan::dispatcher::{Controller, ControllerRequest, Dispatcher};
use banyan::fault::Fault;
use banyan::lifecycle::{AppHooks, NoopHooks, ServerRuntime};
use banyan::router::Router;
use banyan::server::{AppService, HttpServer, ServerHandle};

mod common;
use common::http::{header, send_request};
use common::poll::wait_until;
use common::test_server::setup_may_runtime;

struct DemoController;

impl Controller for DemoController {
    fn handles(&self, method: &str) -> bool {
        matches!(method, "hello" | "echo" | "fail")
    }

    fn call(&self, method: &str, req: ControllerRequest) -> Result<Value, Fault> {
        match method {
            "hello" => Ok(json!({ "msg": "hello world" })),
            "echo" => Ok(Value::Object(req.input)),
            "fail" => Err(Fault::uncaught("boom")),
            other => Err(Fault::MethodNotFound {
                handler: "demo".into(),
                method: other.into(),
            }),
        }
    }
}

fn build_router() -> Router {
    let mut router = Router::new();
    router.route("/demo/hello", "demo", "hello");
    router.route("/demo/echo", "demo", "echo");
    router.route("/demo/fail", "demo", "fail");
    router.route("/demo/absent", "demo", "absent");
    router
}

fn build_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_controller("demo", Arc::new(DemoController));
    dispatcher
}

/// Test fixture with automatic teardown: stops the listener and retires the
/// workers when the test completes.
struct TestServer {
    runtime: Arc<ServerRuntime>,
    handle: Option<ServerHandle>,
    addr: SocketAddr,
    public: tempfile::TempDir,
}

impl TestServer {
    fn start(hooks: Arc<dyn AppHooks>, configure: impl FnOnce(&mut AppConfig)) -> Self {
        setup_may_runtime();
        let public = tempfile::tempdir().expect("tempdir");

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let mut config = AppConfig::default();
        config.server.worker_num = 2;
        config.server.task_num = Some(2);
        config.server.addr = addr.to_string();
        config.server.public_dir = public.path().to_path_buf();
        configure(&mut config);

        let ctx = AppContext::new(config, build_router());
        let runtime = ServerRuntime::new(Arc::clone(&ctx), build_dispatcher(), hooks);
        runtime.start().expect("runtime start");

        let handle = HttpServer(AppService::new(Arc::clone(&runtime)))
            .start(addr)
            .expect("server start");
        handle.wait_ready().expect("server ready");

        Self {
            runtime,
            handle: Some(handle),
            addr,
            public,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
        self.runtime.shutdown();
    }
}

#[test]
fn test_hello_world_end_to_end() {
    let server = TestServer::start(Arc::new(NoopHooks), |_| {});
    let (status, headers, body) = send_request(server.addr, "GET", "/demo/hello", &[], None);
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-type"), Some("application/json"));
    assert_eq!(body, br#"{"msg":"hello world"}"#);
}

#[test]
fn test_unmapped_path_is_404_with_empty_body() {
    let server = TestServer::start(Arc::new(NoopHooks), |_| {});
    let (status, _, body) = send_request(server.addr, "GET", "/does/not/exist", &[], None);
    assert_eq!(status, 404);
    assert!(body.is_empty());
}

#[test]
fn test_missing_method_is_403() {
    let server = TestServer::start(Arc::new(NoopHooks), |_| {});
    let (status, _, body) = send_request(server.addr, "GET", "/demo/absent", &[], None);
    assert_eq!(status, 403);
    assert!(body.is_empty());
}

#[test]
fn test_handler_fault_is_500_in_production_mode() {
    let server = TestServer::start(Arc::new(NoopHooks), |_| {});
    let (status, _, body) = send_request(server.addr, "GET", "/demo/fail", &[], None);
    assert_eq!(status, 500);
    assert!(body.is_empty());
}

#[test]
fn test_handler_fault_is_inline_diagnostic_in_debug_mode() {
    let server = TestServer::start(Arc::new(NoopHooks), |config| {
        config.app.debug = true;
    });
    let (status, _, body) = send_request(server.addr, "GET", "/demo/fail", &[], None);
    assert_eq!(status, 200);
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("boom"));
    assert!(text.lines().count() > 1);
}

#[test]
fn test_favicon_missing_is_404() {
    let server = TestServer::start(Arc::new(NoopHooks), |_| {});
    let (status, _, _) = send_request(server.addr, "GET", "/favicon.ico", &[], None);
    assert_eq!(status, 404);
}

#[test]
fn test_favicon_served_as_binary_stream() {
    let server = TestServer::start(Arc::new(NoopHooks), |_| {});
    let icon = b"\x00\x00\x01\x00fakeicon";
    std::fs::write(server.public.path().join("favicon.ico"), icon).expect("write icon");
    let (status, headers, body) = send_request(server.addr, "GET", "/favicon.ico", &[], None);
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-type"), Some("image/x-icon"));
    assert_eq!(body, icon);
}

#[test]
fn test_cors_headers_for_allowed_origin() {
    let server = TestServer::start(Arc::new(NoopHooks), |config| {
        config.app.allow_origin = vec!["https://app.example.com".to_string()];
    });
    let (status, headers, _) = send_request(
        server.addr,
        "GET",
        "/demo/hello",
        &[("Origin", "https://APP.example.com")],
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(
        header(&headers, "access-control-allow-origin"),
        Some("https://APP.example.com")
    );
    assert_eq!(header(&headers, "access-control-allow-credentials"), Some("true"));
}

#[test]
fn test_no_cors_headers_for_unlisted_origin() {
    let server = TestServer::start(Arc::new(NoopHooks), |config| {
        config.app.allow_origin = vec!["https://app.example.com".to_string()];
    });
    let (status, headers, _) = send_request(
        server.addr,
        "GET",
        "/demo/hello",
        &[("Origin", "https://evil.test")],
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "access-control-allow-origin"), None);
}

#[test]
fn test_query_wins_over_json_body_in_merge() {
    let server = TestServer::start(Arc::new(NoopHooks), |_| {});
    let (status, _, body) = send_request(
        server.addr,
        "POST",
        "/demo/echo?a=1",
        &[("Content-Type", "application/json")],
        Some(r#"{"a": 2, "b": 3}"#),
    );
    assert_eq!(status, 200);
    let value: Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(value, json!({"a": "1", "b": 3}));
}

#[test]
fn test_form_body_fills_unset_keys() {
    let server = TestServer::start(Arc::new(NoopHooks), |_| {});
    let (status, _, body) = send_request(
        server.addr,
        "POST",
        "/demo/echo?a=1",
        &[("Content-Type", "application/x-www-form-urlencoded")],
        Some("a=2&b=3"),
    );
    assert_eq!(status, 200);
    let value: Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(value, json!({"a": "1", "b": "3"}));
}

#[test]
fn test_connection_close_removes_binding_and_fires_hooks() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ConnHooks {
        opens: AtomicUsize,
        closes: AtomicUsize,
    }
    impl AppHooks for ConnHooks {
        fn open(&self, _conn: banyan::ConnId) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }
        fn close(&self, _conn: banyan::ConnId) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    let hooks = Arc::new(ConnHooks::default());
    let server = TestServer::start(Arc::clone(&hooks) as Arc<dyn AppHooks>, |_| {});

    let (status, _, _) = send_request(server.addr, "GET", "/demo/hello", &[], None);
    assert_eq!(status, 200);

    // While a request is handled the binding table holds exactly one row per
    // live connection; once the client disconnects the row is removed and
    // the close hook fires.
    let ctx = Arc::clone(server.runtime.ctx());
    assert!(wait_until(Duration::from_secs(3), || {
        ctx.bind_table.is_empty() && hooks.closes.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(hooks.opens.load(Ordering::SeqCst), 1);
}
