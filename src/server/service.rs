use may_minihttp::{HttpService, Request, Response};
use std::io;
use std::sync::Arc;
use tracing::{debug, error};

use super::request::parse_request;
use super::response::write_reply;
use crate::cors::CorsPolicy;
use crate::ids::ConnId;
use crate::lifecycle::ServerRuntime;
use crate::static_files::StaticFiles;

/// Protocol edge of the runtime.
///
/// One clone of the service exists per live connection; the first request on
/// a connection assigns its [`ConnId`], registers it in the shared binding
/// table, and fires the `open` hook. Dropping the clone (connection close)
/// removes the binding and fires `close`. Everything between (favicon
/// special-case, CORS headers, handing the parsed request to a worker) is
/// per-request.
pub struct AppService {
    runtime: Arc<ServerRuntime>,
    statics: StaticFiles,
    cors: CorsPolicy,
    conn: Option<ConnId>,
}

impl AppService {
    pub fn new(runtime: Arc<ServerRuntime>) -> Self {
        let config = &runtime.ctx().config;
        let statics = StaticFiles::new(config.server.public_dir.clone());
        let cors = CorsPolicy::new(&config.app.allow_origin);
        Self {
            runtime,
            statics,
            cors,
            conn: None,
        }
    }

    fn conn_id(&mut self) -> ConnId {
        match self.conn {
            Some(conn) => conn,
            None => {
                let conn = self.runtime.ctx().next_conn_id();
                self.conn = Some(conn);
                debug!(conn = %conn, "Connection opened");
                self.runtime.hooks().open(conn);
                conn
            }
        }
    }
}

impl Clone for AppService {
    fn clone(&self) -> Self {
        // Per-connection clones start unbound; the connection id is assigned
        // on the first request.
        Self {
            runtime: Arc::clone(&self.runtime),
            statics: self.statics.clone(),
            cors: self.cors.clone(),
            conn: None,
        }
    }
}

impl Drop for AppService {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.runtime.ctx().bind_table.unbind(conn);
            self.runtime.hooks().close(conn);
            debug!(conn = %conn, "Connection closed");
        }
    }
}

/// Serve the one special-cased static asset path.
fn favicon_endpoint(res: &mut Response, statics: &StaticFiles) -> io::Result<()> {
    match statics.load("favicon.ico") {
        Ok((bytes, _)) => {
            res.status_code(200, "OK");
            res.header("Content-Type: image/x-icon");
            res.body_vec(bytes);
        }
        Err(_) => {
            res.status_code(404, "Not Found");
            res.body_vec(Vec::new());
        }
    }
    Ok(())
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let conn = self.conn_id();
        let request = parse_request(req, conn);

        // Served directly, without entering the pipeline.
        if request.path == "/favicon.ico" {
            return favicon_endpoint(res, &self.statics);
        }

        let cors_headers = self.cors.headers_for(request.origin());

        // Flag the connection as HTTP in the shared binding table so any
        // process-side component can tell how to reach it.
        if let Err(err) = self.runtime.ctx().bind_table.mark_http(conn) {
            error!(conn = %conn, error = %err, "Binding table write refused");
        }

        let mut reply = self.runtime.submit(Arc::new(request));
        if let Some(headers) = cors_headers {
            for (name, value) in headers {
                reply.set_header(&name, value);
            }
        }
        write_reply(res, reply);
        Ok(())
    }
}
