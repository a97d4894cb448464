//! URI resolution.
//!
//! The router is an explicit registration table built once at startup: each
//! entry maps a normalized URI path to the name of a handler and the method
//! to invoke on it. Resolution is a pure lookup (no reflection, no runtime
//! name derivation) and produces an immutable [`Route`] that travels with
//! the request for the rest of the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fault::Fault;

/// Immutable result of URI resolution.
#[derive(Debug, Clone)]
pub struct Route {
    /// Normalized URI path this route was registered under.
    pub path: Arc<str>,
    /// Registered handler name.
    pub handler: Arc<str>,
    /// Method to invoke on the handler (and on its form unit, if any).
    pub method: Arc<str>,
}

/// Startup-built table mapping URI paths to handler/method pairs.
#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Re-registering a path replaces the previous entry.
    pub fn route(&mut self, path: &str, handler: &str, method: &str) -> &mut Self {
        let normalized = normalize_path(path);
        let route = Route {
            path: Arc::from(normalized.as_str()),
            handler: Arc::from(handler),
            method: Arc::from(method),
        };
        if self.routes.insert(normalized.clone(), route).is_some() {
            warn!(path = %normalized, handler, "Replaced existing route");
        } else {
            info!(path = %normalized, handler, method, "Route registered");
        }
        self
    }

    /// Resolve a request URI to its route.
    ///
    /// The query string is ignored; a trailing slash is not significant.
    pub fn resolve(&self, uri: &str) -> Result<Route, Fault> {
        let path = normalize_path(uri);
        debug!(uri, path = %path, "Route lookup");
        match self.routes.get(&path) {
            Some(route) => Ok(route.clone()),
            None => {
                warn!(uri, path = %path, "No route matched");
                Err(Fault::RouteNotFound { uri: path })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Print the registered table to stdout.
    pub fn dump_routes(&self) {
        println!("[routes] count={}", self.routes.len());
        let mut paths: Vec<_> = self.routes.values().collect();
        paths.sort_by(|a, b| a.path.cmp(&b.path));
        for route in paths {
            println!("[route] {} -> {}::{}", route.path, route.handler, route.method);
        }
    }
}

fn normalize_path(uri: &str) -> String {
    let path = uri.split(['?', '#']).next().unwrap_or("/");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_registered_path() {
        let mut router = Router::new();
        router.route("/demo/hello", "demo", "hello");
        let route = router.resolve("/demo/hello").unwrap();
        assert_eq!(route.handler.as_ref(), "demo");
        assert_eq!(route.method.as_ref(), "hello");
    }

    #[test]
    fn test_resolve_ignores_query_and_trailing_slash() {
        let mut router = Router::new();
        router.route("/demo/hello", "demo", "hello");
        assert!(router.resolve("/demo/hello?a=1&b=2").is_ok());
        assert!(router.resolve("/demo/hello/").is_ok());
    }

    #[test]
    fn test_unmapped_uri_is_route_not_found() {
        let router = Router::new();
        let err = router.resolve("/does/not/exist").unwrap_err();
        assert!(matches!(err, Fault::RouteNotFound { .. }));
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut router = Router::new();
        router.route("/x", "a", "m");
        router.route("/x", "b", "m");
        assert_eq!(router.resolve("/x").unwrap().handler.as_ref(), "b");
        assert_eq!(router.len(), 1);
    }
}
