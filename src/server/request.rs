use http::Method;
use may_minihttp::Request;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, info};

use crate::dispatcher::InputMap;
use crate::ids::{ConnId, RequestId};

/// Parsed HTTP request data stored in the request-context store.
///
/// Everything the pipeline needs is extracted up front: headers (lowercase
/// names), cookies, the three request-data sources (query string,
/// form-encoded body, raw JSON body), and the identifiers that key this
/// request into the runtime's tables.
#[derive(Debug)]
pub struct HttpRequest {
    /// Correlation id for the log stream.
    pub id: RequestId,
    /// Connection this request arrived on; keys the binding table.
    pub conn: ConnId,
    pub method: Method,
    /// Request path without the query string.
    pub path: String,
    /// HTTP headers (lowercase keys).
    pub headers: HashMap<String, String>,
    /// Cookies parsed from the Cookie header.
    pub cookies: HashMap<String, String>,
    /// Query string parameters.
    pub query: InputMap,
    /// Form-encoded body parameters (only for urlencoded content types).
    pub form: InputMap,
    /// Raw body parsed as JSON, when it parses.
    pub raw_json: Option<Value>,
}

impl HttpRequest {
    /// Get a header by name (case-insensitive per RFC 7230).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|v| v.as_str())
    }

    /// The declared cross-origin requester, if any.
    pub fn origin(&self) -> Option<&str> {
        self.header("origin")
    }
}

/// Parse cookies from the `cookie` header.
pub fn parse_cookies(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .get("cookie")
        .map(|c| {
            c.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim().to_string();
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((name, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse query string parameters from a URL path.
pub fn parse_query_params(path: &str) -> InputMap {
    match path.find('?') {
        Some(pos) => parse_urlencoded(&path[pos + 1..]),
        None => InputMap::new(),
    }
}

/// Parse an urlencoded parameter string into an input map.
///
/// Duplicate keys keep the first value, consistent with the left-biased
/// merge the dispatcher applies across sources.
pub fn parse_urlencoded(raw: &str) -> InputMap {
    let mut map = InputMap::new();
    for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
        map.entry(k.to_string())
            .or_insert_with(|| Value::String(v.to_string()));
    }
    map
}

/// Extract everything the pipeline needs from a raw HTTP request.
pub fn parse_request(req: Request, conn: ConnId) -> HttpRequest {
    let id = RequestId::new();
    let method = Method::from_bytes(req.method().as_bytes()).unwrap_or(Method::GET);
    let raw_path = req.path().to_string();
    let path = raw_path.split('?').next().unwrap_or("/").to_string();

    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let cookies = parse_cookies(&headers);
    let query = parse_query_params(&raw_path);

    let mut body_str = String::new();
    let body_len = req.body().read_to_string(&mut body_str).unwrap_or(0);

    let content_type = headers
        .get("content-type")
        .map(|s| s.as_str())
        .unwrap_or("");
    let form = if body_len > 0 && content_type.starts_with("application/x-www-form-urlencoded") {
        parse_urlencoded(&body_str)
    } else {
        InputMap::new()
    };
    let raw_json = if body_len > 0 {
        serde_json::from_str(&body_str).ok()
    } else {
        None
    };

    debug!(
        header_count = headers.len(),
        cookie_count = cookies.len(),
        query_count = query.len(),
        form_count = form.len(),
        body_bytes = body_len,
        "Request components extracted"
    );
    info!(
        request_id = %id,
        conn = %conn,
        method = %method,
        path = %path,
        "HTTP request parsed"
    );

    HttpRequest {
        id,
        conn,
        method,
        path,
        headers,
        cookies,
        query,
        form,
        raw_json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookies() {
        let mut h = HashMap::new();
        h.insert("cookie".to_string(), "a=b; c=d".to_string());
        let cookies = parse_cookies(&h);
        assert_eq!(cookies.get("a"), Some(&"b".to_string()));
        assert_eq!(cookies.get("c"), Some(&"d".to_string()));
    }

    #[test]
    fn test_parse_query_params() {
        let q = parse_query_params("/p?x=1&y=two");
        assert_eq!(q.get("x"), Some(&Value::String("1".into())));
        assert_eq!(q.get("y"), Some(&Value::String("two".into())));
        assert!(parse_query_params("/p").is_empty());
    }

    #[test]
    fn test_urlencoded_first_value_wins() {
        let q = parse_urlencoded("a=1&a=2&b=3");
        assert_eq!(q.get("a"), Some(&Value::String("1".into())));
        assert_eq!(q.get("b"), Some(&Value::String("3".into())));
    }
}
