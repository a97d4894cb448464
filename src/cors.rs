use std::sync::Arc;

use crate::dispatcher::HeaderVec;

/// Cross-origin policy applied before dispatch.
///
/// Headers are emitted only when the request's declared `origin`
/// case-insensitively matches the configured allow-list; the matched origin
/// is echoed back rather than a wildcard so credentialed requests work.
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allow_origins: Vec<String>,
}

impl CorsPolicy {
    /// Build a policy from the configured allow-list.
    pub fn new(allow_origins: &[String]) -> Self {
        Self {
            allow_origins: allow_origins
                .iter()
                .map(|o| o.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Headers for the given request origin, or `None` when the origin is
    /// absent or not allowed.
    pub fn headers_for(&self, origin: Option<&str>) -> Option<HeaderVec> {
        let origin = origin?;
        if !self
            .allow_origins
            .iter()
            .any(|allowed| allowed == &origin.to_ascii_lowercase())
        {
            return None;
        }
        let mut headers = HeaderVec::new();
        headers.push((
            Arc::from("Access-Control-Allow-Origin"),
            origin.to_string(),
        ));
        headers.push((
            Arc::from("Access-Control-Allow-Credentials"),
            "true".to_string(),
        ));
        headers.push((
            Arc::from("Access-Control-Allow-Methods"),
            "GET, POST, DELETE, PUT, PATCH, OPTIONS".to_string(),
        ));
        headers.push((
            Arc::from("Access-Control-Allow-Headers"),
            "x-requested-with,User-Platform,Content-Type,X-Token".to_string(),
        ));
        Some(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_origin_matches_case_insensitively() {
        let policy = CorsPolicy::new(&["https://Example.COM".to_string()]);
        let headers = policy.headers_for(Some("https://example.com")).unwrap();
        assert_eq!(headers[0].1, "https://example.com");
        assert_eq!(headers.len(), 4);
    }

    #[test]
    fn test_unlisted_origin_gets_no_headers() {
        let policy = CorsPolicy::new(&["https://example.com".to_string()]);
        assert!(policy.headers_for(Some("https://evil.test")).is_none());
        assert!(policy.headers_for(None).is_none());
    }
}
