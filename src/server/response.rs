use may_minihttp::Response;

use crate::dispatcher::{Body, DispatchReply};

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

/// Write a pipeline reply onto the wire.
///
/// A content type already present in the reply headers wins; otherwise one
/// is chosen from the body shape. Empty bodies stay empty (no "null"
/// placeholder).
pub fn write_reply(res: &mut Response, reply: DispatchReply) {
    let reason = status_reason(reply.status);
    res.status_code(reply.status as usize, reason);

    let has_content_type = reply.get_header("content-type").is_some();
    for (name, value) in &reply.headers {
        // Response::header wants a 'static line; dynamic values must be
        // leaked.
        let header = format!("{name}: {value}").into_boxed_str();
        res.header(Box::leak(header));
    }

    match reply.body {
        Body::Empty => {
            res.body_vec(Vec::new());
        }
        Body::Json(value) => {
            if !has_content_type {
                res.header("Content-Type: application/json");
            }
            res.body_vec(serde_json::to_vec(&value).unwrap_or_default());
        }
        Body::Text(text) => {
            if !has_content_type {
                res.header("Content-Type: text/plain; charset=utf-8");
            }
            res.body_vec(text.into_bytes());
        }
        Body::Bytes(bytes) => {
            if !has_content_type {
                res.header("Content-Type: text/plain; charset=utf-8");
            }
            res.body_vec(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(403), "Forbidden");
        assert_eq!(status_reason(404), "Not Found");
        assert_eq!(status_reason(500), "Internal Server Error");
    }
}
