//! Minimal HTTP request and response values.
//!
//! These are plain data: the server's I/O layer parses the wire request into a
//! [`Request`] and serialises the [`Response`] back.  Method, status and header
//! types come from the `http` crate so the router works with strongly typed
//! values instead of raw strings.

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};

/// `Content-Type` used by every HTML page the relay serves.
pub const TEXT_HTML: &str = "text/html";

/// A parsed HTTP request head.  The body, if any, is never read.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
}

impl Request {
    /// Builds a request from a method and a request target.
    ///
    /// Anything after `?` in `target` is kept as the query and excluded from
    /// path matching.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header.  Repeated names are kept as separate values.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns `true` if any comma-separated value of header `name` equals
    /// `token`, ignoring ASCII case.
    pub fn header_has_token(&self, name: &HeaderName, token: &str) -> bool {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// First value of header `name` as a string, if present and visible ASCII.
    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Returns `true` if the client asks for a WebSocket upgrade.
    pub fn wants_upgrade(&self) -> bool {
        self.header_has_token(&http::header::UPGRADE, "websocket")
    }
}

/// An HTTP response with a text body.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl Response {
    /// An empty response with `status`.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: String::new(),
        }
    }

    /// An HTML response with `Content-Type: text/html`.
    pub fn html(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static(TEXT_HTML))
            .with_body(body)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Header value as a string, for assertions and logging.
    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONNECTION, UPGRADE};

    #[test]
    fn test_request_splits_query_from_path() {
        let req = Request::new(Method::GET, "/chat?room=1");
        assert_eq!(req.path(), "/chat");
        assert_eq!(req.query(), Some("room=1"));
    }

    #[test]
    fn test_request_without_query() {
        let req = Request::new(Method::GET, "/");
        assert_eq!(req.path(), "/");
        assert_eq!(req.query(), None);
    }

    #[test]
    fn test_header_has_token_is_case_insensitive_and_comma_aware() {
        let req = Request::new(Method::GET, "/")
            .with_header(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(req.header_has_token(&CONNECTION, "upgrade"));
        assert!(!req.header_has_token(&CONNECTION, "close"));
    }

    #[test]
    fn test_wants_upgrade_detects_websocket_token() {
        let plain = Request::new(Method::GET, "/");
        let upgrade =
            Request::new(Method::GET, "/").with_header(UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(!plain.wants_upgrade());
        assert!(upgrade.wants_upgrade());
    }

    #[test]
    fn test_html_response_sets_content_type() {
        let res = Response::html(StatusCode::OK, "<p>x</p>");
        assert_eq!(res.header_str(&CONTENT_TYPE), Some("text/html"));
        assert_eq!(res.body(), "<p>x</p>");
    }
}
