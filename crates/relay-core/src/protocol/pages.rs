//! Built-in HTTP handlers: root page, CORS preflight, and the 404 fallback.

use http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, REFRESH,
};
use http::StatusCode;

use super::message::{Request, Response};
use super::router::Handler;

/// Methods advertised in CORS preflight responses.
pub const CORS_ALLOW_METHODS: &str = "GET,POST,OPTIONS";

/// Informational page served at the root path.
///
/// When a redirect target is configured, the page also carries a
/// `Refresh` header so browsers move on to the web UI automatically.
#[derive(Debug, Clone, Default)]
pub struct RootPage {
    redirect_url: Option<String>,
}

impl RootPage {
    pub fn new(redirect_url: Option<String>) -> Self {
        Self { redirect_url }
    }
}

impl Handler for RootPage {
    fn handle(&self, _request: &Request) -> Response {
        let link = self
            .redirect_url
            .as_deref()
            .map(|url| format!("<p><a href=\"{}\">Continue</a></p>", escape_html(url)))
            .unwrap_or_default();

        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Redirecting...</title></head>\n\
             <body><h1>Redirecting...</h1><p>You are now being redirected to the web UI.</p>{link}</body>\n\
             </html>\n"
        );
        let res = Response::html(StatusCode::OK, body);

        match self
            .redirect_url
            .as_deref()
            .and_then(|url| HeaderValue::from_str(&format!("0; url={url}")).ok())
        {
            Some(refresh) => res.with_header(REFRESH, refresh),
            None => res,
        }
    }
}

/// Answers browser preflight requests with permissive CORS headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorsPreflight;

impl Handler for CorsPreflight {
    fn handle(&self, _request: &Request) -> Response {
        Response::new(StatusCode::NO_CONTENT)
            .with_header(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(CORS_ALLOW_METHODS),
            )
            .with_header(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))
            .with_header(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"))
    }
}

/// Fallback for requests no route matched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl Handler for NotFound {
    fn handle(&self, _request: &Request) -> Response {
        error_page(
            StatusCode::NOT_FOUND,
            "The requested resource was not found on this server.",
        )
    }
}

/// Minimal HTML error page for `status`.
pub fn error_page(status: StatusCode, detail: &str) -> Response {
    let title = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{title}</title></head>\n\
         <body><h1>{title}</h1><p>{}</p></body>\n</html>\n",
        escape_html(detail)
    );
    Response::html(status, body)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
