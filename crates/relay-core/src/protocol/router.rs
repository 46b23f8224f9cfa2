//! Ordered route table mapping `(method, path)` to a handler.
//!
//! # Match rules
//!
//! Routes are tried in registration order and the **first** match wins.  A
//! route matches when:
//!
//! 1. the request method equals the route method exactly, and
//! 2. the path matches the route pattern: exact equality, or for patterns
//!    ending in `/*`, the path starts with everything before the `*`, and
//! 3. the route kind fits the request: upgrade routes only see requests that
//!    ask for `Upgrade: websocket`, resource routes only see the rest.
//!
//! Rule 3 is what lets the root page and the WebSocket endpoint share `GET /`.
//!
//! If nothing matches, an upgrade request is rejected as a protocol violation
//! and any other request goes to the fallback handler (404 by default).
//!
//! ```text
//!  #  method   pattern   kind
//!  0  GET      /         resource  → RootPage
//!  1  OPTIONS  /*        resource  → CorsPreflight
//!  2  GET      /         upgrade   → WebSocket session
//!  -  (fallback)                   → NotFound
//! ```

use http::Method;

use super::handshake::{validate_upgrade, HandshakeError, UpgradeRequest};
use super::message::{Request, Response};
use super::pages::{CorsPreflight, NotFound, RootPage};

/// A request → response transformation.
///
/// Implemented by the built-in pages and by any matching closure.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

/// Path side of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Matches one path exactly.
    Exact(String),
    /// Matches every path starting with the prefix (stored with its trailing `/`).
    Prefix(String),
}

impl PathPattern {
    /// Parses `"/a/b"` as exact and `"/a/*"` as a prefix wildcard.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') => PathPattern::Prefix(prefix.to_string()),
            _ => PathPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => path == p,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }

    /// The pattern as it was registered.
    pub fn as_pattern(&self) -> String {
        match self {
            PathPattern::Exact(p) => p.clone(),
            PathPattern::Prefix(prefix) => format!("{prefix}*"),
        }
    }
}

/// What a matched route does.
pub enum RouteTarget {
    Resource(Box<dyn Handler>),
    /// Hand the connection to the WebSocket session machinery.
    Upgrade,
}

/// One entry of the route table.
pub struct Route {
    method: Method,
    pattern: PathPattern,
    target: RouteTarget,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn is_upgrade(&self) -> bool {
        matches!(self.target, RouteTarget::Upgrade)
    }

    fn matches(&self, request: &Request) -> bool {
        self.method == *request.method()
            && self.pattern.matches(request.path())
            && self.is_upgrade() == request.wants_upgrade()
    }
}

/// Result of routing one request.
#[derive(Debug)]
pub enum Dispatch {
    /// Send this response and close the connection.
    Respond(Response),
    /// The request is a valid upgrade; continue with the WebSocket handshake.
    Upgrade(UpgradeRequest),
    /// The request violated the upgrade protocol.
    Reject(HandshakeError),
}

/// Ordered route table with a fallback.
pub struct Router {
    routes: Vec<Route>,
    fallback: Box<dyn Handler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// An empty table whose fallback is [`NotFound`].
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: Box::new(NotFound),
        }
    }

    /// The relay's route table: root page, CORS preflight, then the
    /// WebSocket endpoint at `upgrade_path`.
    pub fn standard(upgrade_path: &str, root: RootPage) -> Self {
        Self::new()
            .route(Method::GET, "/", root)
            .route(Method::OPTIONS, "/*", CorsPreflight)
            .upgrade(upgrade_path)
    }

    /// Appends a resource route.
    pub fn route(mut self, method: Method, pattern: &str, handler: impl Handler + 'static) -> Self {
        self.routes.push(Route {
            method,
            pattern: PathPattern::parse(pattern),
            target: RouteTarget::Resource(Box::new(handler)),
        });
        self
    }

    /// Appends the WebSocket upgrade route.  Upgrades always use GET and an
    /// exact path.
    pub fn upgrade(mut self, path: &str) -> Self {
        self.routes.push(Route {
            method: Method::GET,
            pattern: PathPattern::Exact(path.to_string()),
            target: RouteTarget::Upgrade,
        });
        self
    }

    /// Replaces the fallback handler.
    pub fn fallback(mut self, handler: impl Handler + 'static) -> Self {
        self.fallback = Box::new(handler);
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// First route matching `request`, if any.
    pub fn find(&self, request: &Request) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(request))
    }

    /// Routes `request` and runs the matched handler.
    pub fn dispatch(&self, request: &Request) -> Dispatch {
        match self.find(request) {
            Some(route) => match (&route.target, &route.pattern) {
                (RouteTarget::Resource(handler), _) => Dispatch::Respond(handler.handle(request)),
                (RouteTarget::Upgrade, PathPattern::Exact(path)) => {
                    match validate_upgrade(request, path) {
                        Ok(upgrade) => Dispatch::Upgrade(upgrade),
                        Err(e) => Dispatch::Reject(e),
                    }
                }
                (RouteTarget::Upgrade, PathPattern::Prefix(_)) => {
                    Dispatch::Reject(HandshakeError::NoUpgradeRoute(request.path().to_string()))
                }
            },
            None if request.wants_upgrade() => {
                Dispatch::Reject(HandshakeError::NoUpgradeRoute(request.path().to_string()))
            }
            None => Dispatch::Respond(self.fallback.handle(request)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
