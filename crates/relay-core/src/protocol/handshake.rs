//! WebSocket upgrade request validation (RFC 6455 §4.2.1).
//!
//! Validation runs *before* any registry slot is touched.  A request that
//! fails here is answered with a plain HTTP error and the connection is
//! closed; nothing is retained.
//!
//! Deriving `Sec-WebSocket-Accept` and framing are left to the WebSocket
//! library in the server crate.  This module only decides whether the
//! request is acceptable and extracts the client key.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::header::{HeaderValue, ALLOW, CONNECTION, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{Method, StatusCode};
use thiserror::Error;

use super::message::{Request, Response};
use super::pages::error_page;

/// The only WebSocket protocol version the relay speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// Ways an upgrade request can violate the protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// The upgrade route only accepts GET.
    #[error("WebSocket upgrade requires GET, got {0}")]
    MethodNotAllowed(Method),

    /// The request asked for an upgrade on a path with no upgrade route.
    #[error("no WebSocket endpoint at {0}")]
    NoUpgradeRoute(String),

    /// `Upgrade: websocket` is missing.
    #[error("missing 'Upgrade: websocket' header")]
    MissingUpgradeHeader,

    /// `Connection` does not carry the `upgrade` token.
    #[error("'Connection' header does not contain 'upgrade'")]
    MissingConnectionUpgrade,

    /// `Sec-WebSocket-Version` is absent or not 13.
    #[error("unsupported WebSocket version {0:?}")]
    UnsupportedVersion(Option<String>),

    /// `Sec-WebSocket-Key` is absent or not 16 base64-encoded bytes.
    #[error("missing or malformed Sec-WebSocket-Key")]
    InvalidKey,
}

impl HandshakeError {
    /// HTTP status sent back for this violation.
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            HandshakeError::UnsupportedVersion(_) => StatusCode::UPGRADE_REQUIRED,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Full HTTP error response for this violation.
    pub fn to_response(&self) -> Response {
        let res = error_page(self.status(), &self.to_string());
        match self {
            HandshakeError::MethodNotAllowed(_) => {
                res.with_header(ALLOW, HeaderValue::from_static("GET"))
            }
            HandshakeError::UnsupportedVersion(_) => res.with_header(
                SEC_WEBSOCKET_VERSION,
                HeaderValue::from_static(WEBSOCKET_VERSION),
            ),
            _ => res,
        }
    }
}

/// A validated upgrade request, ready for the protocol handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    key: String,
}

impl UpgradeRequest {
    /// The client's `Sec-WebSocket-Key`, exactly as sent.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Checks that `request` is a well-formed upgrade to `upgrade_path`.
///
/// # Errors
///
/// Returns the first [`HandshakeError`] found, checked in this order:
/// method, path, `Upgrade`, `Connection`, version, key.
pub fn validate_upgrade(
    request: &Request,
    upgrade_path: &str,
) -> Result<UpgradeRequest, HandshakeError> {
    if request.method() != Method::GET {
        return Err(HandshakeError::MethodNotAllowed(request.method().clone()));
    }
    if request.path() != upgrade_path {
        return Err(HandshakeError::NoUpgradeRoute(request.path().to_string()));
    }
    if !request.header_has_token(&UPGRADE, "websocket") {
        return Err(HandshakeError::MissingUpgradeHeader);
    }
    if !request.header_has_token(&CONNECTION, "upgrade") {
        return Err(HandshakeError::MissingConnectionUpgrade);
    }

    let version = request.header_str(&SEC_WEBSOCKET_VERSION).map(str::trim);
    if version != Some(WEBSOCKET_VERSION) {
        return Err(HandshakeError::UnsupportedVersion(
            version.map(str::to_string),
        ));
    }

    let key = request
        .header_str(&SEC_WEBSOCKET_KEY)
        .map(str::trim)
        .ok_or(HandshakeError::InvalidKey)?;
    match STANDARD.decode(key) {
        Ok(raw) if raw.len() == 16 => Ok(UpgradeRequest {
            key: key.to_string(),
        }),
        _ => Err(HandshakeError::InvalidKey),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
