//! HTTP-facing protocol logic: request/response values, route dispatch,
//! upgrade validation, and the built-in pages.
//!
//! Wire parsing and serialisation live in the server crate; everything here
//! operates on already-parsed values.

pub mod handshake;
pub mod message;
pub mod pages;
pub mod router;

pub use handshake::{validate_upgrade, HandshakeError, UpgradeRequest};
pub use message::{Request, Response};
pub use pages::{CorsPreflight, NotFound, RootPage};
pub use router::{Dispatch, Handler, PathPattern, Route, Router};
