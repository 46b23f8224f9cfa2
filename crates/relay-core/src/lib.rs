//! # relay-core
//!
//! Pure logic for the secure WebSocket broadcast relay: the bounded client
//! registry, broadcast fan-out, HTTP route dispatch, and WebSocket upgrade
//! validation.
//!
//! This crate performs no I/O and has no async runtime.  Peers are reached
//! through the [`Transport`] trait, which the server crate implements with a
//! channel per connection and the tests implement with mocks.
//!
//! # Architecture overview (for beginners)
//!
//! ```text
//!  HTTP request ──► Router ──► page handler ──► HTTP response
//!                     │
//!                     └─► upgrade validated ──► ClientRegistry::acquire ──► Session
//!
//!  text frame from slot i ──► BroadcastRelay ──► every other Open slot
//! ```
//!
//! - **`domain`** – sessions, the fixed-capacity [`ClientRegistry`], and the
//!   [`BroadcastRelay`] with its origin policy.
//! - **`protocol`** – request/response values, the ordered [`Router`], the
//!   upgrade handshake checks, and the built-in pages.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root.
pub use domain::{
    BroadcastRelay, ClientRegistry, CloseReason, DeliveryError, DeliveryReport, OriginPolicy,
    RegistryError, RelayError, Session, SessionId, SessionState, SessionTicket, SlotIndex,
    Transport,
};
pub use protocol::{Dispatch, HandshakeError, Request, Response, RootPage, Router, UpgradeRequest};
