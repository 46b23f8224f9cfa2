//! Application layer for relay-server.
//!
//! The application layer decides *what happens* when a session opens, sends
//! a frame, or closes.  It owns the client registry through the single
//! [`EventLoop`] task and delegates every text frame to a [`MessageHandler`].
//!
//! # What does NOT belong here?
//!
//! - Sockets, TLS, or HTTP parsing (that is infrastructure)
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod event_loop;
pub mod handler;

pub use event_loop::{EventLoop, Flow, HandleError, RelayEvent, RelayHandle};
pub use handler::{BroadcastHandler, MessageHandler, RelayContext};
