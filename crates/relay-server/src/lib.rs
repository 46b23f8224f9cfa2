//! relay-server library crate.
//!
//! A TLS WebSocket endpoint that relays every text message a client sends
//! to the other connected clients, with a fixed number of client slots.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (text frames over wss://)
//!         ↕
//! [relay-server]
//!   ├── domain/           RelayConfig and its TOML schema
//!   ├── application/      EventLoop (registry owner) and MessageHandler
//!   └── infrastructure/
//!         ├── server/     accept loop, TLS, per-connection tasks
//!         ├── connection/ request head → route → upgrade → session I/O
//!         ├── http_io/    request-head parsing, response writing
//!         └── tls/        certificate and key loading (rustls)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no network I/O.
//! - `application` depends on `domain` and `relay-core`; it uses Tokio
//!   channels but never touches a socket.
//! - `infrastructure` depends on all other layers plus `tokio`,
//!   `tokio-rustls`, and `tokio-tungstenite`.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: the event loop and message handling.
pub mod application;

/// Infrastructure layer: listener, TLS, HTTP, and WebSocket I/O.
pub mod infrastructure;
