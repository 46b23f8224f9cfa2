//! Infrastructure layer for relay-server.
//!
//! The infrastructure layer handles all I/O: binding the listener,
//! terminating TLS, reading the HTTP request head, performing the WebSocket
//! upgrade, and moving frames between sockets and the event loop.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener and accepting connections
//! - Loading certificates and keys into a rustls acceptor
//! - Parsing request heads and writing HTTP responses
//! - Spawning per-connection Tokio tasks
//! - Handling the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Deciding which route answers a request (that is `relay_core::Router`)
//! - Slot bookkeeping and fan-out (that is the event loop and `relay-core`)
//! - Configuration parsing (that is the domain layer and `main.rs`)

pub mod connection;
pub mod http_io;
pub mod server;
pub mod tls;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use connection::{Outbound, Outbox};
pub use server::{run_server, RelayServer};
