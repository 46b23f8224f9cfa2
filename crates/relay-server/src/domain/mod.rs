//! Domain layer for relay-server.
//!
//! Holds the runtime configuration model.  Like the rest of the domain layer
//! it performs no network I/O; reading the optional TOML file is the only
//! side effect, and it happens once at startup.
//!
//! The session, registry, and relay types themselves live in `relay-core`.

pub mod config;

pub use config::{ConfigError, ConfigFile, RelayConfig, TlsFiles};
