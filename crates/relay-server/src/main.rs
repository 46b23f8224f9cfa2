//! WebSocket broadcast relay: entry point.
//!
//! This binary serves a small HTTPS surface (a root page and CORS
//! preflight answers) and a secure WebSocket endpoint.  Every text message a
//! client sends is relayed to the other connected clients.  The number of
//! simultaneous clients is fixed; extra connections are refused with close
//! code 1008.
//!
//! # Usage
//!
//! ```text
//! relay-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>              TOML configuration file
//!   --bind <ADDR>                Listen address [default: 0.0.0.0:443]
//!   --max-clients <N>            Concurrent WebSocket sessions [default: 4]
//!   --upgrade-path <PATH>        WebSocket endpoint path [default: /]
//!   --cert <PATH>                TLS certificate chain (PEM or DER)
//!   --key <PATH>                 TLS private key (PEM or PKCS#8 DER)
//!   --include-origin             Echo relayed messages back to their sender
//!   --redirect-url <URL>         Where the root page sends browsers
//!   --handshake-timeout <SECS>   [default: 10]
//!   --send-timeout <SECS>        Per-frame write limit [default: 10]
//!   --idle-timeout <SECS>        0 disables [default: 300]
//!   --outbound-queue <N>         Per-session send queue [default: 64]
//!   --log-level <FILTER>         Overrides RUST_LOG
//! ```
//!
//! # Configuration precedence
//!
//! Built-in defaults, then the `--config` file, then flags.  Every flag can
//! also be given as an environment variable; a flag on the command line wins
//! over the variable.
//!
//! | Variable                   | Flag                  |
//! |----------------------------|-----------------------|
//! | `RELAY_CONFIG`             | `--config`            |
//! | `RELAY_BIND`               | `--bind`              |
//! | `RELAY_MAX_CLIENTS`        | `--max-clients`       |
//! | `RELAY_UPGRADE_PATH`       | `--upgrade-path`      |
//! | `RELAY_CERT`               | `--cert`              |
//! | `RELAY_KEY`                | `--key`               |
//! | `RELAY_INCLUDE_ORIGIN`     | `--include-origin`    |
//! | `RELAY_REDIRECT_URL`       | `--redirect-url`      |
//! | `RELAY_HANDSHAKE_TIMEOUT`  | `--handshake-timeout` |
//! | `RELAY_SEND_TIMEOUT`       | `--send-timeout`      |
//! | `RELAY_IDLE_TIMEOUT`       | `--idle-timeout`      |
//! | `RELAY_OUTBOUND_QUEUE`     | `--outbound-queue`    |
//! | `RELAY_LOG`                | `--log-level`         |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_core::OriginPolicy;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_server::application::BroadcastHandler;
use relay_server::domain::config::{idle_timeout_from_secs, ConfigError};
use relay_server::domain::{RelayConfig, TlsFiles};
use relay_server::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Secure WebSocket broadcast relay.
///
/// Every option is optional; unset options keep the value from the config
/// file, or the built-in default.
#[derive(Debug, Default, Parser)]
#[command(
    name = "relay-server",
    about = "TLS WebSocket relay that fans each message out to the other clients",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address and port to listen on.
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<SocketAddr>,

    /// Maximum number of concurrent WebSocket sessions.
    #[arg(long, env = "RELAY_MAX_CLIENTS")]
    max_clients: Option<usize>,

    /// Path of the WebSocket endpoint.
    #[arg(long, env = "RELAY_UPGRADE_PATH")]
    upgrade_path: Option<String>,

    /// TLS certificate chain.  Without `--cert`/`--key` the relay serves
    /// plain TCP, which is only suitable for local testing.
    #[arg(long, env = "RELAY_CERT")]
    cert: Option<PathBuf>,

    /// TLS private key.
    #[arg(long, env = "RELAY_KEY")]
    key: Option<PathBuf>,

    /// Deliver each message to its sender as well.
    #[arg(long, env = "RELAY_INCLUDE_ORIGIN")]
    include_origin: bool,

    /// Redirect target advertised by the root page.
    #[arg(long, env = "RELAY_REDIRECT_URL")]
    redirect_url: Option<String>,

    /// Seconds allowed for TLS + request head + upgrade.
    #[arg(long, env = "RELAY_HANDSHAKE_TIMEOUT")]
    handshake_timeout: Option<u64>,

    /// Seconds allowed for writing one frame before a stalled peer is dropped.
    #[arg(long, env = "RELAY_SEND_TIMEOUT")]
    send_timeout: Option<u64>,

    /// Seconds without an inbound frame before a session is closed; 0 disables.
    #[arg(long, env = "RELAY_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// Per-session outbound queue length.
    #[arg(long, env = "RELAY_OUTBOUND_QUEUE")]
    outbound_queue: Option<usize>,

    /// Log filter (e.g. `debug`, `relay_server=trace`).  Overrides `RUST_LOG`.
    #[arg(long, env = "RELAY_LOG")]
    log_level: Option<String>,
}

impl Cli {
    /// Builds the effective [`RelayConfig`]: defaults, then the config file,
    /// then these flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the merged
    /// configuration is invalid.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_file(path)
                .with_context(|| format!("loading config file {}", path.display()))?,
            None => RelayConfig::default(),
        };

        if let Some(v) = self.bind {
            config.bind_addr = v;
        }
        if let Some(v) = self.max_clients {
            config.max_clients = v;
        }
        if let Some(v) = self.upgrade_path {
            config.upgrade_path = v;
        }
        if self.include_origin {
            config.origin_policy = OriginPolicy::Include;
        }
        if let Some(v) = self.redirect_url {
            config.redirect_url = Some(v);
        }
        if let Some(v) = self.handshake_timeout {
            config.handshake_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.send_timeout {
            config.send_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.idle_timeout {
            config.idle_timeout = idle_timeout_from_secs(v);
        }
        if let Some(v) = self.outbound_queue {
            config.outbound_queue = v;
        }

        // A lone --cert or --key may complete or replace half of the file's [tls].
        config.tls = match (self.cert, self.key, config.tls.take()) {
            (None, None, existing) => existing,
            (Some(cert_path), Some(key_path), _) => Some(TlsFiles {
                cert_path,
                key_path,
            }),
            (Some(cert_path), None, Some(existing)) => Some(TlsFiles {
                cert_path,
                ..existing
            }),
            (None, Some(key_path), Some(existing)) => Some(TlsFiles {
                key_path,
                ..existing
            }),
            (Some(_), None, None) | (None, Some(_), None) => {
                return Err(ConfigError::IncompleteTls.into());
            }
        };

        config.validate()?;
        Ok(config)
    }
}

fn log_filter(cli_level: Option<&str>) -> EnvFilter {
    match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed with `clap`.
/// 2. `tracing_subscriber` is initialised from `--log-level`, `RUST_LOG`,
///    or `info`, in that order.
/// 3. The effective [`RelayConfig`] is assembled and validated.
/// 4. A Ctrl+C handler clears a shared `AtomicBool`.
/// 5. [`run_server`] binds, loads TLS, and serves until the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.log_level.as_deref()))
        .init();

    let config = cli.into_relay_config()?;

    info!(
        "relay starting: bind={}, max_clients={}, path={}, tls={}",
        config.bind_addr,
        config.max_clients,
        config.upgrade_path,
        config.tls.is_some()
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, BroadcastHandler, running).await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_yield_default_config() {
        // Arrange: parse with no arguments
        let cli = Cli::parse_from(["relay-server"]);

        // Act
        let config = cli.into_relay_config().unwrap();

        // Assert
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "relay-server",
            "--bind",
            "127.0.0.1:9443",
            "--max-clients",
            "16",
            "--upgrade-path",
            "/ws",
            "--include-origin",
            "--idle-timeout",
            "0",
        ]);

        let config = cli.into_relay_config().unwrap();

        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9443");
        assert_eq!(config.max_clients, 16);
        assert_eq!(config.upgrade_path, "/ws");
        assert_eq!(config.origin_policy, OriginPolicy::Include);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn test_cert_and_key_enable_tls() {
        let cli = Cli::parse_from(["relay-server", "--cert", "c.pem", "--key", "k.pem"]);

        let config = cli.into_relay_config().unwrap();

        assert_eq!(
            config.tls,
            Some(TlsFiles {
                cert_path: "c.pem".into(),
                key_path: "k.pem".into()
            })
        );
    }

    #[test]
    fn test_cert_without_key_is_rejected() {
        let cli = Cli {
            cert: Some("c.pem".into()),
            ..Cli::default()
        };

        let result = cli.into_relay_config();

        assert!(result.is_err());
    }

    #[test]
    fn test_zero_max_clients_is_rejected() {
        let cli = Cli {
            max_clients: Some(0),
            ..Cli::default()
        };

        assert!(cli.into_relay_config().is_err());
    }

    #[test]
    fn test_zero_handshake_timeout_is_rejected() {
        let cli = Cli::parse_from(["relay-server", "--handshake-timeout", "0"]);

        let result = cli.into_relay_config();

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ZeroHandshakeTimeout)
        ));
    }

    #[test]
    fn test_send_timeout_flag_sets_config() {
        let cli = Cli::parse_from(["relay-server", "--send-timeout", "3"]);

        let config = cli.into_relay_config().unwrap();

        assert_eq!(config.send_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_config_file_is_overridden_by_flags() {
        // Arrange: a file sets capacity and TLS, the flag replaces the key only.
        let path = std::env::temp_dir().join(format!("relay-main-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "max_clients = 2\nupgrade_path = \"/relay\"\n[tls]\ncert_path = \"f.pem\"\nkey_path = \"f.key\"\n",
        )
        .unwrap();
        let cli = Cli {
            config: Some(path.clone()),
            max_clients: Some(3),
            key: Some("flag.key".into()),
            ..Cli::default()
        };

        // Act
        let config = cli.into_relay_config().unwrap();

        // Assert
        assert_eq!(config.max_clients, 3);
        assert_eq!(config.upgrade_path, "/relay");
        assert_eq!(
            config.tls,
            Some(TlsFiles {
                cert_path: "f.pem".into(),
                key_path: "flag.key".into()
            })
        );
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli {
            config: Some("/nonexistent/relay.toml".into()),
            ..Cli::default()
        };

        assert!(cli.into_relay_config().is_err());
    }
}
