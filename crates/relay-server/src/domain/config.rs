//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It is assembled in three layers, each overriding the previous one:
//!
//! 1. built-in defaults ([`RelayConfig::default`]),
//! 2. an optional TOML file ([`ConfigFile`]),
//! 3. CLI flags / `RELAY_*` environment variables (applied in `main.rs`).
//!
//! # Example file
//!
//! ```toml
//! bind_addr = "0.0.0.0:443"
//! max_clients = 4
//! upgrade_path = "/"
//! origin_policy = "exclude"
//! redirect_url = "https://device.local/ui/"
//! handshake_timeout_secs = 10
//! send_timeout_secs = 10
//! idle_timeout_secs = 300
//! outbound_queue = 64
//!
//! [tls]
//! cert_path = "/etc/relay/cert.pem"
//! key_path = "/etc/relay/key.pem"
//! ```
//!
//! Every key is optional.  Unknown keys are rejected so typos do not pass
//! silently.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_core::OriginPolicy;
use serde::Deserialize;
use thiserror::Error;

/// Error type for loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `max_clients` is zero.
    #[error("max_clients must be at least 1")]
    ZeroCapacity,

    /// `outbound_queue` is zero.
    #[error("outbound_queue must be at least 1")]
    ZeroOutboundQueue,

    /// `handshake_timeout` is zero, so every handshake would time out.
    #[error("handshake_timeout must be greater than zero")]
    ZeroHandshakeTimeout,

    /// `send_timeout` is zero, so every write would time out.
    #[error("send_timeout must be greater than zero")]
    ZeroSendTimeout,

    /// The upgrade path is not absolute.
    #[error("upgrade_path must start with '/': {0:?}")]
    InvalidUpgradePath(String),

    /// Only one of certificate and key was given.
    #[error("TLS needs both a certificate and a private key")]
    IncompleteTls,
}

/// Certificate chain and private key files for TLS termination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// All runtime configuration for the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Address and port the listener binds to.
    pub bind_addr: SocketAddr,

    /// Maximum number of concurrent WebSocket sessions.
    pub max_clients: usize,

    /// Path of the WebSocket endpoint.
    pub upgrade_path: String,

    /// Whether a relayed message is echoed back to its sender.
    pub origin_policy: OriginPolicy,

    /// TLS material.  `None` serves plain TCP (development and tests only).
    pub tls: Option<TlsFiles>,

    /// Where the root page sends browsers, if anywhere.
    pub redirect_url: Option<String>,

    /// Upper bound on TLS accept + request head + upgrade response.
    pub handshake_timeout: Duration,

    /// Upper bound on writing one frame to a peer.  A session whose peer
    /// stops reading is dropped once a write takes longer than this.
    pub send_timeout: Duration,

    /// Close a session after this long without an inbound frame.
    /// `None` disables the idle check.
    pub idle_timeout: Option<Duration>,

    /// Per-session outbound queue length.  A full queue counts as a
    /// delivery failure.
    pub outbound_queue: usize,
}

impl Default for RelayConfig {
    /// | Field             | Default        |
    /// |-------------------|----------------|
    /// | bind_addr         | `0.0.0.0:443`  |
    /// | max_clients       | 4              |
    /// | upgrade_path      | `/`            |
    /// | origin_policy     | exclude        |
    /// | tls               | none           |
    /// | handshake_timeout | 10 seconds     |
    /// | send_timeout      | 10 seconds     |
    /// | idle_timeout      | 300 seconds    |
    /// | outbound_queue    | 64             |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 443)),
            max_clients: 4,
            upgrade_path: "/".to_string(),
            origin_policy: OriginPolicy::Exclude,
            tls: None,
            redirect_url: None,
            handshake_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(300)),
            outbound_queue: 64,
        }
    }
}

impl RelayConfig {
    /// Defaults overlaid with the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults overlaid with TOML `content`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let mut config = Self::default();
        file.apply_to(&mut config);
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::ZeroOutboundQueue);
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::ZeroSendTimeout);
        }
        if !self.upgrade_path.starts_with('/') {
            return Err(ConfigError::InvalidUpgradePath(self.upgrade_path.clone()));
        }
        Ok(())
    }
}

// ── TOML schema ───────────────────────────────────────────────────────────────

/// `origin_policy` as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySetting {
    Exclude,
    Include,
}

impl From<PolicySetting> for OriginPolicy {
    fn from(setting: PolicySetting) -> Self {
        match setting {
            PolicySetting::Exclude => OriginPolicy::Exclude,
            PolicySetting::Include => OriginPolicy::Include,
        }
    }
}

/// On-disk configuration.  Absent keys keep the value from the layer below.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub bind_addr: Option<SocketAddr>,
    pub max_clients: Option<usize>,
    pub upgrade_path: Option<String>,
    pub origin_policy: Option<PolicySetting>,
    pub redirect_url: Option<String>,
    pub handshake_timeout_secs: Option<u64>,
    pub send_timeout_secs: Option<u64>,
    /// `0` disables the idle timeout.
    pub idle_timeout_secs: Option<u64>,
    pub outbound_queue: Option<usize>,
    pub tls: Option<TlsFiles>,
}

impl ConfigFile {
    /// Overwrites every field of `config` that this file sets.
    pub fn apply_to(self, config: &mut RelayConfig) {
        if let Some(v) = self.bind_addr {
            config.bind_addr = v;
        }
        if let Some(v) = self.max_clients {
            config.max_clients = v;
        }
        if let Some(v) = self.upgrade_path {
            config.upgrade_path = v;
        }
        if let Some(v) = self.origin_policy {
            config.origin_policy = v.into();
        }
        if let Some(v) = self.redirect_url {
            config.redirect_url = Some(v);
        }
        if let Some(v) = self.handshake_timeout_secs {
            config.handshake_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.send_timeout_secs {
            config.send_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.idle_timeout_secs {
            config.idle_timeout = idle_timeout_from_secs(v);
        }
        if let Some(v) = self.outbound_queue {
            config.outbound_queue = v;
        }
        if let Some(v) = self.tls {
            config.tls = Some(v);
        }
    }
}

/// Maps a seconds value to an idle timeout, treating `0` as "disabled".
pub fn idle_timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_is_443() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.bind_addr.port(), 443);
    }

    #[test]
    fn test_default_policy_excludes_origin() {
        assert_eq!(RelayConfig::default().origin_policy, OriginPolicy::Exclude);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg = RelayConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, RelayConfig::default());
    }

    #[test]
    fn test_toml_overrides_selected_fields() {
        // Arrange
        let toml = r#"
            bind_addr = "127.0.0.1:8443"
            max_clients = 8
            origin_policy = "include"
            idle_timeout_secs = 0

            [tls]
            cert_path = "cert.pem"
            key_path = "key.pem"
        "#;

        // Act
        let cfg = RelayConfig::from_toml_str(toml).unwrap();

        // Assert
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8443");
        assert_eq!(cfg.max_clients, 8);
        assert_eq!(cfg.origin_policy, OriginPolicy::Include);
        assert_eq!(cfg.idle_timeout, None);
        assert_eq!(
            cfg.tls,
            Some(TlsFiles {
                cert_path: "cert.pem".into(),
                key_path: "key.pem".into()
            })
        );
        // Untouched fields keep their defaults.
        assert_eq!(cfg.upgrade_path, "/");
        assert_eq!(cfg.outbound_queue, 64);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let result = RelayConfig::from_toml_str("max_client = 3");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_tls_table_requires_both_paths() {
        let result = RelayConfig::from_toml_str("[tls]\ncert_path = \"c.pem\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = RelayConfig::from_file(Path::new("/nonexistent/relay.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let cfg = RelayConfig {
            max_clients: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn test_validate_rejects_relative_upgrade_path() {
        let cfg = RelayConfig {
            upgrade_path: "ws".to_string(),
            ..RelayConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidUpgradePath(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_outbound_queue() {
        let cfg = RelayConfig {
            outbound_queue: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroOutboundQueue)));
    }

    #[test]
    fn test_validate_rejects_zero_handshake_timeout() {
        let cfg = RelayConfig::from_toml_str("handshake_timeout_secs = 0").unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroHandshakeTimeout)
        ));
    }

    #[test]
    fn test_validate_rejects_zero_send_timeout() {
        let cfg = RelayConfig {
            send_timeout: Duration::ZERO,
            ..RelayConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroSendTimeout)));
    }

    #[test]
    fn test_idle_timeout_zero_disables() {
        assert_eq!(idle_timeout_from_secs(0), None);
        assert_eq!(idle_timeout_from_secs(5), Some(Duration::from_secs(5)));
    }
}
