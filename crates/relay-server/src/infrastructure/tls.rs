//! TLS termination with rustls.
//!
//! Certificates and keys are normally PEM files.  Some devices ship raw DER
//! blobs instead, so a file that contains no PEM block is used as a single
//! DER certificate (or a PKCS#8 DER key) as a fallback.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// Errors raised while building the TLS acceptor.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    bytes
        .windows(b"-----BEGIN".len())
        .any(|w| w == b"-----BEGIN")
}

/// Loads the certificate chain at `path`.
///
/// # Errors
///
/// Returns [`TlsError::NoCertificates`] when the file is empty or its PEM
/// blocks hold no certificate.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let bytes = read_file(path)?;
    if bytes.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    if !looks_like_pem(&bytes) {
        debug!("{}: no PEM markers, using contents as DER", path.display());
        return Ok(vec![CertificateDer::from(bytes)]);
    }

    let certs = rustls_pemfile::certs(&mut BufReader::new(bytes.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Loads the private key at `path` (PKCS#8, PKCS#1, or SEC1 PEM; raw DER is
/// taken to be PKCS#8).
///
/// # Errors
///
/// Returns [`TlsError::NoPrivateKey`] when no key can be found.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let bytes = read_file(path)?;
    if bytes.is_empty() {
        return Err(TlsError::NoPrivateKey(path.to_path_buf()));
    }
    if !looks_like_pem(&bytes) {
        debug!("{}: no PEM markers, using contents as PKCS#8 DER", path.display());
        return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(bytes)));
    }

    rustls_pemfile::private_key(&mut BufReader::new(bytes.as_slice()))
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Builds a server-side TLS acceptor from a certificate chain and key.
///
/// No client authentication is requested, and ALPN advertises `http/1.1`
/// only, since the WebSocket upgrade runs over HTTP/1.1.
///
/// # Errors
///
/// Returns a [`TlsError`] if either file cannot be loaded or rustls rejects
/// the key/certificate pair.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
