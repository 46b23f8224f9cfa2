//! Listener, accept loop, and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Building the TLS acceptor (or warning that the relay runs in plain mode).
//! 3. Spawning the [`EventLoop`] task that owns the client registry.
//! 4. Accepting connections and running each one in its own Tokio task.
//! 5. Shutting down when the `running` flag is cleared: the accept loop
//!    stops and every open session receives a normal close frame.
//!
//! # Scalability
//!
//! The accept loop never blocks on a client.  TLS handshakes, request heads,
//! and WebSocket frames are all handled inside the spawned per-connection
//! tasks; only the short registry operations run on the event loop task.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use relay_core::{RootPage, Router};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use super::connection::{run_connection, ConnectionContext, Outbox};
use super::tls::load_tls_acceptor;
use crate::application::{EventLoop, MessageHandler, RelayHandle};
use crate::domain::config::RelayConfig;

/// How often the accept loop re-checks the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// A bound relay that has not started accepting yet.
pub struct RelayServer<H> {
    listener: TcpListener,
    config: RelayConfig,
    tls: Option<TlsAcceptor>,
    event_loop: EventLoop<Outbox, H>,
    handle: RelayHandle<Outbox>,
}

impl<H> RelayServer<H>
where
    H: MessageHandler<Outbox> + 'static,
{
    /// Binds `config.bind_addr` and loads TLS material.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the certificate or
    /// key cannot be loaded.  Both are fatal at startup.
    pub async fn bind(config: RelayConfig, handler: H) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind relay listener on {}", config.bind_addr))?;
        Self::from_listener(listener, config, handler)
    }

    /// Wraps an already bound listener.  The config's `bind_addr` is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS material cannot be loaded.
    pub fn from_listener(
        listener: TcpListener,
        config: RelayConfig,
        handler: H,
    ) -> anyhow::Result<Self> {
        let tls = match &config.tls {
            Some(files) => Some(
                load_tls_acceptor(&files.cert_path, &files.key_path).with_context(|| {
                    format!(
                        "failed to load TLS material ({}, {})",
                        files.cert_path.display(),
                        files.key_path.display()
                    )
                })?,
            ),
            None => None,
        };

        let (event_loop, handle) =
            EventLoop::new(config.max_clients, config.origin_policy, handler);

        Ok(Self {
            listener,
            config,
            tls,
            event_loop,
            handle,
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle onto the event loop, e.g. for inspecting occupancy.
    pub fn handle(&self) -> RelayHandle<Outbox> {
        self.handle.clone()
    }

    /// Accepts connections until `running` is set to `false`, then closes
    /// every session and waits for the event loop to finish.
    pub async fn run(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        let Self {
            listener,
            config,
            tls,
            event_loop,
            handle,
        } = self;

        let local = listener.local_addr().context("listener has no local address")?;
        match tls {
            Some(_) => info!("relay listening on wss://{local}{}", config.upgrade_path),
            None => warn!(
                "relay listening on ws://{local}{} WITHOUT TLS; configure a certificate for production",
                config.upgrade_path
            ),
        }
        info!(
            "capacity {} client(s), origin policy {:?}",
            config.max_clients, config.origin_policy
        );

        let loop_task = tokio::spawn(event_loop.run());

        let ctx = Arc::new(ConnectionContext {
            router: Router::standard(
                &config.upgrade_path,
                RootPage::new(config.redirect_url.clone()),
            ),
            handle: handle.clone(),
            handshake_timeout: config.handshake_timeout,
            send_timeout: config.send_timeout,
            idle_timeout: config.idle_timeout,
            outbound_queue: config.outbound_queue,
        });

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // Short timeout so the loop can notice the flag while idle.
            match timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    debug!("accepted connection from {peer}");
                    let tls = tls.clone();
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, tls, ctx).await;
                    });
                }
                Ok(Err(e)) => {
                    // Transient (e.g. out of file descriptors); keep serving.
                    error!("accept error: {e}");
                }
                Err(_) => {}
            }
        }

        if handle.shutdown().await.is_err() {
            debug!("event loop already stopped");
        }
        loop_task.await.context("event loop task panicked")?;
        info!("relay stopped");
        Ok(())
    }
}

/// Binds, then serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if startup fails (see [`RelayServer::bind`]).
pub async fn run_server<H>(
    config: RelayConfig,
    handler: H,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()>
where
    H: MessageHandler<Outbox> + 'static,
{
    RelayServer::bind(config, handler).await?.run(running).await
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Top-level task for one accepted socket: optional TLS, then
/// [`run_connection`], with the outcome logged here.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    ctx: Arc<ConnectionContext>,
) {
    let result = match tls {
        Some(acceptor) => match timeout(ctx.handshake_timeout, acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => run_connection(tls_stream, peer, ctx).await,
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("TLS handshake failed")),
            Err(_) => Err(anyhow::anyhow!("TLS handshake timed out")),
        },
        None => run_connection(stream, peer, ctx).await,
    };

    match result {
        Ok(()) => debug!("connection {peer} finished"),
        Err(e) => warn!("connection {peer} closed with error: {e:#}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
