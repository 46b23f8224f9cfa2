//! Per-connection lifecycle: request head, routing, upgrade, and session I/O.
//!
//! Each accepted connection (plain TCP or already TLS-wrapped) runs
//! [`run_connection`] in its own Tokio task:
//!
//! 1. Read one HTTP request head and route it with the relay's [`Router`].
//!    Ordinary requests get their page and the connection closes.
//! 2. For a valid upgrade, write `101 Switching Protocols` and wrap the
//!    stream as a WebSocket.
//! 3. Register with the event loop.  If every slot is taken the peer gets a
//!    close frame with code 1008 and nothing else.
//! 4. Spawn a writer task draining the session's [`Outbox`] queue, and read
//!    frames on this task until the peer leaves, goes idle, or the writer
//!    stops.  The writer stops when the session loses its slot or a write
//!    exceeds the send timeout.
//! 5. Report the close so the slot is reclaimed, and abort the writer if it
//!    has not finished within the close grace period.
//!
//! Steps 1 and 2 together must finish within the handshake timeout.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use http::StatusCode;
use relay_core::protocol::pages::error_page;
use relay_core::{
    CloseReason, DeliveryError, Dispatch, Router, SessionTicket, Transport, UpgradeRequest,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::http_io::{
    read_request_head, write_response, write_switching_protocols, HeadError, MAX_HEAD_BYTES,
};
use crate::application::{HandleError, RelayHandle};

/// How long to wait for a close handshake or a final flush.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ── Outbox: the server-side Transport ─────────────────────────────────────────

/// An item queued for a session's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(CloseReason),
}

/// Sending half of a session's bounded outbound queue.
///
/// This is the [`Transport`] the event loop stores in the registry.  It never
/// blocks: a full queue is reported as [`DeliveryError::Backpressure`] and a
/// queue whose writer has gone is [`DeliveryError::Disconnected`].
#[derive(Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Outbound>,
}

/// Creates an outbox holding at most `depth` pending items.
pub fn outbox(depth: usize) -> (Outbox, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(depth);
    (Outbox { tx }, rx)
}

impl Transport for Outbox {
    fn send_text(&mut self, text: &str) -> Result<(), DeliveryError> {
        self.tx
            .try_send(Outbound::Text(text.to_owned()))
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::Backpressure,
                TrySendError::Closed(_) => DeliveryError::Disconnected,
            })
    }

    fn close(&mut self, reason: CloseReason) {
        // If the queue is full the writer still stops once this sender drops.
        let _ = self.tx.try_send(Outbound::Close(reason));
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// Everything a connection task needs, shared by all of them.
pub struct ConnectionContext {
    pub router: Router,
    pub handle: RelayHandle<Outbox>,
    pub handshake_timeout: Duration,
    pub send_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub outbound_queue: usize,
}

/// Runs one connection from its first byte to its last.
///
/// # Errors
///
/// Returns an error for a malformed or timed-out handshake and for I/O
/// failures while answering it.  A session that ends after a successful
/// upgrade is not an error, however it ends.
pub async fn run_connection<S>(
    stream: S,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut stream = BufReader::new(stream);

    let negotiated = timeout(ctx.handshake_timeout, negotiate(&mut stream, &ctx.router, peer))
        .await
        .map_err(|_| anyhow::anyhow!("handshake timed out after {:?}", ctx.handshake_timeout))?;
    let Some(upgrade) = negotiated? else {
        return Ok(());
    };
    debug!("{peer}: upgraded (key {})", upgrade.key());

    let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    run_session(ws, peer, &ctx).await;
    Ok(())
}

/// Reads and routes the request head.  Returns the upgrade to perform, or
/// `None` when a plain HTTP response has already been sent.
async fn negotiate<S>(
    stream: &mut BufReader<S>,
    router: &Router,
    peer: SocketAddr,
) -> anyhow::Result<Option<UpgradeRequest>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match read_request_head(stream, MAX_HEAD_BYTES).await {
        Ok(request) => request,
        Err(e @ (HeadError::TooLarge { .. } | HeadError::Malformed(_))) => {
            let response = error_page(StatusCode::BAD_REQUEST, &e.to_string());
            let _ = write_response(stream, &response).await;
            bail!("bad request from {peer}: {e}");
        }
        Err(e) => return Err(e).context("reading request head"),
    };
    debug!("{peer}: {} {}", request.method(), request.path());

    match router.dispatch(&request) {
        Dispatch::Respond(response) => {
            write_response(stream, &response)
                .await
                .context("writing response")?;
            let _ = stream.shutdown().await;
            Ok(None)
        }
        Dispatch::Reject(e) => {
            info!("{peer}: upgrade rejected: {e}");
            write_response(stream, &e.to_response())
                .await
                .context("writing rejection")?;
            let _ = stream.shutdown().await;
            Ok(None)
        }
        Dispatch::Upgrade(upgrade) => {
            write_switching_protocols(stream, &upgrade)
                .await
                .context("writing 101 response")?;
            Ok(Some(upgrade))
        }
    }
}

/// Registers the upgraded connection and pumps frames until it ends.
async fn run_session<S>(mut ws: WebSocketStream<S>, peer: SocketAddr, ctx: &ConnectionContext)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, outbound) = outbox(ctx.outbound_queue);
    let ticket = match ctx.handle.register(outbox).await {
        Ok(ticket) => ticket,
        Err(HandleError::Registry(e)) => {
            info!("{peer}: {e}; refusing session");
            reject(&mut ws, CloseReason::PolicyViolation).await;
            return;
        }
        Err(HandleError::Stopped) => {
            reject(&mut ws, CloseReason::Normal).await;
            return;
        }
    };
    info!("{peer}: session {} open in slot {}", ticket.id, ticket.slot);

    let (sink, source) = ws.split();
    let mut writer = tokio::spawn(write_outbound(sink, outbound, ctx.send_timeout));

    // A finished writer means the slot is gone or the peer stopped reading.
    let writer_done = tokio::select! {
        () = read_inbound(source, peer, ticket, ctx) => false,
        _ = &mut writer => {
            debug!("{peer}: writer for session {} stopped", ticket.id);
            true
        }
    };

    if ctx.handle.closed(ticket).await.is_err() {
        debug!("{peer}: event loop already stopped");
    }
    // The writer ends once the event loop drops this session's outbox.
    if !writer_done && timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        debug!("{peer}: writer still busy after {CLOSE_GRACE:?}; aborting");
        writer.abort();
    }
    info!("{peer}: session {} closed", ticket.id);
}

async fn read_inbound<S>(
    mut source: futures_util::stream::SplitStream<WebSocketStream<S>>,
    peer: SocketAddr,
    ticket: SessionTicket,
    ctx: &ConnectionContext,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = match ctx.idle_timeout {
            Some(limit) => match timeout(limit, source.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!("{peer}: no frames for {limit:?}; closing");
                    return;
                }
            },
            None => source.next().await,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if ctx.handle.frame(ticket, text).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                warn!("{peer}: ignoring {}-byte binary frame", data.len());
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("{peer}: close frame received: {frame:?}");
                return;
            }
            // Ping/pong replies are handled inside tungstenite.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("{peer}: read error: {e}");
                return;
            }
            None => return,
        }
    }
}

/// Drains the outbox into the socket until it is closed or told to close.
///
/// Every write, the final close frame included, is bounded by
/// `send_timeout`.  A queue that closes without a `Close` item was dropped
/// while full, so the peer is told 1011.
async fn write_outbound<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    send_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = loop {
        match outbound.recv().await {
            Some(Outbound::Text(text)) => {
                match timeout(send_timeout, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("write failed: {e}");
                        return;
                    }
                    Err(_) => {
                        info!("peer stopped reading; write exceeded {send_timeout:?}");
                        return;
                    }
                }
            }
            Some(Outbound::Close(reason)) => break reason,
            None => break CloseReason::Error,
        }
    };
    let close = Message::Close(Some(close_frame(reason)));
    if let Ok(Err(e)) = timeout(send_timeout, sink.send(close)).await {
        debug!("close failed: {e}");
    }
}

/// Sends a close frame on a session that never got a slot, then waits
/// briefly for the peer to acknowledge it.
async fn reject<S>(ws: &mut WebSocketStream<S>, reason: CloseReason)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(CLOSE_GRACE, ws.close(Some(close_frame(reason)))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!("close failed: {e}");
            return;
        }
        Err(_) => return,
    }
    let _ = timeout(CLOSE_GRACE, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}

fn close_frame(reason: CloseReason) -> CloseFrame<'static> {
    let text = match reason {
        CloseReason::Normal => "closing",
        CloseReason::PolicyViolation => "relay is full",
        CloseReason::Error => "delivery failed",
    };
    CloseFrame {
        code: CloseCode::from(reason.code()),
        reason: Cow::Borrowed(text),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
