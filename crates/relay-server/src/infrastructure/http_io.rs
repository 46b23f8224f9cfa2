//! Minimal HTTP/1.1 wire handling for the pre-upgrade phase.
//!
//! The relay only ever needs one request per connection: either it answers
//! with a small page and closes, or it switches the connection to WebSocket.
//! That is why this module reads exactly one request head, never a body, and
//! every response carries `Connection: close`.
//!
//! The head is read through an [`AsyncBufRead`] and only the bytes up to and
//! including the blank line are consumed, so anything the client pipelines
//! after an upgrade request stays buffered for the WebSocket layer.

use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH};
use http::{Method, StatusCode};
use relay_core::{Request, Response, UpgradeRequest};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

/// Upper bound on the size of a request head.
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Upper bound on the number of request headers.
const MAX_HEADERS: usize = 64;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Errors raised while reading a request head.
#[derive(Debug, Error)]
pub enum HeadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed before the request head was complete")]
    ConnectionClosed,

    #[error("request head exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("malformed request head: {0}")]
    Malformed(String),
}

impl From<httparse::Error> for HeadError {
    fn from(e: httparse::Error) -> Self {
        HeadError::Malformed(e.to_string())
    }
}

/// Reads one request head (request line plus headers) from `reader`.
///
/// # Errors
///
/// Returns [`HeadError::TooLarge`] when no blank line appears within
/// `limit` bytes, [`HeadError::ConnectionClosed`] on early EOF, and
/// [`HeadError::Malformed`] when the bytes are not a valid HTTP/1.x head.
pub async fn read_request_head<R>(reader: &mut R, limit: usize) -> Result<Request, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head: Vec<u8> = Vec::with_capacity(1024);

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Err(HeadError::ConnectionClosed);
        }
        let chunk_len = available.len();
        let previous = head.len();
        head.extend_from_slice(available);

        // The terminator may straddle two reads.
        let search_from = previous.saturating_sub(HEAD_TERMINATOR.len() - 1);
        if let Some(pos) = find(&head[search_from..], HEAD_TERMINATOR) {
            let end = search_from + pos + HEAD_TERMINATOR.len();
            reader.consume(end - previous);
            head.truncate(end);
            break;
        }

        reader.consume(chunk_len);
        if head.len() > limit {
            return Err(HeadError::TooLarge { limit });
        }
    }

    if head.len() > limit {
        return Err(HeadError::TooLarge { limit });
    }
    parse_head(&head)
}

/// Parses a complete request head.
pub fn parse_head(bytes: &[u8]) -> Result<Request, HeadError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);

    if parsed.parse(bytes)?.is_partial() {
        return Err(HeadError::Malformed("incomplete head".to_string()));
    }

    let method = parsed
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or_else(|| HeadError::Malformed("invalid method".to_string()))?;
    let target = parsed
        .path
        .ok_or_else(|| HeadError::Malformed("missing request target".to_string()))?;

    let mut request = Request::new(method, target);
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HeadError::Malformed(format!("invalid header name {:?}", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HeadError::Malformed(format!("invalid value for {name}")))?;
        request.headers_mut().append(name, value);
    }
    Ok(request)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Serializes `response` with `Content-Length` and `Connection: close`.
///
/// `1xx` and `204` responses carry no `Content-Length` (RFC 9110, 8.6).
pub async fn write_response<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let status = response.status();
    let mut out = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .into_bytes();

    for (name, value) in response.headers() {
        if name == CONTENT_LENGTH || name == CONNECTION {
            continue;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !(status.is_informational() || status == StatusCode::NO_CONTENT) {
        out.extend_from_slice(format!("content-length: {}\r\n", response.body().len()).as_bytes());
    }
    out.extend_from_slice(b"connection: close\r\n\r\n");
    out.extend_from_slice(response.body().as_bytes());

    writer.write_all(&out).await?;
    writer.flush().await
}

/// Writes the `101 Switching Protocols` response for an accepted upgrade.
pub async fn write_switching_protocols<W>(
    writer: &mut W,
    upgrade: &UpgradeRequest,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let accept = derive_accept_key(upgrade.key().as_bytes());
    let out = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         upgrade: websocket\r\n\
         connection: Upgrade\r\n\
         sec-websocket-accept: {accept}\r\n\r\n"
    );
    writer.write_all(out.as_bytes()).await?;
    writer.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
