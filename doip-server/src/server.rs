//! TCP listeners and per-connection supervision for both framings.
//!
//! The strict listener keeps a connection open and serializes pipelined
//! requests; the compat listener is one-shot. Both share the dispatcher,
//! the registry and the blob-store handle through [`AppState`]. A
//! connection never reads the next request before the previous response
//! has been flushed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use doip_wire::consts::HEADER_SIZE;
use doip_wire::{Header, Message, WireError};

use crate::compat;
use crate::dispatch;
use crate::error::DoipError;
use crate::state::AppState;
use crate::tls;

#[derive(Debug, Clone, Copy)]
enum ListenerKind {
    Strict,
    Compat,
}

/// Bind both listeners on the configured ports and serve until shutdown.
pub async fn run(state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<()> {
    let port = state.config.port;
    let compat_port = port
        .checked_add(1)
        .ok_or_else(|| anyhow::anyhow!("strict port leaves no room for the compat listener"))?;
    let strict = TcpListener::bind(("0.0.0.0", port)).await?;
    let compat = TcpListener::bind(("0.0.0.0", compat_port)).await?;
    serve_listeners(state, strict, compat, shutdown_rx).await
}

/// Accept loop over pre-bound listeners; split out so tests can bind
/// ephemeral ports.
pub async fn serve_listeners(
    state: Arc<AppState>,
    strict: TcpListener,
    compat: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let acceptor = tls::maybe_acceptor()?;
    let strict_addr = strict.local_addr()?;
    let compat_addr = compat.local_addr()?;
    if acceptor.is_some() {
        info!(strict = %strict_addr, compat = %compat_addr, "DOIP server listening with TLS");
    } else {
        info!(strict = %strict_addr, compat = %compat_addr, "DOIP server listening (plaintext)");
    }

    // Track connection tasks so shutdown can wait for in-flight requests.
    let mut connection_handles: Vec<JoinHandle<()>> = Vec::new();
    let mut accepts_since_cleanup: u32 = 0;
    loop {
        tokio::select! {
            result = strict.accept() => {
                connection_handles.extend(
                    accept_connection(result, &state, &acceptor, ListenerKind::Strict),
                );
            }
            result = compat.accept() => {
                connection_handles.extend(
                    accept_connection(result, &state, &acceptor, ListenerKind::Compat),
                );
            }
            _ = shutdown_rx.changed() => {
                info!("DOIP server shutting down");
                break;
            }
        }

        // Reap finished handles every 64 accepts to avoid unbounded growth.
        accepts_since_cleanup += 1;
        if accepts_since_cleanup >= 64 {
            connection_handles.retain(|handle| !handle.is_finished());
            accepts_since_cleanup = 0;
        }
    }

    drain_connections(connection_handles).await;
    Ok(())
}

/// Wait for active connection tasks to finish (with a timeout).
async fn drain_connections(handles: Vec<JoinHandle<()>>) {
    let handles: Vec<_> = handles.into_iter().filter(|h| !h.is_finished()).collect();
    if handles.is_empty() {
        return;
    }
    debug!(count = handles.len(), "waiting for active connections to finish");
    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        for handle in handles {
            let _ = handle.await;
        }
    })
    .await;
}

fn accept_connection(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<AppState>,
    acceptor: &Option<TlsAcceptor>,
    kind: ListenerKind,
) -> Option<JoinHandle<()>> {
    let (stream, peer) = match result {
        Ok(accepted) => accepted,
        Err(err) => {
            warn!(error = %err, "failed to accept connection");
            return None;
        }
    };
    debug!(peer = %peer, kind = ?kind, "new connection");

    let state = Arc::clone(state);
    let acceptor = acceptor.clone();
    Some(tokio::spawn(async move {
        if let Some(acceptor) = acceptor {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => serve_connection(kind, &state, tls_stream, peer).await,
                Err(err) => debug!(peer = %peer, error = %err, "TLS handshake failed"),
            }
        } else {
            serve_connection(kind, &state, stream, peer).await;
        }
    }))
}

async fn serve_connection<S>(kind: ListenerKind, state: &AppState, stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = match kind {
        ListenerKind::Strict => strict_connection(state, stream, peer).await,
        ListenerKind::Compat => compat_connection(state, stream, peer).await,
    };
    match result {
        Ok(()) => info!(peer = %peer, "connection closed"),
        Err(err) => debug!(peer = %peer, error = %err, "connection error"),
    }
}

/// Strict listener: read envelope, dispatch, write response, repeat.
///
/// A framing violation is answered with a MalformedFrame envelope (empty
/// object id) and tears the connection down; operation failures keep it
/// open. EOF between messages is a clean close.
async fn strict_connection<S>(
    state: &AppState,
    mut stream: S,
    peer: SocketAddr,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = match read_message(&mut stream).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(ReadError::Frame(err)) => {
                warn!(peer = %peer, error = %err, "malformed frame");
                let doip_err = DoipError::from(err);
                let envelope = dispatch::error_envelope(0, "", &doip_err);
                let _ = write_message(&mut stream, &envelope).await;
                break;
            }
            Err(ReadError::Io(err)) => return Err(err),
        };

        let response = match dispatch::dispatch(&msg, state).await {
            Ok(response) => response,
            Err(err) => {
                warn!(peer = %peer, kind = err.kind(), error = %err, "operation failed");
                dispatch::error_envelope(msg.op_code, &msg.object_id, &err)
            }
        };
        write_message(&mut stream, &response).await?;
    }
    Ok(())
}

/// Compat listener: one request, one framed response, close.
async fn compat_connection<S>(
    state: &AppState,
    mut stream: S,
    peer: SocketAddr,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let segments = match compat::read_segments(&mut stream).await {
        Ok(segments) => segments,
        Err(err) => {
            warn!(peer = %peer, error = %err, "compat read failed");
            return Ok(());
        }
    };
    let Some(first) = segments.first() else {
        return Ok(());
    };
    let request = match serde_json::from_slice::<Value>(first) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!(peer = %peer, "compat segment 0 is not a JSON object");
            return Ok(());
        }
        Err(err) => {
            warn!(peer = %peer, error = %err, "compat segment 0 is not valid JSON");
            return Ok(());
        }
    };
    let response_segments = compat::process_request(&request, state).await;
    compat::write_segments(&mut stream, &response_segments).await
}

enum ReadError {
    Io(std::io::Error),
    Frame(WireError),
}

/// Read one complete envelope.
///
/// `Ok(None)` is a clean EOF before the first header byte; truncation
/// anywhere after that is a framing error.
async fn read_message<S>(stream: &mut S) -> Result<Option<Message>, ReadError>
where
    S: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; HEADER_SIZE];
    let n = stream
        .read(&mut header_bytes[..1])
        .await
        .map_err(ReadError::Io)?;
    if n == 0 {
        return Ok(None);
    }
    read_exact_or_frame(stream, &mut header_bytes[1..]).await?;
    let header = Header::decode(&header_bytes).map_err(ReadError::Frame)?;

    let mut object_id = vec![0u8; header.object_id_len as usize];
    read_exact_or_frame(stream, &mut object_id).await?;
    let mut payload = vec![0u8; header.payload_len as usize];
    read_exact_or_frame(stream, &mut payload).await?;

    Message::decode_parts(&header, &object_id, &payload)
        .map(Some)
        .map_err(ReadError::Frame)
}

async fn read_exact_or_frame<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), ReadError>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ReadError::Frame(WireError::TruncatedEnvelope))
        }
        Err(err) => Err(ReadError::Io(err)),
    }
}

async fn write_message<S>(stream: &mut S, msg: &Message) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bytes = msg
        .to_bytes()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;
    stream.write_all(&bytes).await?;
    stream.flush().await
}
