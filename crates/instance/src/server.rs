// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server for the primary.
//!
//! Accepts an unbounded stream of local connections. A connection's first
//! line decides its fate: an `assern/*` control request gets one response and
//! the connection closes; anything else — including silence — becomes a full
//! MCP session over the shared engine. Bytes consumed while arbitrating are
//! chained back in front of the stream, so the session sees the byte stream
//! verbatim from its first message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assern_core::{Request, Response, RpcError};
use assern_engine::{Engine, Session};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::paths;
use crate::protocol::types::PrimaryInfo;
use crate::protocol::{self, wire};
use crate::serve::ServeError;

/// Grace period for the first line before a connection is assumed to be an
/// MCP client.
const ARBITRATION_WINDOW: Duration = Duration::from_millis(100);

/// Shared context for every connection worker.
pub struct ServeCtx {
    pub engine: Arc<Engine>,
    pub info: PrimaryInfo,
    /// Open socket connections; entries are removed exactly once when the
    /// worker returns. Held only across insert/remove, never across I/O.
    pub clients: Mutex<HashMap<u64, ()>>,
    pub shutdown: CancellationToken,
}

impl ServeCtx {
    pub fn new(engine: Arc<Engine>, info: PrimaryInfo, shutdown: CancellationToken) -> ServeCtx {
        ServeCtx { engine, info, clients: Mutex::new(HashMap::new()), shutdown }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

/// Accept loop over the rendezvous endpoint.
pub struct InstanceServer {
    listener: UnixListener,
    ctx: Arc<ServeCtx>,
}

impl InstanceServer {
    /// Bind the endpoint and prepare the accept loop.
    ///
    /// `clean_stale` is false when detection was bypassed: a live primary's
    /// socket must not be stolen, so the bind collides instead.
    pub fn bind(
        path: &std::path::Path,
        ctx: Arc<ServeCtx>,
        clean_stale: bool,
    ) -> Result<InstanceServer, ServeError> {
        let listener = paths::bind_endpoint(path, clean_stale)?;
        info!(path = %path.display(), "listening on rendezvous endpoint");
        Ok(InstanceServer { listener, ctx })
    }

    /// Run until shutdown, spawning one worker per connection.
    pub async fn run(self) {
        static CONN_SEQ: AtomicU64 = AtomicU64::new(0);

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                result = self.listener.accept() => {
                    let stream = match result {
                        Ok((stream, _)) => stream,
                        Err(_) if self.ctx.shutdown.is_cancelled() => break,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let conn_id = CONN_SEQ.fetch_add(1, Ordering::Relaxed);
                    let ctx = Arc::clone(&self.ctx);
                    ctx.clients.lock().insert(conn_id, ());
                    tokio::spawn(async move {
                        handle_connection(stream, &ctx).await;
                        ctx.clients.lock().remove(&conn_id);
                    });
                }
            }
        }
        debug!("accept loop stopped");
    }
}

/// What the first line turned out to be.
enum FirstLine {
    /// A complete control request: answer and close.
    Control(Request),
    /// Anything else; the consumed bytes must be replayed to the session.
    Passthrough(Vec<u8>),
    /// The peer connected and closed without sending a byte.
    Drop,
}

async fn handle_connection(mut stream: UnixStream, ctx: &Arc<ServeCtx>) {
    match read_first_line(&mut stream).await {
        Err(e) => debug!(error = %e, "connection lost during arbitration"),
        Ok(FirstLine::Drop) => debug!("connection closed before first byte"),
        Ok(FirstLine::Control(request)) => handle_control(stream, request, ctx).await,
        Ok(FirstLine::Passthrough(consumed)) => {
            let (read_half, write_half) = stream.into_split();
            // No byte consumed during arbitration may be lost: replay the
            // buffer, then continue from the raw connection.
            let reader = std::io::Cursor::new(consumed).chain(read_half);
            let session = Session::connect();
            run_mcp_session(reader, write_half, session, ctx).await;
        }
    }
}

/// First-message policy: read for up to [`ARBITRATION_WINDOW`] looking for a
/// complete line that parses as a control request. Everything consumed is
/// preserved for the passthrough case.
async fn read_first_line(stream: &mut UnixStream) -> Result<FirstLine, std::io::Error> {
    let mut buf: Vec<u8> = Vec::new();
    let deadline = tokio::time::Instant::now() + ARBITRATION_WINDOW;

    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            if let Ok(request) = serde_json::from_slice::<Request>(&buf[..pos]) {
                if request.id.is_some() && protocol::is_control_method(&request.method) {
                    return Ok(FirstLine::Control(request));
                }
            }
            return Ok(FirstLine::Passthrough(buf));
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(FirstLine::Passthrough(buf));
        }

        let mut chunk = [0u8; 1024];
        match tokio::time::timeout(deadline - now, stream.read(&mut chunk)).await {
            // Deadline reached: partial bytes (or none) go to the session.
            Err(_) => return Ok(FirstLine::Passthrough(buf)),
            Ok(Ok(0)) => {
                return if buf.is_empty() {
                    Ok(FirstLine::Drop)
                } else {
                    Ok(FirstLine::Passthrough(buf))
                };
            }
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(e),
        }
    }
}

/// Serve one control request and close the connection.
async fn handle_control(mut stream: UnixStream, request: Request, ctx: &Arc<ServeCtx>) {
    let Some(id) = request.id else { return };
    debug!(method = %request.method, "control request");

    let response = match request.method.as_str() {
        protocol::METHOD_PING | protocol::METHOD_INFO => success(id, &ctx.info),
        protocol::METHOD_RELOAD => {
            let result = ctx.engine.reload().await;
            success(id, &result)
        }
        other => Response::error(Some(id), RpcError::method_not_found(other)),
    };

    if let Err(e) = wire::write_message(&mut stream, &response).await {
        debug!(error = %e, "control response write failed");
    }
}

fn success<T: serde::Serialize>(id: assern_core::RequestId, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::error(Some(id), RpcError::internal(e.to_string())),
    }
}

/// Run one MCP session over an arbitrary framed stream.
///
/// Shared by socket workers and the primary's own stdio: register the
/// session, pump its notification queue to the writer, and feed every
/// incoming line to the engine until the peer goes away or the server stops.
pub(crate) async fn run_mcp_session<R, W>(
    reader: R,
    writer: W,
    session: Arc<Session>,
    ctx: &Arc<ServeCtx>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    debug!(session = %session.session_id(), "session started");
    ctx.engine.register_session(Arc::clone(&session));

    // Both the read loop and the notification pump write frames; the mutex
    // keeps each write atomic.
    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    let pump_cancel = ctx.shutdown.child_token();
    let pump = spawn_notification_pump(&session, Arc::clone(&writer), pump_cancel.clone());

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => {
                        debug!(session = %session.session_id(), "client disconnected");
                        break;
                    }
                    Ok(_) => {
                        let raw = line.trim();
                        if raw.is_empty() {
                            continue;
                        }
                        if let Some(response) = ctx.engine.handle_message(&session, raw).await {
                            let mut writer = writer.lock().await;
                            if let Err(e) = wire::write_message(&mut *writer, &response).await {
                                debug!(session = %session.session_id(), error = %e, "response write failed");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        if !ctx.shutdown.is_cancelled() {
                            debug!(session = %session.session_id(), error = %e, "session read failed");
                        }
                        break;
                    }
                }
            }
        }
    }

    pump_cancel.cancel();
    let _ = pump.await;
    ctx.engine.unregister_session(session.session_id());
    session.close();
    debug!(session = %session.session_id(), "session ended");
}

fn spawn_notification_pump<W>(
    session: &Arc<Session>,
    writer: Arc<tokio::sync::Mutex<W>>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Some(mut rx) = session.take_notification_receiver() else {
        return tokio::spawn(async {});
    };
    let session_id = session.session_id().to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = rx.recv() => {
                    let Some(notification) = item else { break };
                    let mut writer = writer.lock().await;
                    if let Err(e) = wire::write_message(&mut *writer, &notification).await {
                        debug!(session = %session_id, error = %e, "notification write failed");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
