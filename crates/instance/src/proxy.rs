// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy bridge for secondary processes.
//!
//! A secondary pipes its standard streams through the primary's socket and
//! otherwise stays out of the way: the bridge is byte-transparent, and the
//! session state lives entirely on the primary's end.

use std::io;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bridge between the caller's standard streams and the rendezvous endpoint.
pub struct ProxyBridge {
    path: PathBuf,
    stream: Option<UnixStream>,
}

impl ProxyBridge {
    pub fn new(path: impl Into<PathBuf>) -> ProxyBridge {
        ProxyBridge { path: path.into(), stream: None }
    }

    /// Open the socket connection if not already open.
    pub async fn connect(&mut self) -> io::Result<()> {
        if self.stream.is_none() {
            self.stream = Some(UnixStream::connect(&self.path).await?);
            debug!(path = %self.path.display(), "proxy connected");
        }
        Ok(())
    }

    /// Bridge standard input/output through the socket until either pump
    /// returns or `cancel` fires.
    pub async fn serve_stdio(&mut self, cancel: CancellationToken) -> io::Result<()> {
        self.connect().await?;
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        bridge(stream, tokio::io::stdin(), tokio::io::stdout(), cancel).await
    }

    /// Drop the connection. A no-op if never connected; safe to call twice.
    pub async fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!("proxy closed");
        }
    }
}

/// Run the two copy pumps. Input EOF half-closes the socket and waits for
/// the primary's remaining output to drain; the primary closing ends the
/// bridge outright. Returning drops both socket halves, which closes the
/// connection and stops any pump still in flight.
pub(crate) async fn bridge<I, O>(
    stream: UnixStream,
    mut input: I,
    mut output: O,
    cancel: CancellationToken,
) -> io::Result<()>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    let (mut read_half, mut write_half) = stream.into_split();

    let outbound = async move {
        let result = tokio::io::copy(&mut input, &mut write_half).await;
        // Propagate EOF so the primary sees the stream end.
        let _ = write_half.shutdown().await;
        result
    };
    let inbound = tokio::io::copy(&mut read_half, &mut output);
    tokio::pin!(outbound, inbound);

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("proxy cancelled");
            Ok(())
        }
        result = &mut outbound => {
            match result {
                Ok(bytes) => debug!(bytes, "input stream ended"),
                Err(e) if cancel.is_cancelled() => {
                    debug!(error = %e, "outbound pump error after cancel");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            // Drain what the primary still has in flight.
            tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                result = &mut inbound => match result {
                    Ok(bytes) => {
                        debug!(bytes, "socket drained");
                        Ok(())
                    }
                    Err(_) if cancel.is_cancelled() => Ok(()),
                    Err(e) => Err(e),
                },
            }
        }
        result = &mut inbound => match result {
            Ok(bytes) => {
                debug!(bytes, "socket closed by primary");
                Ok(())
            }
            Err(e) if cancel.is_cancelled() => {
                debug!(error = %e, "inbound pump error after cancel");
                Ok(())
            }
            Err(e) => Err(e),
        },
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
