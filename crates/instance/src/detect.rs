// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Primary detection.
//!
//! Probes the rendezvous endpoint and decides whether a live primary is
//! serving. Absence and staleness are never failures: every outcome short of
//! a live, answering primary is "no primary", and a stale endpoint file is
//! cleaned up on the way.

use std::path::Path;
use std::time::Duration;

use assern_core::Request;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use crate::env;
use crate::protocol::{self, wire, ProtocolError};
use crate::protocol::types::PrimaryInfo;

/// Deadline covering the connect attempt and the ping exchange.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Detect a running primary on `socket_path`.
///
/// Returns `None` when detection is disabled via [`env::NO_INSTANCE_SHARING`],
/// when no endpoint file exists, or when the file turns out to be stale (in
/// which case it is unlinked, best-effort).
pub async fn detect_running(socket_path: &Path) -> Option<PrimaryInfo> {
    if env::instance_sharing_disabled() {
        debug!("instance sharing disabled; skipping detection");
        return None;
    }

    if !socket_path.exists() {
        return None;
    }

    let stream = match timeout(PROBE_TIMEOUT, UnixStream::connect(socket_path)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(path = %socket_path.display(), error = %e, "stale endpoint: connect failed");
            cleanup_stale(socket_path);
            return None;
        }
        Err(_) => {
            debug!(path = %socket_path.display(), "stale endpoint: connect timed out");
            cleanup_stale(socket_path);
            return None;
        }
    };

    match probe(stream).await {
        Ok(info) => {
            debug!(pid = info.pid, "primary detected");
            Some(info)
        }
        Err(e) => {
            debug!(path = %socket_path.display(), error = %e, "endpoint did not answer ping");
            cleanup_stale(socket_path);
            None
        }
    }
}

/// One ping exchange against an open connection.
async fn probe(stream: UnixStream) -> Result<PrimaryInfo, ProtocolError> {
    let (read_half, mut write_half) = stream.into_split();

    let ping = Request::new(1, protocol::METHOD_PING, None);
    wire::write_message(&mut write_half, &ping).await?;

    let mut reader = BufReader::new(read_half);
    let value = wire::read_message(&mut reader, PROBE_TIMEOUT).await?;
    let result = value
        .get("result")
        .cloned()
        .unwrap_or(Value::Null);
    Ok(serde_json::from_value(result)?)
}

fn cleanup_stale(socket_path: &Path) {
    if let Err(e) = std::fs::remove_file(socket_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %socket_path.display(), error = %e, "could not remove stale endpoint");
        }
    }
}

#[cfg(test)]
#[path = "detect_tests.rs"]
mod tests;
