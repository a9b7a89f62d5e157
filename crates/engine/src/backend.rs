// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One backend tool-server child process.
//!
//! Backends speak newline-delimited JSON-RPC on their standard streams. A
//! reader task pairs responses to pending requests by id and forwards
//! notifications to the engine; a second task drains stderr so the child can
//! never stall on a full pipe buffer.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assern_core::{
    BackendConfig, Implementation, Notification, Request, RequestId, Response, RpcError, Tool,
    PROTOCOL_VERSION,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Deadline for ordinary backend requests (tool calls included).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for the initialize handshake at backend start.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `shutdown` waits for in-flight requests to unwind before the
/// child is killed.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// A notification emitted by a backend, tagged with its origin.
#[derive(Debug, Clone)]
pub struct BackendNotification {
    pub backend: String,
    pub notification: Notification,
}

/// Errors from backend communication.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend standard streams unavailable")]
    MissingPipes,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("backend exited")]
    Exited,

    #[error("backend stopped")]
    Stopped,

    #[error("initialize handshake failed: {0}")]
    Handshake(String),

    #[error("{0}")]
    Rpc(RpcError),
}

/// A running backend child process.
pub struct Backend {
    name: String,
    config: BackendConfig,
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Arc<Mutex<HashMap<i64, oneshot::Sender<Response>>>>,
    next_id: AtomicI64,
    server_info: Mutex<Option<Implementation>>,
    tools: Mutex<Vec<Tool>>,
    stopped: AtomicBool,
}

impl Backend {
    /// Spawn the child, run the MCP initialize handshake, and fetch its tool
    /// list. The handshake failing kills the child before returning.
    pub async fn spawn(
        name: &str,
        config: BackendConfig,
        notif_tx: mpsc::Sender<BackendNotification>,
    ) -> Result<Arc<Backend>, BackendError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| BackendError::Spawn {
            command: config.command.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(BackendError::MissingPipes)?;
        let stdout = child.stdout.take().ok_or(BackendError::MissingPipes)?;
        let stderr = child.stderr.take().ok_or(BackendError::MissingPipes)?;

        let backend = Arc::new(Backend {
            name: name.to_string(),
            config,
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            server_info: Mutex::new(None),
            tools: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });

        tokio::spawn(read_loop(
            stdout,
            Arc::clone(&backend.pending),
            notif_tx,
            backend.name.clone(),
        ));
        tokio::spawn(drain_stderr(stderr, backend.name.clone()));

        if let Err(e) = backend.handshake().await {
            backend.shutdown().await;
            return Err(e);
        }

        Ok(backend)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Tools as reported by the backend at start, under their original names.
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.lock().clone()
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.server_info.lock().clone()
    }

    /// Issue a request and await its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
        self.request_with_timeout(method, params, REQUEST_TIMEOUT).await
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        limit: Duration,
    ) -> Result<Value, BackendError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BackendError::Stopped);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = Request::new(id, method, params);
        if let Err(e) = self.write_frame(&request).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match timeout(limit, rx).await {
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(BackendError::Timeout);
            }
            // Sender dropped: the reader task exited, i.e. the child is gone.
            Ok(Err(_)) => return Err(BackendError::Exited),
            Ok(Ok(response)) => response,
        };

        match response.error {
            Some(error) => Err(BackendError::Rpc(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BackendError> {
        let note = Notification::new(method, params);
        self.write_frame(&note).await
    }

    async fn write_frame<T: serde::Serialize>(&self, frame: &T) -> Result<(), BackendError> {
        let mut buf = serde_json::to_vec(frame)?;
        buf.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&buf).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn handshake(&self) -> Result<(), BackendError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "assern",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self
            .request_with_timeout("initialize", Some(params), INIT_TIMEOUT)
            .await
            .map_err(|e| BackendError::Handshake(e.to_string()))?;

        if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
            if version != PROTOCOL_VERSION {
                warn!(backend = %self.name, version, "backend speaks a different protocol revision");
            }
        }
        if let Some(info) = result.get("serverInfo") {
            if let Ok(info) = serde_json::from_value::<Implementation>(info.clone()) {
                info!(backend = %self.name, server = %info.name, version = %info.version, "backend initialized");
                *self.server_info.lock() = Some(info);
            }
        }

        self.notify("notifications/initialized", None).await?;

        // A backend without the tools capability simply contributes nothing
        // to the catalog.
        match self.request_with_timeout("tools/list", None, INIT_TIMEOUT).await {
            Ok(result) => {
                let tools = result
                    .get("tools")
                    .cloned()
                    .map(serde_json::from_value::<Vec<Tool>>)
                    .transpose()?
                    .unwrap_or_default();
                debug!(backend = %self.name, tools = tools.len(), "fetched tool list");
                *self.tools.lock() = tools;
            }
            Err(BackendError::Rpc(e)) => {
                debug!(backend = %self.name, error = %e, "backend does not list tools");
            }
            Err(e) => return Err(BackendError::Handshake(e.to_string())),
        }

        Ok(())
    }

    /// Stop the child. Waits briefly for in-flight requests to unwind, then
    /// kills the process. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        while !self.pending.lock().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(backend = %self.name, error = %e, "kill failed");
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("command", &self.config.command)
            .finish()
    }
}

/// Route frames from the child's stdout: responses to their waiting callers,
/// notifications to the engine fan-out. Non-JSON lines are startup noise and
/// are skipped.
async fn read_loop(
    stdout: ChildStdout,
    pending: Arc<Mutex<HashMap<i64, oneshot::Sender<Response>>>>,
    notif_tx: mpsc::Sender<BackendNotification>,
    name: String,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(backend = %name, error = %e, "stdout read failed");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => {
                debug!(backend = %name, "skipping non-JSON line from backend");
                continue;
            }
        };

        if value.get("method").is_some() {
            if value.get("id").is_some() {
                // Backend-initiated requests (sampling, roots) are not
                // aggregated; there is no client to route them to.
                debug!(backend = %name, "ignoring backend-initiated request");
                continue;
            }
            if let Ok(notification) = serde_json::from_value::<Notification>(value) {
                let note = BackendNotification { backend: name.clone(), notification };
                if notif_tx.send(note).await.is_err() {
                    break;
                }
            }
            continue;
        }

        let response: Response = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(e) => {
                debug!(backend = %name, error = %e, "unparseable frame from backend");
                continue;
            }
        };
        let id = match response.id {
            Some(RequestId::Number(id)) => id,
            _ => {
                debug!(backend = %name, "response with unknown id shape");
                continue;
            }
        };
        if let Some(tx) = pending.lock().remove(&id) {
            let _ = tx.send(response);
        } else {
            debug!(backend = %name, id, "response for no pending request");
        }
    }

    // Child is gone: wake every waiting caller with a closed channel.
    pending.lock().clear();
    debug!(backend = %name, "reader loop ended");
}

/// Keep the child's stderr drained, logging each line at debug level.
async fn drain_stderr(stderr: ChildStderr, name: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim_end();
        if !trimmed.is_empty() {
            debug!(backend = %name, "stderr: {trimmed}");
        }
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
pub(crate) mod tests;
