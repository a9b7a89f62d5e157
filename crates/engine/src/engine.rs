// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The aggregator engine.
//!
//! Shared by every session: the backend set, the merged catalog, and the
//! notification fan-out. Message handling is per-session and thread-safe;
//! sessions only ever see their own state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use assern_core::{
    rpc, BackendConfig, ClientCapabilities, Config, ConfigSource, Implementation, LogLevel,
    Notification, Request, Response, RpcError, ToolSummary, PROTOCOL_VERSION,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError, BackendNotification};
use crate::catalog::Catalog;
use crate::reload::{self, ReloadResult};
use crate::session::Session;

/// Buffer between backend reader tasks and the fan-out loop.
const FANOUT_BUFFER: usize = 256;

type SessionMap = Arc<Mutex<HashMap<String, Arc<Session>>>>;

/// The shared aggregator engine.
pub struct Engine {
    project: Option<String>,
    source: ConfigSource,
    backends: RwLock<HashMap<String, Arc<Backend>>>,
    catalog: ArcSwap<Catalog>,
    sessions: SessionMap,
    notif_tx: mpsc::Sender<BackendNotification>,
    /// Serializes reloads: an overlapping request queues behind the running
    /// one and then operates on the post-reload state.
    reload_lock: tokio::sync::Mutex<()>,
}

impl Engine {
    /// Start every configured backend and build the initial catalog.
    ///
    /// Individual backend failures are logged and skipped; an aggregator
    /// with zero live backends still serves an empty catalog.
    pub async fn start(config: Config, source: ConfigSource) -> Arc<Engine> {
        let (notif_tx, notif_rx) = mpsc::channel(FANOUT_BUFFER);
        let sessions: SessionMap = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(fan_out(Arc::clone(&sessions), notif_rx));

        let mut backends = HashMap::new();
        for (name, backend_config) in &config.backends {
            match Backend::spawn(name, backend_config.clone(), notif_tx.clone()).await {
                Ok(backend) => {
                    backends.insert(name.clone(), backend);
                }
                Err(e) => {
                    warn!(backend = %name, error = %e, "backend failed to start");
                }
            }
        }

        let engine = Arc::new(Engine {
            project: config.project,
            source,
            backends: RwLock::new(backends),
            catalog: ArcSwap::from_pointee(Catalog::default()),
            sessions,
            notif_tx,
            reload_lock: tokio::sync::Mutex::new(()),
        });
        engine.publish_catalog();
        engine
    }

    /// Register a session for notification routing.
    pub fn register_session(&self, session: Arc<Session>) {
        let id = session.session_id().to_string();
        debug!(session = %id, "session registered");
        self.sessions.lock().insert(id, session);
    }

    /// Remove a session. Idempotent.
    pub fn unregister_session(&self, session_id: &str) {
        if self.sessions.lock().remove(session_id).is_some() {
            debug!(session = %session_id, "session unregistered");
        }
    }

    /// Names of the live backends, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Aggregate name reported to clients.
    pub fn project_name(&self) -> String {
        self.project.clone().unwrap_or_else(|| "assern".to_string())
    }

    /// Catalog summaries for startup logging.
    pub fn list_tools(&self) -> Vec<ToolSummary> {
        self.catalog.load().summaries()
    }

    /// Handle one raw frame in the context of `session`.
    ///
    /// Returns the serialized response for requests, `None` for
    /// notifications and client-originated responses. Malformed JSON yields
    /// the standard parse-error reply so the connection can continue.
    pub async fn handle_message(&self, session: &Arc<Session>, raw: &str) -> Option<Value> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => return Some(encode(Response::parse_error(e.to_string()))),
        };

        let request: Request = match serde_json::from_value(value.clone()) {
            Ok(request) => request,
            Err(_) => {
                // A response frame from the client; nothing is pending on it.
                if value.get("result").is_some() || value.get("error").is_some() {
                    return None;
                }
                let id = value.get("id").and_then(|id| serde_json::from_value(id.clone()).ok());
                return Some(encode(Response::error(
                    id,
                    RpcError::invalid_request("not a JSON-RPC request"),
                )));
            }
        };

        let Some(id) = request.id.clone() else {
            self.handle_notification(session, &request);
            return None;
        };

        debug!(session = %session.session_id(), method = %request.method, "request");

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(session, request.params),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => self.handle_tools_call(request.params).await,
            "logging/setLevel" => self.handle_set_level(session, request.params),
            other => Err(RpcError::method_not_found(other)),
        };

        Some(encode(match result {
            Ok(value) => Response::success(id, value),
            Err(error) => Response::error(Some(id), error),
        }))
    }

    fn handle_notification(&self, session: &Arc<Session>, request: &Request) {
        match request.method.as_str() {
            "notifications/initialized" => {
                debug!(session = %session.session_id(), "client finished initialize");
            }
            other => {
                debug!(session = %session.session_id(), method = %other, "ignoring notification");
            }
        }
    }

    fn handle_initialize(
        &self,
        session: &Arc<Session>,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        session.initialize();

        if let Some(params) = &params {
            if let Some(info) = params.get("clientInfo") {
                if let Ok(info) = serde_json::from_value::<Implementation>(info.clone()) {
                    session.set_client_info(info);
                }
            }
            if let Some(caps) = params.get("capabilities") {
                if let Ok(caps) = serde_json::from_value::<ClientCapabilities>(caps.clone()) {
                    session.set_client_capabilities(caps);
                }
            }
        }

        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": true },
                "logging": {},
            },
            "serverInfo": {
                "name": self.project_name(),
                "version": env!("CARGO_PKG_VERSION"),
            },
        }))
    }

    fn handle_tools_list(&self) -> Value {
        let catalog = self.catalog.load();
        json!({ "tools": catalog.tools() })
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params = params.ok_or_else(|| RpcError::invalid_params("missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing tool name"))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        // The snapshot pins the route for the whole call; a concurrent
        // reload swaps the catalog but cannot tear this view.
        let catalog = self.catalog.load_full();
        let route = catalog
            .resolve(name)
            .ok_or_else(|| RpcError::invalid_params(format!("unknown tool: {name}")))?;

        let backend = self
            .backends
            .read()
            .get(&route.backend)
            .cloned()
            .ok_or_else(|| RpcError::internal(format!("backend gone: {}", route.backend)))?;

        let forwarded = json!({ "name": route.tool, "arguments": arguments });
        match backend.request("tools/call", Some(forwarded)).await {
            Ok(result) => Ok(result),
            Err(BackendError::Rpc(error)) => Err(error),
            Err(e) => Err(RpcError::internal(format!("{}: {e}", route.backend))),
        }
    }

    fn handle_set_level(
        &self,
        session: &Arc<Session>,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        let level = params
            .as_ref()
            .and_then(|p| p.get("level"))
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing level"))?
            .parse::<LogLevel>()
            .map_err(RpcError::invalid_params)?;
        session.set_log_level(level);
        Ok(json!({}))
    }

    /// Re-read configuration and apply the diff (spec: stop removed, start
    /// added, restart changed, republish atomically). Serialized: overlapping
    /// requests queue.
    pub async fn reload(&self) -> ReloadResult {
        let _guard = self.reload_lock.lock().await;

        let config = match Config::load(&self.source) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "reload aborted: configuration unreadable");
                return ReloadResult { added: 0, removed: 0, errors: vec![e.to_string()] };
            }
        };

        let current: BTreeMap<String, BackendConfig> = self
            .backends
            .read()
            .iter()
            .map(|(name, backend)| (name.clone(), backend.config().clone()))
            .collect();
        let plan = reload::plan(&current, &config.backends);
        if plan.is_empty() {
            debug!("reload: no backend changes");
            return ReloadResult::default();
        }

        let mut result = ReloadResult::default();

        for name in plan.removed.iter().chain(&plan.changed) {
            let backend = self.backends.write().remove(name);
            if let Some(backend) = backend {
                backend.shutdown().await;
                info!(backend = %name, "backend stopped");
                if plan.removed.contains(name) {
                    result.removed += 1;
                }
            }
        }

        for name in plan.added.iter().chain(&plan.changed) {
            let Some(backend_config) = config.backends.get(name) else { continue };
            match Backend::spawn(name, backend_config.clone(), self.notif_tx.clone()).await {
                Ok(backend) => {
                    self.backends.write().insert(name.clone(), backend);
                    info!(backend = %name, "backend started");
                    if plan.added.contains(name) {
                        result.added += 1;
                    }
                }
                Err(e) => {
                    warn!(backend = %name, error = %e, "backend failed to start");
                    result.errors.push(format!("{name}: {e}"));
                }
            }
        }

        self.publish_catalog();
        self.broadcast(Notification::new("notifications/tools/list_changed", None));

        result
    }

    /// Stop every backend and clear the catalog. Safe to call twice.
    pub async fn shutdown(&self) {
        let backends: Vec<Arc<Backend>> =
            self.backends.write().drain().map(|(_, backend)| backend).collect();
        for backend in backends {
            backend.shutdown().await;
        }
        self.catalog.store(Arc::new(Catalog::default()));
    }

    fn publish_catalog(&self) {
        let entries: Vec<(String, Vec<assern_core::Tool>)> = self
            .backends
            .read()
            .iter()
            .map(|(name, backend)| (name.clone(), backend.tools()))
            .collect();
        let catalog = Catalog::build(entries);
        info!(tools = catalog.len(), "catalog published");
        self.catalog.store(Arc::new(catalog));
    }

    fn broadcast(&self, notification: Notification) {
        for session in self.sessions.lock().values() {
            deliver(session, &notification);
        }
    }
}

fn encode(response: Response) -> Value {
    serde_json::to_value(&response).unwrap_or_else(|e| {
        json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": { "code": rpc::INTERNAL_ERROR, "message": e.to_string() },
        })
    })
}

/// Hand a notification to one session's queue. Never blocks: a full queue
/// drops the notification for that client.
fn deliver(session: &Arc<Session>, notification: &Notification) {
    let Some(tx) = session.notification_sender() else { return };
    match tx.try_send(notification.clone()) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(session = %session.session_id(), "notification dropped: queue full");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

/// Route backend notifications to registered sessions. Log messages respect
/// each session's level; everything else is forwarded unfiltered.
async fn fan_out(sessions: SessionMap, mut rx: mpsc::Receiver<BackendNotification>) {
    while let Some(BackendNotification { backend, mut notification }) = rx.recv().await {
        if notification.method == "notifications/message" {
            let level = notification
                .params
                .as_ref()
                .and_then(|p| p.get("level"))
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<LogLevel>().ok())
                .unwrap_or(LogLevel::Info);

            // Tag the origin so clients can tell backends apart.
            match notification.params.as_mut().and_then(|p| p.as_object_mut()) {
                Some(params) => {
                    params
                        .entry("logger".to_string())
                        .or_insert_with(|| Value::String(backend.clone()));
                }
                None => {
                    notification.params = Some(json!({ "logger": backend }));
                }
            }

            for session in sessions.lock().values() {
                if level >= session.log_level() {
                    deliver(session, &notification);
                }
            }
        } else {
            for session in sessions.lock().values() {
                deliver(session, &notification);
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
