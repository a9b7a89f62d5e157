// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection session state.
//!
//! One session exists per connected MCP client, including the primary's own
//! stdio. The engine routes notifications and records client identity per
//! session; everything else (catalog, backends) is shared.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use assern_core::{ClientCapabilities, Implementation, LogLevel, Notification};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Reserved id for the session serving the primary's standard streams.
pub const STDIO_SESSION_ID: &str = "stdio";

/// Bound on queued notifications per session. A client that stops reading
/// loses notifications rather than stalling backend work.
const NOTIFICATION_BUFFER: usize = 128;

/// Session ids are a clock reading plus a process-wide sequence; the sequence
/// disambiguates identical readings so ids stay unique for the life of the
/// primary.
static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_socket_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("conn-{nanos}-{seq}")
}

/// State for one connected MCP client.
pub struct Session {
    id: String,
    initialized: AtomicBool,
    client_info: ArcSwapOption<Implementation>,
    client_capabilities: ArcSwapOption<ClientCapabilities>,
    log_level: AtomicU8,
    notif_tx: mpsc::Sender<Notification>,
    notif_rx: Mutex<Option<mpsc::Receiver<Notification>>>,
    closed: AtomicBool,
}

impl Session {
    /// Session for the primary's own standard streams.
    pub fn stdio() -> Arc<Session> {
        Self::with_id(STDIO_SESSION_ID.to_string())
    }

    /// Session for an accepted socket connection.
    pub fn connect() -> Arc<Session> {
        Self::with_id(next_socket_session_id())
    }

    fn with_id(id: String) -> Arc<Session> {
        let (notif_tx, notif_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        Arc::new(Session {
            id,
            initialized: AtomicBool::new(false),
            client_info: ArcSwapOption::empty(),
            client_capabilities: ArcSwapOption::empty(),
            log_level: AtomicU8::new(LogLevel::default().rank()),
            notif_tx,
            notif_rx: Mutex::new(Some(notif_rx)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.id
    }

    /// Sender side of the notification queue, or `None` once the session is
    /// closed. The engine checks this before routing so closed sessions never
    /// see writes.
    pub fn notification_sender(&self) -> Option<mpsc::Sender<Notification>> {
        if self.closed.load(Ordering::SeqCst) {
            None
        } else {
            Some(self.notif_tx.clone())
        }
    }

    /// Receiver side, taken exactly once by the connection's notification
    /// pump.
    pub fn take_notification_receiver(&self) -> Option<mpsc::Receiver<Notification>> {
        self.notif_rx.lock().take()
    }

    /// Mark the session initialized. Returns true only for the call that
    /// performed the transition; the flag never goes back.
    pub fn initialize(&self) -> bool {
        self.initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Record the client's implementation info. Write-once: later calls are
    /// ignored.
    pub fn set_client_info(&self, info: Implementation) {
        self.client_info
            .rcu(|current| current.clone().or_else(|| Some(Arc::new(info.clone()))));
    }

    pub fn client_info(&self) -> Option<Arc<Implementation>> {
        self.client_info.load_full()
    }

    /// Record the client's capabilities. Write-once: later calls are ignored.
    pub fn set_client_capabilities(&self, caps: ClientCapabilities) {
        self.client_capabilities
            .rcu(|current| current.clone().or_else(|| Some(Arc::new(caps.clone()))));
    }

    pub fn client_capabilities(&self) -> Option<Arc<ClientCapabilities>> {
        self.client_capabilities.load_full()
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.log_level.store(level.rank(), Ordering::SeqCst);
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_rank(self.log_level.load(Ordering::SeqCst))
    }

    /// Close the notification queue. Idempotent; called when the connection
    /// ends.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping an untaken receiver closes the channel; if the pump took
        // it, the channel closes when the pump exits.
        self.notif_rx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("initialized", &self.initialized())
            .field("log_level", &self.log_level())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
