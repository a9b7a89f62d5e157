// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-protocol DTOs and method names.
//!
//! The `assern/*` methods are served exclusively during handshake
//! arbitration on the socket; inside an MCP session they are ordinary
//! unknown methods.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness probe; replies with [`PrimaryInfo`].
pub const METHOD_PING: &str = "assern/ping";

/// Alias of ping.
pub const METHOD_INFO: &str = "assern/info";

/// Trigger a configuration reload; replies after completion.
pub const METHOD_RELOAD: &str = "assern/reload";

pub fn is_control_method(method: &str) -> bool {
    matches!(method, METHOD_PING | METHOD_INFO | METHOD_RELOAD)
}

/// Identity of the running primary. Immutable for its lifetime and returned
/// verbatim to every control probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrimaryInfo {
    pub pid: u32,
    pub socket_path: String,
    pub start_time: DateTime<Utc>,
    pub work_dir: String,
}

impl PrimaryInfo {
    /// Info record for this process, captured at socket-server start.
    pub fn current(socket_path: &Path) -> PrimaryInfo {
        let work_dir = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        PrimaryInfo {
            pid: std::process::id(),
            socket_path: socket_path.display().to_string(),
            start_time: Utc::now(),
            work_dir,
        }
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
