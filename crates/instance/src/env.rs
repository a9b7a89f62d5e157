// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the instance crate.

use std::time::Duration;

/// Any non-empty value disables primary detection. The process then runs as
/// a primary on its own socket, or refuses to start if the path is taken —
/// the variable is an escape hatch, not a coordination primitive.
pub const NO_INSTANCE_SHARING: &str = "ASSERN_NO_INSTANCE_SHARING";

pub fn instance_sharing_disabled() -> bool {
    std::env::var(NO_INSTANCE_SHARING).map(|v| !v.is_empty()).unwrap_or(false)
}

/// Client-side deadline for control-protocol exchanges (default 10s,
/// configurable via `ASSERN_CONTROL_TIMEOUT_MS`).
pub fn control_timeout() -> Duration {
    std::env::var("ASSERN_CONTROL_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(10))
}
