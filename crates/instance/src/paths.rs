// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rendezvous endpoint: a user-private Unix socket at a path every assern
//! process derives identically.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assern_core::config::{config_dir, ConfigError};
use tokio::net::UnixListener;
use tracing::{debug, warn};

use crate::serve::ServeError;

/// Socket file name inside the configuration directory.
const SOCKET_FILE: &str = "assern.sock";

/// The rendezvous endpoint path. Identical for primary and secondary; unique
/// per installation, not per session.
pub fn socket_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(SOCKET_FILE))
}

/// Bind the endpoint and restrict it to the owning user.
///
/// With `clean_stale` set (the normal path, after detection reported no
/// primary), a leftover file at the path is unlinked first. With detection
/// disabled the file is left alone so a live primary's socket is never
/// stolen: the bind then fails and startup aborts.
pub(crate) fn bind_endpoint(path: &Path, clean_stale: bool) -> Result<UnixListener, ServeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|source| ServeError::Bind { path: path.to_path_buf(), source })?;
    }

    if clean_stale {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale endpoint"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove stale endpoint"),
        }
    }

    let listener = UnixListener::bind(path)
        .map_err(|source| ServeError::Bind { path: path.to_path_buf(), source })?;

    if let Err(e) =
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
    {
        warn!(path = %path.display(), error = %e, "could not restrict endpoint permissions");
    }

    Ok(listener)
}

/// Unlink the endpoint on orderly stop. Best-effort.
pub(crate) fn remove_endpoint(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "endpoint removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove endpoint"),
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
