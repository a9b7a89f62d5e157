// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::unix::fs::PermissionsExt;

use serial_test::serial;
use tempfile::tempdir;

use super::*;

#[test]
#[serial]
fn socket_path_lives_in_the_config_dir() {
    std::env::set_var("ASSERN_CONFIG_DIR", "/cfg/assern");
    assert_eq!(socket_path().unwrap(), PathBuf::from("/cfg/assern/assern.sock"));
    std::env::remove_var("ASSERN_CONFIG_DIR");
}

#[tokio::test]
async fn bind_applies_owner_only_permissions() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");

    let _listener = bind_endpoint(&path, true).unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn bind_removes_a_stale_file_when_cleaning() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");
    std::fs::write(&path, b"stale").unwrap();

    let _listener = bind_endpoint(&path, true).unwrap();
    // The regular file was replaced by a live socket.
    let meta = std::fs::symlink_metadata(&path).unwrap();
    assert!(!meta.file_type().is_file());
}

#[tokio::test]
async fn bind_refuses_an_occupied_path_without_cleaning() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");
    let _holder = bind_endpoint(&path, true).unwrap();

    // Opt-out semantics: detection skipped, no unlink, bind collides.
    assert!(bind_endpoint(&path, false).is_err());
}

#[tokio::test]
async fn remove_endpoint_is_best_effort() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");

    let listener = bind_endpoint(&path, true).unwrap();
    drop(listener);
    remove_endpoint(&path);
    assert!(!path.exists());

    // Removing a path that is already gone is a no-op.
    remove_endpoint(&path);
}

#[tokio::test]
async fn bind_creates_missing_parent_directories() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/deeper/assern.sock");
    let _listener = bind_endpoint(&path, true).unwrap();
    assert!(path.exists());
}
