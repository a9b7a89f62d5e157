// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use assern_core::{RequestId, Response};
use serial_test::serial;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use super::*;

/// A minimal primary: accepts one connection and answers the ping with the
/// given info record.
fn spawn_fake_primary(listener: UnixListener, info: PrimaryInfo) {
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        if reader.read_line(&mut line).await.is_ok() {
            let result = serde_json::to_value(&info).unwrap();
            let response = Response::success(RequestId::Number(1), result);
            let mut buf = serde_json::to_vec(&response).unwrap();
            buf.push(b'\n');
            let _ = write_half.write_all(&buf).await;
        }
    });
}

#[tokio::test]
async fn absent_endpoint_means_no_primary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");
    assert!(detect_running(&path).await.is_none());
}

#[tokio::test]
async fn stale_regular_file_is_removed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");
    std::fs::write(&path, b"stale").unwrap();

    assert!(detect_running(&path).await.is_none());
    assert!(!path.exists(), "stale endpoint should be unlinked");
}

#[tokio::test]
async fn stale_socket_without_listener_is_removed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");
    // Bind then drop: the file stays behind with nothing listening, the
    // shape an abnormal primary exit leaves.
    drop(UnixListener::bind(&path).unwrap());
    assert!(path.exists());

    assert!(detect_running(&path).await.is_none());
    assert!(!path.exists());
}

#[tokio::test]
async fn live_primary_is_detected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let info = PrimaryInfo::current(&path);
    spawn_fake_primary(listener, info.clone());

    let detected = detect_running(&path).await.unwrap();
    assert_eq!(detected, info);
    assert!(path.exists(), "live endpoint must not be touched");
}

#[tokio::test]
async fn accepting_but_silent_peer_is_stale() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");
    let listener = UnixListener::bind(&path).unwrap();
    // Accept and hold the connection without ever replying.
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        drop(stream);
    });

    let started = std::time::Instant::now();
    assert!(detect_running(&path).await.is_none());
    assert!(started.elapsed() < std::time::Duration::from_secs(2), "probe must be bounded");
    assert!(!path.exists(), "unresponsive endpoint is treated as stale");
}

#[tokio::test]
#[serial]
async fn env_opt_out_bypasses_detection() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");
    let listener = UnixListener::bind(&path).unwrap();
    spawn_fake_primary(listener, PrimaryInfo::current(&path));

    std::env::set_var(crate::env::NO_INSTANCE_SHARING, "1");
    let detected = detect_running(&path).await;
    std::env::remove_var(crate::env::NO_INSTANCE_SHARING);

    assert!(detected.is_none(), "opt-out must report no primary even with one live");
    assert!(path.exists(), "opt-out must not touch the endpoint");
}

#[tokio::test]
async fn reply_without_result_means_no_primary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("assern.sock");
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let _ = reader.read_line(&mut line).await;
        let _ = write_half.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1}\n").await;
    });

    assert!(detect_running(&path).await.is_none());
}
