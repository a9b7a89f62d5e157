// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket-server tests over real Unix sockets in a tempdir: handshake
//! arbitration, byte preservation, control probes, and shutdown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use assern_core::{Config, ConfigSource};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncWriteExt, BufReader as TokioBufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::sleep;

use crate::protocol::ProtocolError;

use super::*;

async fn start_server(dir: &TempDir) -> (Arc<ServeCtx>, PathBuf, tokio::task::JoinHandle<()>) {
    let path = dir.path().join("assern.sock");
    let source = ConfigSource::File(dir.path().join("missing.toml"));
    let engine = Engine::start(Config::default(), source).await;
    let ctx = Arc::new(ServeCtx::new(
        engine,
        PrimaryInfo::current(&path),
        CancellationToken::new(),
    ));
    let server = InstanceServer::bind(&path, Arc::clone(&ctx), true).unwrap();
    let task = tokio::spawn(server.run());
    (ctx, path, task)
}

struct TestClient {
    reader: TokioBufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(path: &Path) -> TestClient {
        let stream = UnixStream::connect(path).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        TestClient { reader: TokioBufReader::new(read_half), writer: write_half }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, frame: &Value) {
        let mut buf = serde_json::to_vec(frame).unwrap();
        buf.push(b'\n');
        self.send_raw(&buf).await;
    }

    async fn recv(&mut self) -> Value {
        wire::read_message(&mut self.reader, Duration::from_secs(2)).await.unwrap()
    }

    async fn recv_eof(&mut self) -> bool {
        matches!(
            wire::read_message(&mut self.reader, Duration::from_secs(2)).await,
            Err(ProtocolError::ConnectionClosed)
        )
    }
}

#[tokio::test]
async fn control_ping_replies_with_info_and_closes() {
    let dir = tempdir().unwrap();
    let (ctx, path, _task) = start_server(&dir).await;

    let mut client = TestClient::connect(&path).await;
    client.send(&json!({"jsonrpc": "2.0", "id": 1, "method": "assern/ping"})).await;

    let response = client.recv().await;
    assert_eq!(response["id"], json!(1));
    assert_eq!(response["result"]["pid"], json!(ctx.info.pid));
    assert_eq!(response["result"]["socket_path"], json!(ctx.info.socket_path));

    // The control branch always terminates after one response.
    assert!(client.recv_eof().await);
}

#[tokio::test]
async fn control_info_is_an_alias_of_ping() {
    let dir = tempdir().unwrap();
    let (ctx, path, _task) = start_server(&dir).await;

    let mut client = TestClient::connect(&path).await;
    client.send(&json!({"jsonrpc": "2.0", "id": 2, "method": "assern/info"})).await;

    let response = client.recv().await;
    assert_eq!(response["result"]["pid"], json!(ctx.info.pid));
}

#[tokio::test]
async fn control_reload_replies_after_completion() {
    let dir = tempdir().unwrap();
    let (_ctx, path, _task) = start_server(&dir).await;

    let mut client = TestClient::connect(&path).await;
    client.send(&json!({"jsonrpc": "2.0", "id": 3, "method": "assern/reload"})).await;

    let response = client.recv().await;
    assert_eq!(response["id"], json!(3));
    // The test engine's config file is missing, which a reload reports
    // in-band rather than failing the request.
    assert_eq!(response["result"]["added"], json!(0));
    assert_eq!(response["result"]["removed"], json!(0));
    assert_eq!(response["result"]["errors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn mcp_session_runs_after_initialize() {
    let dir = tempdir().unwrap();
    let (_ctx, path, _task) = start_server(&dir).await;

    let mut client = TestClient::connect(&path).await;
    client
        .send(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0"},
            },
        }))
        .await;

    let response = client.recv().await;
    assert_eq!(response["result"]["serverInfo"]["name"], json!("assern"));

    client.send(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
    let response = client.recv().await;
    assert_eq!(response["result"]["tools"], json!([]));
}

#[tokio::test]
async fn unknown_first_method_is_handled_by_mcp_not_control() {
    let dir = tempdir().unwrap();
    let (_ctx, path, _task) = start_server(&dir).await;

    let mut client = TestClient::connect(&path).await;
    client.send(&json!({"jsonrpc": "2.0", "id": 1, "method": "bogus/method"})).await;

    let response = client.recv().await;
    assert_eq!(response["error"]["code"], json!(assern_core::rpc::METHOD_NOT_FOUND));

    // Unlike the control branch, the session stays open.
    client.send(&json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})).await;
    let response = client.recv().await;
    assert_eq!(response["id"], json!(2));
}

#[tokio::test]
async fn partial_first_line_is_prepended_to_the_session_stream() {
    let dir = tempdir().unwrap();
    let (_ctx, path, _task) = start_server(&dir).await;

    let mut client = TestClient::connect(&path).await;
    // Half a frame, no newline, then silence past the arbitration window.
    client.send_raw(br#"{"jsonrpc":"2.0","id":7,"#).await;
    sleep(Duration::from_millis(200)).await;
    // Complete the line; the session must see the original bytes verbatim.
    client.send_raw(b"\"method\":\"ping\"}\n").await;

    let response = client.recv().await;
    assert_eq!(response["id"], json!(7));
    assert_eq!(response["result"], json!({}));
}

#[tokio::test]
async fn silent_handshake_starts_a_normal_session() {
    let dir = tempdir().unwrap();
    let (_ctx, path, _task) = start_server(&dir).await;

    let mut client = TestClient::connect(&path).await;
    // Deadline reached with zero bytes read.
    sleep(Duration::from_millis(200)).await;

    client.send(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).await;
    let response = client.recv().await;
    assert_eq!(response["id"], json!(1));
}

#[tokio::test]
async fn parse_error_reply_keeps_the_connection_open() {
    let dir = tempdir().unwrap();
    let (_ctx, path, _task) = start_server(&dir).await;

    let mut client = TestClient::connect(&path).await;
    client.send_raw(b"this is not json\n").await;

    let response = client.recv().await;
    assert_eq!(response["error"]["code"], json!(assern_core::rpc::PARSE_ERROR));
    assert_eq!(response["id"], Value::Null);

    client.send(&json!({"jsonrpc": "2.0", "id": 4, "method": "ping"})).await;
    let response = client.recv().await;
    assert_eq!(response["id"], json!(4));
}

#[tokio::test]
async fn control_probe_leaves_a_live_session_undisturbed() {
    let dir = tempdir().unwrap();
    let (ctx, path, _task) = start_server(&dir).await;

    // Client C: a live MCP session.
    let mut mcp = TestClient::connect(&path).await;
    mcp.send(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})).await;
    mcp.recv().await;

    // A second caller probes and goes away.
    let mut probe = TestClient::connect(&path).await;
    probe.send(&json!({"jsonrpc": "2.0", "id": 1, "method": "assern/ping"})).await;
    let response = probe.recv().await;
    assert_eq!(response["result"]["pid"], json!(ctx.info.pid));
    assert!(probe.recv_eof().await);

    // C is unaffected.
    mcp.send(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
    let response = mcp.recv().await;
    assert_eq!(response["id"], json!(2));
}

#[tokio::test]
async fn registry_tracks_connection_lifecycle() {
    let dir = tempdir().unwrap();
    let (ctx, path, _task) = start_server(&dir).await;
    assert_eq!(ctx.client_count(), 0);

    let mut client = TestClient::connect(&path).await;
    client.send(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})).await;
    client.recv().await;
    assert_eq!(ctx.client_count(), 1);

    drop(client);
    // Removal happens when the worker returns; poll briefly.
    for _ in 0..50 {
        if ctx.client_count() == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(ctx.client_count(), 0);
}

#[tokio::test]
async fn shutdown_disconnects_sessions_and_stops_the_loop() {
    let dir = tempdir().unwrap();
    let (ctx, path, task) = start_server(&dir).await;

    let mut client = TestClient::connect(&path).await;
    client.send(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})).await;
    client.recv().await;

    ctx.shutdown.cancel();
    task.await.unwrap();

    assert!(client.recv_eof().await, "session must observe connection loss");

    for _ in 0..50 {
        if ctx.client_count() == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(ctx.client_count(), 0, "every worker must return");
}
