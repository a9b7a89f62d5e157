// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;

use assern_core::{ClientCapabilities, Implementation, LogLevel, Notification};

use super::*;

#[test]
fn stdio_session_uses_reserved_id() {
    let session = Session::stdio();
    assert_eq!(session.session_id(), STDIO_SESSION_ID);
}

#[test]
fn socket_session_ids_are_unique() {
    let ids: HashSet<String> = (0..1000)
        .map(|_| Session::connect().session_id().to_string())
        .collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn socket_session_id_is_not_the_stdio_name() {
    let session = Session::connect();
    assert_ne!(session.session_id(), STDIO_SESSION_ID);
}

#[test]
fn initialize_transitions_exactly_once() {
    let session = Session::connect();
    assert!(!session.initialized());
    assert!(session.initialize());
    assert!(session.initialized());
    // Second call reports it did not perform the transition.
    assert!(!session.initialize());
    assert!(session.initialized());
}

#[test]
fn client_info_is_write_once() {
    let session = Session::connect();
    assert!(session.client_info().is_none());

    session.set_client_info(Implementation { name: "first".into(), version: "1".into() });
    session.set_client_info(Implementation { name: "second".into(), version: "2".into() });

    assert_eq!(session.client_info().unwrap().name, "first");
}

#[test]
fn client_capabilities_are_write_once() {
    let session = Session::connect();
    let caps = ClientCapabilities {
        sampling: Some(serde_json::json!({})),
        ..Default::default()
    };
    session.set_client_capabilities(caps);
    session.set_client_capabilities(ClientCapabilities::default());

    assert!(session.client_capabilities().unwrap().sampling.is_some());
}

#[test]
fn log_level_defaults_to_error_and_is_mutable() {
    let session = Session::connect();
    assert_eq!(session.log_level(), LogLevel::Error);
    session.set_log_level(LogLevel::Debug);
    assert_eq!(session.log_level(), LogLevel::Debug);
}

#[test]
fn close_is_idempotent_and_stops_sends() {
    let session = Session::connect();
    assert!(session.notification_sender().is_some());

    session.close();
    session.close();

    assert!(session.is_closed());
    assert!(session.notification_sender().is_none());
}

#[tokio::test]
async fn notifications_flow_until_close() {
    let session = Session::connect();
    let mut rx = session.take_notification_receiver().unwrap();
    // Receiver can only be taken once.
    assert!(session.take_notification_receiver().is_none());

    let tx = session.notification_sender().unwrap();
    tx.send(Notification::new("notifications/message", None)).await.unwrap();
    let received = rx.recv().await.unwrap();
    assert_eq!(received.method, "notifications/message");

    drop(rx);
    session.close();
    assert!(tx.send(Notification::new("notifications/message", None)).await.is_err());
}
