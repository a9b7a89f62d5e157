// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! assern-core: shared types for the assern MCP aggregator.
//!
//! Everything assern speaks — on its own standard streams, on the local
//! coordination socket, and to backend child processes — is newline-delimited
//! JSON-RPC 2.0. This crate holds the envelope types, the MCP data model,
//! and the configuration layer.

pub mod config;
pub mod mcp;
pub mod rpc;

pub use config::{config_dir, BackendConfig, Config, ConfigError, ConfigSource};
pub use mcp::{
    ClientCapabilities, Implementation, LogLevel, ServerCapabilities, Tool, ToolSummary,
    PROTOCOL_VERSION,
};
pub use rpc::{Notification, Request, RequestId, Response, RpcError};
