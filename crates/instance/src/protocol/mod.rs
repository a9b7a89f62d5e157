// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing and control-protocol types for the coordination socket.
//!
//! Framing is the same everywhere assern speaks: one UTF-8 JSON object per
//! line, terminated by `\n`.

pub mod types;
pub mod wire;

pub use types::{is_control_method, PrimaryInfo, METHOD_INFO, METHOD_PING, METHOD_RELOAD};
pub use wire::{read_message, write_message, ProtocolError};
