// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `assern serve` - serve MCP on the standard streams.

use anyhow::Result;
use assern_core::ConfigSource;
use assern_instance::{serve, ServeOptions};

pub async fn run(config_source: ConfigSource) -> Result<()> {
    serve(ServeOptions { config_source }).await?;
    Ok(())
}
