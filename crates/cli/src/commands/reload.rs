// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `assern reload` - apply configuration changes to the running primary.

use anyhow::Result;
use assern_instance::paths;

use crate::client::ControlClient;

pub async fn run() -> Result<()> {
    let path = paths::socket_path()?;
    let mut client = ControlClient::connect(&path).await?;
    let result = client.reload().await?;

    println!("Reloaded: {} added, {} removed", result.added, result.removed);
    for error in &result.errors {
        eprintln!("  error: {error}");
    }
    Ok(())
}
