// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `assern status` - report the running primary, if any.

use anyhow::Result;
use assern_instance::paths;

use crate::client::ControlClient;

pub async fn run() -> Result<()> {
    let path = paths::socket_path()?;

    let mut client = match ControlClient::connect(&path).await {
        Ok(client) => client,
        Err(_) => return print_not_running(),
    };

    match client.ping().await {
        Ok(info) => {
            println!("assern is running");
            println!("  pid: {}", info.pid);
            println!("  socket: {}", info.socket_path);
            println!("  started: {}", info.start_time.to_rfc3339());
            println!("  work dir: {}", info.work_dir);
            Ok(())
        }
        Err(_) => print_not_running(),
    }
}

fn print_not_running() -> Result<()> {
    println!("assern is not running");
    Ok(())
}
