// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! assern: aggregate several MCP tool-servers behind one stdio endpoint.
//!
//! The first `assern serve` becomes the primary and owns the backends; every
//! further one transparently shares it through a local socket. Diagnostics go
//! to stderr — stdout carries nothing but protocol frames.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod commands;

use std::path::PathBuf;

use assern_core::ConfigSource;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "assern", version, about = "MCP aggregator with single-primary instance sharing")]
struct Cli {
    /// Explicit configuration file (default: user config merged with ./.assern.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve MCP on standard streams, as primary or proxy (default)
    Serve,
    /// Ask the running primary to reload its configuration
    Reload,
    /// Show the running primary, if any
    Status,
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();
    let source = match cli.config {
        Some(path) => ConfigSource::File(path),
        None => {
            let work_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            ConfigSource::default_in(work_dir)
        }
    };

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => commands::serve::run(source).await,
        Command::Reload => commands::reload::run().await,
        Command::Status => commands::status::run().await,
        Command::Version => {
            println!("assern {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Logging goes to stderr: when serving MCP, stdout is reserved for framed
/// protocol bytes. Filter via `ASSERN_LOG` (default `info`).
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("ASSERN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
