// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serve driver: primary-vs-proxy branch, stdio session, signal handling.
//!
//! Every process starts the same way: probe the rendezvous endpoint. A live
//! primary turns this process into a transparent proxy; otherwise it takes
//! the primary role — engine, socket server, stdio MCP session, signal loop.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assern_core::{Config, ConfigError, ConfigSource};
use assern_engine::{Engine, Session};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::detect;
use crate::env;
use crate::paths;
use crate::protocol::types::PrimaryInfo;
use crate::proxy::ProxyBridge;
use crate::server::{self, InstanceServer, ServeCtx};

/// Options for [`serve`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub config_source: ConfigSource,
}

/// Startup-fatal errors. Everything else is handled locally and logged.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind endpoint {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Serve MCP on the standard streams, as primary or as proxy.
pub async fn serve(opts: ServeOptions) -> Result<(), ServeError> {
    let socket_path = paths::socket_path()?;

    if let Some(primary) = detect::detect_running(&socket_path).await {
        info!(
            pid = primary.pid,
            socket = %socket_path.display(),
            "primary instance detected; proxying standard streams"
        );
        return run_proxy(&socket_path).await;
    }

    run_primary(opts, &socket_path).await
}

async fn run_proxy(socket_path: &Path) -> Result<(), ServeError> {
    let cancel = CancellationToken::new();
    spawn_proxy_signal_handler(cancel.clone())?;

    let mut bridge = ProxyBridge::new(socket_path);
    let result = bridge.serve_stdio(cancel).await;
    bridge.close().await;
    result.map_err(ServeError::from)
}

fn spawn_proxy_signal_handler(cancel: CancellationToken) -> io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        info!("signal received; closing proxy");
        cancel.cancel();
    });
    Ok(())
}

async fn run_primary(opts: ServeOptions, socket_path: &Path) -> Result<(), ServeError> {
    let config = Config::load(&opts.config_source)?;
    let engine = Engine::start(config, opts.config_source.clone()).await;
    info!(
        project = %engine.project_name(),
        backends = ?engine.server_names(),
        tools = engine.list_tools().len(),
        "aggregator engine started"
    );

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(ServeCtx::new(
        Arc::clone(&engine),
        PrimaryInfo::current(socket_path),
        shutdown.clone(),
    ));

    // With detection bypassed, never unlink: a live primary's socket must
    // not be stolen, so a collision fails the bind instead.
    let clean_stale = !env::instance_sharing_disabled();
    let server = InstanceServer::bind(socket_path, Arc::clone(&ctx), clean_stale)?;
    let server_task = tokio::spawn(server.run());
    let signal_task = spawn_signal_loop(Arc::clone(&ctx))?;

    // The launching agent's own session. Its end — EOF on stdin, a fatal
    // stream error, or shutdown — stops the primary.
    server::run_mcp_session(tokio::io::stdin(), tokio::io::stdout(), Session::stdio(), &ctx).await;

    info!("stdio session ended; stopping");
    shutdown.cancel();
    let _ = server_task.await;
    let _ = signal_task.await;
    engine.shutdown().await;
    paths::remove_endpoint(socket_path);
    Ok(())
}

/// One long-lived worker selecting over the handled signals and the shutdown
/// sentinel. Terminate/interrupt stop the primary; hang-up reloads and keeps
/// serving.
fn spawn_signal_loop(ctx: Arc<ServeCtx>) -> io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    ctx.shutdown.cancel();
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    ctx.shutdown.cancel();
                    break;
                }
                _ = sighup.recv() => {
                    info!("received SIGHUP, reloading configuration");
                    let result = ctx.engine.reload().await;
                    for error in &result.errors {
                        warn!(error = %error, "reload error");
                    }
                    info!(added = result.added, removed = result.removed, "reload complete");
                }
            }
        }
    }))
}
