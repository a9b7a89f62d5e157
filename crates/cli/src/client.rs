// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control client: one request/response exchange with a running primary.

use std::path::Path;

use anyhow::{bail, Context, Result};
use assern_core::Request;
use assern_engine::ReloadResult;
use assern_instance::env;
use assern_instance::protocol::{wire, PrimaryInfo, METHOD_PING, METHOD_RELOAD};
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

pub struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlClient {
    pub async fn connect(path: &Path) -> Result<ControlClient> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("no running instance at {}", path.display()))?;
        let (read_half, write_half) = stream.into_split();
        Ok(ControlClient { reader: BufReader::new(read_half), writer: write_half })
    }

    pub async fn ping(&mut self) -> Result<PrimaryInfo> {
        let result = self.request(METHOD_PING).await?;
        serde_json::from_value(result).context("malformed primary info")
    }

    pub async fn reload(&mut self) -> Result<ReloadResult> {
        let result = self.request(METHOD_RELOAD).await?;
        serde_json::from_value(result).context("malformed reload result")
    }

    async fn request(&mut self, method: &str) -> Result<Value> {
        let request = Request::new(1, method, None);
        wire::write_message(&mut self.writer, &request)
            .await
            .context("request write failed")?;

        let value = wire::read_message(&mut self.reader, env::control_timeout())
            .await
            .context("no response from primary")?;

        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("primary refused {method}: {message}");
        }
        value.get("result").cloned().context("response missing result")
    }
}
