// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration model and loading.
//!
//! Backends are declared in TOML. Without an explicit `--config` path, the
//! user-level file (`<config dir>/config.toml`) and the project-level file
//! (`./.assern.toml`) are merged, project entries winning on conflict. The
//! reload coordinator re-reads the same sources, so a running primary picks
//! up edits to either file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// User-level configuration file name inside the config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Project-level configuration file, looked up in the working directory.
const PROJECT_CONFIG_FILE: &str = ".assern.toml";

/// Aggregator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Aggregate name reported to MCP clients. Defaults to the package name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Backend tool-servers, keyed by the prefix their tools are merged under.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

/// One backend child process.
///
/// `PartialEq` matters: the reload coordinator treats a changed config under
/// an unchanged name as remove-then-add.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Command to execute.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

/// Where configuration is read from. Captured at startup and reused verbatim
/// by every reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// User file merged with the project file in `work_dir`.
    Default { work_dir: PathBuf },
    /// A single explicit file (`--config`). Must exist.
    File(PathBuf),
}

impl ConfigSource {
    /// Source for the current working directory.
    pub fn default_in(work_dir: impl Into<PathBuf>) -> Self {
        ConfigSource::Default { work_dir: work_dir.into() }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load configuration from `source`.
    ///
    /// For [`ConfigSource::Default`], missing files are empty configs, not
    /// errors. An explicit [`ConfigSource::File`] must be readable.
    pub fn load(source: &ConfigSource) -> Result<Config, ConfigError> {
        match source {
            ConfigSource::File(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
                parse(path, &raw)
            }
            ConfigSource::Default { work_dir } => {
                let user = load_optional(&config_dir()?.join(USER_CONFIG_FILE))?;
                let project = load_optional(&work_dir.join(PROJECT_CONFIG_FILE))?;
                Ok(merge(user, project))
            }
        }
    }
}

/// Resolve the per-user configuration directory:
/// `ASSERN_CONFIG_DIR` > `$XDG_CONFIG_HOME/assern` > `~/.config/assern`.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("ASSERN_CONFIG_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("assern"));
        }
    }
    let home = std::env::var("HOME").map_err(|_| ConfigError::NoHome)?;
    Ok(PathBuf::from(home).join(".config/assern"))
}

fn load_optional(path: &Path) -> Result<Option<Config>, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
    };
    parse(path, &raw).map(Some)
}

fn parse(path: &Path, raw: &str) -> Result<Config, ConfigError> {
    toml::from_str(raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

/// Merge user and project configs; project entries win per backend name.
fn merge(user: Option<Config>, project: Option<Config>) -> Config {
    let mut merged = user.unwrap_or_default();
    if let Some(project) = project {
        if project.project.is_some() {
            merged.project = project.project;
        }
        for (name, backend) in project.backends {
            merged.backends.insert(name, backend);
        }
    }
    merged
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
