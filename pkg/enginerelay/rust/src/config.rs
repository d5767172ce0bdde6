// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "ENGINE_RELAY_CONFIG";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub engines_dir: PathBuf,
    pub max_user_inactive_ms: u64,
    pub teardown_grace_secs: u64,
    pub stop_engine_on_abandon: bool,
    pub stop_timeout_secs: u64,
    pub log_level: String,
    pub tokens: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            engines_dir: PathBuf::from("engines"),
            max_user_inactive_ms: 600_000,
            teardown_grace_secs: 300,
            stop_engine_on_abandon: true,
            stop_timeout_secs: 5,
            log_level: "info".to_string(),
            tokens: Vec::new(),
        }
    }
}

impl Config {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.max_user_inactive_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_secs(self.teardown_grace_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn log_level(&self) -> Result<log::Level> {
        self.log_level
            .parse()
            .map_err(|_| anyhow!("invalid log_level: {}", self.log_level))
    }
}

/// Config file location: the CLI flag wins, then `ENGINE_RELAY_CONFIG`.
pub fn config_path(cli: Option<PathBuf>) -> Option<PathBuf> {
    cli.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

/// Load the config at `path`. No path, or a path that does not exist, means
/// defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    if !path.exists() {
        debug!("config {} not found, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    config.log_level()?;
    if config.stop_timeout_secs == 0 {
        bail!("stop_timeout_secs must be greater than zero");
    }
    Ok(config)
}
