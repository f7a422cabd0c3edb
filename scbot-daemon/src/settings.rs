//! Daemon config: the core sections plus where mentions come from and where replies go.

use anyhow::Context;
use scbot_core::Config;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    #[serde(flatten)]
    pub core: Config,
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7420".to_string(),
        }
    }
}

/// JSON feed polled in `poll` mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub feed_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            timeout_secs: 30,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub dir: PathBuf,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outbox"),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.core.render.validate()?;
        Ok(config)
    }

    pub fn load_path(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml(&s).with_context(|| format!("parse config {}", path.display()))
    }
}
