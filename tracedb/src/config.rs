use bon::Builder;
use eyre::Context;
use serde::{Deserialize, Serialize};

use crate::chunk::DEFAULT_SOFT_CAP;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Events per chunk before a new one is opened at the tail.
    #[serde(default = "default_chunk_soft_cap")]
    #[builder(default = default_chunk_soft_cap())]
    pub chunk_soft_cap: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            chunk_soft_cap: default_chunk_soft_cap(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub default: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: default_log_filter(),
        }
    }
}

fn default_chunk_soft_cap() -> usize {
    DEFAULT_SOFT_CAP
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
        let config: Config = toml::from_str(&content)?;
        if config.store.chunk_soft_cap == 0 {
            eyre::bail!("store.chunk_soft_cap must be positive");
        }
        Ok(config)
    }
}
