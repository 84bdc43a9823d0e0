//! Configuration for the crawler.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CRAWL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/opera-crawler/config.toml
//!   3. ~/.config/opera-crawler/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub crawler: CrawlSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hex-encoded node secret. Empty = fresh ephemeral key each run.
    pub node_key: String,
    /// Name sent in the transport hello.
    pub client_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP listen address for inbound peers.
    pub listen_addr: String,
    /// Bootstrap node URLs. The enode:// scheme may be omitted.
    pub bootnodes: Vec<String>,
    /// Node URLs exempt from the usefulness filter.
    pub trusted_nodes: Vec<String>,
    /// Node ids (hex) on the discovery ban list.
    pub banned_nodes: Vec<String>,
    /// Seconds between redials of bootstrap nodes.
    pub dial_interval_secs: u64,
    /// Diagnostics API port. 0 = disabled.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Output queue capacity.
    pub workers: usize,
    /// Genesis dataset (JSON).
    pub genesis_path: PathBuf,
    /// Node catalogue, read at start and rewritten on every update.
    pub nodes_path: PathBuf,
    /// Invoke the update callback every N merged results.
    pub update_every: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            node_key: String::new(),
            client_name: format!("opera-crawler/v{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5050".into(),
            bootnodes: Vec::new(),
            trusted_nodes: Vec::new(),
            banned_nodes: Vec::new(),
            dial_interval_secs: 30,
            api_port: 9060,
        }
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            workers: 16,
            genesis_path: config_dir().join("genesis.json"),
            nodes_path: data_dir().join("nodes.json"),
            update_every: 10,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("opera-crawler")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("opera-crawler")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CrawlerConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load `path` with env overrides applied.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load a specific file without env overrides. A missing file yields defaults.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CRAWL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CrawlerConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CRAWL_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("CRAWL_IDENTITY__NODE_KEY") {
            self.identity.node_key = v;
        }
        if let Some(v) = var("CRAWL_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Some(v) = var("CRAWL_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Some(v) = var("CRAWL_CRAWLER__WORKERS") {
            if let Ok(n) = v.parse() {
                self.crawler.workers = n;
            }
        }
        if let Some(v) = var("CRAWL_CRAWLER__GENESIS_PATH") {
            self.crawler.genesis_path = PathBuf::from(v);
        }
    }
}
