//! # Node Configuration
//!
//! A single `NodeConfig`, layered from four sources in ascending priority:
//!
//! 1. compiled-in defaults ([`NodeConfig::default`])
//! 2. a TOML file (`--config`, default `{data-dir}/config.toml`)
//! 3. environment variables prefixed `NODE_`, double-underscore nesting
//!    (e.g. `NODE_NETWORK__RPC_PORT`)
//! 4. CLI flags, applied last by the binary after [`NodeConfig::load`]
//!    returns
//!
//! Each layer only overrides the keys it actually sets — a TOML file that
//! configures `network.rpc_port` and nothing else leaves every other
//! default untouched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PROTOCOL_VERSION: &str = "1";
pub const DEFAULT_P2P_PORT: u16 = 7940;
pub const DEFAULT_RPC_PORT: u16 = 7941;
pub const DEFAULT_METRICS_PORT: u16 = 7942;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid environment override {key}: {reason}")]
    InvalidEnv { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub data_dir: PathBuf,
    pub dev_mode: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub p2p_port: u16,
    pub rpc_port: u16,
    pub metrics_port: u16,
    /// Hex-encoded Ed25519 public keys of the active validator set.
    pub validators: Vec<String>,
    /// One of "solo", "dbft", "fbft".
    pub consensus_policy: String,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            p2p_port: DEFAULT_P2P_PORT,
            rpc_port: DEFAULT_RPC_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            validators: Vec::new(),
            consensus_policy: "solo".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
    pub path: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSection {
    pub max_size: usize,
    pub max_age_secs: u64,
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_age_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSection {
    pub round_timeout_ms: u64,
    pub max_txs_per_block: usize,
    pub allow_empty_blocks: bool,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            round_timeout_ms: 2_000,
            max_txs_per_block: 500,
            allow_empty_blocks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub network: NetworkSection,
    pub logging: LoggingSection,
    pub mempool: MempoolSection,
    pub consensus: ConsensusSection,
}

fn default_data_dir() -> PathBuf {
    dirs_home().join(".covenant")
}

/// Resolves `$HOME` without pulling in the `dirs` crate for a single path.
fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl NodeConfig {
    /// Loads configuration from defaults, an optional TOML file, then
    /// `NODE_`-prefixed environment variables, in that order.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("NODE_NODE__DATA_DIR") {
            self.node.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("NODE_NODE__DEV_MODE") {
            self.node.dev_mode = parse_bool("NODE_NODE__DEV_MODE", &v)?;
        }
        if let Ok(v) = std::env::var("NODE_NETWORK__P2P_PORT") {
            self.network.p2p_port = parse_u16("NODE_NETWORK__P2P_PORT", &v)?;
        }
        if let Ok(v) = std::env::var("NODE_NETWORK__RPC_PORT") {
            self.network.rpc_port = parse_u16("NODE_NETWORK__RPC_PORT", &v)?;
        }
        if let Ok(v) = std::env::var("NODE_NETWORK__METRICS_PORT") {
            self.network.metrics_port = parse_u16("NODE_NETWORK__METRICS_PORT", &v)?;
        }
        if let Ok(v) = std::env::var("NODE_NETWORK__CONSENSUS_POLICY") {
            self.network.consensus_policy = v;
        }
        if let Ok(v) = std::env::var("NODE_LOGGING__LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("NODE_LOGGING__FORMAT") {
            self.logging.format = v;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            reason: format!("expected a boolean, got {raw:?}"),
        }),
    }
}

fn parse_u16(key: &str, raw: &str) -> Result<u16, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        reason: format!("expected a port number, got {raw:?}"),
    })
}
