//! # CLI Interface
//!
//! Defines the command-line argument structure for `covenant-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`, and
//! `version`. Flags override whatever `NodeConfig` already resolved from
//! its file and environment layers — see `covenant_core::config`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Covenant permissioned BFT node.
///
/// Participates in consensus, relays transactions and blocks over the
/// gossip switch, and exposes a metrics endpoint for scraping.
#[derive(Parser, Debug)]
#[command(
    name = "covenant-node",
    about = "Covenant permissioned BFT node",
    version,
    propagate_version = true
)]
pub struct CovenantNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a new node — creates the data directory and generates a
    /// fresh validator keypair.
    Init(InitArgs),
    /// Query the status of a running node via its metrics endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory.
    #[arg(long, short = 'c', env = "NODE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the node data directory where keys and config are stored.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "NODE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log level: a named level (trace, debug, info, warn, error) or a
    /// 0..6 verbosity number, matching the teacher's numeric scale.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Path to write logs to, in addition to stderr.
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// Log output style.
    #[arg(long, value_enum, default_value = "text")]
    pub log_style: LogStyle,

    /// Run in development mode: ephemeral in-memory repository, a fresh
    /// keypair, and a handful of pre-funded accounts.
    #[arg(long)]
    pub dev: bool,

    /// Participate in consensus as a validator, rather than running as a
    /// passive observer of committed blocks.
    #[arg(long)]
    pub validator: bool,

    /// Consensus policy override: solo, dbft, or fbft.
    #[arg(long)]
    pub policy: Option<String>,

    /// Port for the metrics endpoint. Overrides configuration.
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Port for the gossip transport. Overrides configuration.
    #[arg(long)]
    pub p2p_port: Option<u16>,

    /// Hex-encoded Ed25519 validator secret key.
    ///
    /// **Never pass this flag in production** — use a key file instead.
    #[arg(long, env = "NODE_VALIDATOR_KEY")]
    pub validator_key: Option<String>,
}

/// Log output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogStyle {
    Text,
    Json,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "NODE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Overwrite an existing data directory.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Metrics endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:7942")]
    pub metrics_url: String,
}

/// Resolves a data directory argument, expanding a leading `~` to `$HOME`
/// and falling back to `NodeConfig`'s default when unset.
pub fn resolve_data_dir(arg: &Option<PathBuf>) -> PathBuf {
    match arg {
        Some(path) => expand_tilde(path),
        None => covenant_core::config::NodeConfig::default().node.data_dir,
    }
}

fn expand_tilde(path: &std::path::Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        home.join(rest)
    } else {
        path.to_path_buf()
    }
}

/// Validates a log level string. Accepts the named `tracing` levels.
pub fn validate_log_level(level: &str) -> bool {
    matches!(
        level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        CovenantNodeCli::command().debug_assert();
    }

    #[test]
    fn expands_home_relative_data_dir() {
        std::env::set_var("HOME", "/home/tester");
        let resolved = resolve_data_dir(&Some(PathBuf::from("~/.covenant")));
        std::env::remove_var("HOME");
        assert_eq!(resolved, PathBuf::from("/home/tester/.covenant"));
    }

    #[test]
    fn absolute_data_dir_is_unchanged() {
        let resolved = resolve_data_dir(&Some(PathBuf::from("/srv/covenant")));
        assert_eq!(resolved, PathBuf::from("/srv/covenant"));
    }

    #[test]
    fn log_level_validation() {
        assert!(validate_log_level("info"));
        assert!(validate_log_level("DEBUG"));
        assert!(!validate_log_level("garbage"));
    }
}
