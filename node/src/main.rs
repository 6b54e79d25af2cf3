// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Covenant Node
//!
//! Entry point for the `covenant-node` binary. Parses CLI arguments, loads
//! layered configuration, initializes logging and metrics, wires the Node
//! aggregate, and serves the status/metrics HTTP surface.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the node
//! - `init`    — initialize data directory and generate a validator keypair
//! - `status`  — query a running node's status endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use covenant_core::config::NodeConfig;
use covenant_core::crypto::NodeKeypair;
use covenant_core::driver::DriverConfig;
use covenant_core::mempool::MempoolConfig;
use covenant_core::model::Address;
use covenant_core::node::{ConsensusPolicyKind, Node, NodeParams};
use covenant_core::producer::ProducerConfig;
use covenant_core::switch::SwitchConfig;
use covenant_core::sync::SyncConfig;
use covenant_core::transport::LoopbackTransport;

use cli::{Commands, CovenantNodeCli, LogStyle};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Dev mode: number of pre-funded test accounts.
const DEV_ACCOUNT_COUNT: u64 = 10;

/// Dev mode: initial balance per test account.
const DEV_ACCOUNT_BALANCE: u64 = 1_000_000_00000000;

/// How often the mempool reaper sweeps for expired entries.
const REAP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CovenantNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — Node startup sequence
// ---------------------------------------------------------------------------

/// Starts the node: metrics server, status API, and the round driver.
///
/// Startup sequence:
/// 1.  Parse CLI args (already done)
/// 2.  Load layered configuration (defaults, TOML, environment, CLI flags)
/// 3.  Initialize logging
/// 4.  Generate or load the validator keypair
/// 5.  Resolve the validator set and consensus policy
/// 6.  Construct the Node aggregate
/// 7.  Pre-fund dev accounts (if `--dev`)
/// 8.  Spawn background tasks (round driver, mempool reaper)
/// 9.  Start the metrics + status HTTP server
/// 10. Await a shutdown signal
/// 11. Signal graceful shutdown
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let data_dir = cli::resolve_data_dir(&args.data_dir);
    let config_path = args.config.clone().unwrap_or_else(|| data_dir.join("config.toml"));
    let mut config = NodeConfig::load(Some(&config_path)).context("failed to load node configuration")?;

    config.node.data_dir = data_dir.clone();
    config.node.dev_mode = args.dev;
    if let Some(policy) = &args.policy {
        config.network.consensus_policy = policy.clone();
    }
    if let Some(port) = args.metrics_port {
        config.network.metrics_port = port;
    }
    if let Some(port) = args.p2p_port {
        config.network.p2p_port = port;
    }
    if args.log_path.is_some() {
        config.logging.path = args.log_path.clone();
    }

    let log_format = match args.log_style {
        LogStyle::Text => LogFormat::Pretty,
        LogStyle::Json => LogFormat::Json,
    };
    let log_filter = format!(
        "covenant_node={level},covenant_core={level},tower_http=debug",
        level = args.log_level
    );
    logging::init_logging(&log_filter, log_format);

    tracing::info!(
        metrics_port = config.network.metrics_port,
        p2p_port = config.network.p2p_port,
        data_dir = %data_dir.display(),
        dev = args.dev,
        validator = args.validator,
        policy = %config.network.consensus_policy,
        "starting covenant-node"
    );

    let keypair = if args.dev {
        let kp = NodeKeypair::generate();
        tracing::info!(public_key = %kp.public_key().to_hex(), "generated ephemeral dev keypair");
        kp
    } else if let Some(hex_key) = &args.validator_key {
        NodeKeypair::from_hex(hex_key).map_err(|e| anyhow::anyhow!("invalid validator key: {}", e))?
    } else {
        load_or_generate_keypair(&data_dir)?
    };

    let self_address = Address::from_bytes(keypair.public_key_bytes());

    let mut validators: Vec<Address> = config
        .network
        .validators
        .iter()
        .filter_map(|hex_key| Address::from_hex(hex_key).ok())
        .collect();
    if (args.validator || args.dev) && !validators.contains(&self_address) {
        validators.push(self_address);
    }
    if validators.is_empty() {
        validators.push(self_address);
    }

    let policy = match config.network.consensus_policy.as_str() {
        "dbft" => ConsensusPolicyKind::Dbft,
        "fbft" => ConsensusPolicyKind::Fbft,
        _ => ConsensusPolicyKind::Solo,
    };

    let node = Arc::new(Node::new(NodeParams {
        keypair,
        validators,
        policy,
        tx_transport: Arc::new(LoopbackTransport::new()),
        block_transport: Arc::new(LoopbackTransport::new()),
        mempool: MempoolConfig {
            max_size: config.mempool.max_size,
            max_age: Duration::from_secs(config.mempool.max_age_secs),
        },
        tx_switch: SwitchConfig::default(),
        block_switch: SwitchConfig::default(),
        producer: ProducerConfig {
            max_txs: config.consensus.max_txs_per_block,
            allow_empty_blocks: config.consensus.allow_empty_blocks,
        },
        driver: DriverConfig {
            round_interval: Duration::from_millis(config.consensus.round_timeout_ms),
        },
        sync: SyncConfig::default(),
    }));

    node.start_network().context("failed to start node network components")?;

    if args.dev {
        let funded = prefund_dev_accounts(&node);
        for (i, addr) in funded.iter().enumerate() {
            tracing::info!(index = i + 1, address = %addr.to_hex(), "dev account funded");
        }
    }

    let node_metrics = Arc::new(NodeMetrics::new());

    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            covenant_core::config::PROTOCOL_VERSION,
        ),
        node: node.clone(),
        metrics: node_metrics.clone(),
    };

    let background_tasks = node.spawn_background_tasks(REAP_INTERVAL);

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(node_metrics.clone());
    let metrics_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.network.metrics_port))
        .await
        .with_context(|| format!("failed to bind metrics listener on port {}", config.network.metrics_port))?;
    tracing::info!(port = config.network.metrics_port, "metrics server listening");

    let status_router = api::create_router(app_state);
    let status_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.network.rpc_port))
        .await
        .with_context(|| format!("failed to bind status listener on port {}", config.network.rpc_port))?;
    tracing::info!(port = config.network.rpc_port, "status server listening");

    print_startup_banner(&self_address.to_hex(), &config, &data_dir);

    tokio::select! {
        res = axum::serve(status_listener, status_router) => {
            if let Err(e) = res {
                tracing::error!("status server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    node.shutdown();
    for handle in background_tasks {
        handle.abort();
    }

    tracing::info!("covenant-node stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// init — Data directory initialization
// ---------------------------------------------------------------------------

/// Initializes a new node data directory and generates a validator keypair.
///
/// Creates the directory structure:
/// ```text
/// {data_dir}/
///     keys/       — validator keypair
///     config.toml — default configuration
/// ```
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("covenant_node=info", LogFormat::Pretty);

    let data_dir = cli::resolve_data_dir(&args.data_dir);
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    let keys_dir = data_dir.join("keys");
    let key_path = keys_dir.join("validator.key");
    if key_path.exists() && !args.force {
        anyhow::bail!(
            "data directory already initialized at {}. Use --force to overwrite.",
            data_dir.display()
        );
    }

    std::fs::create_dir_all(&keys_dir)
        .with_context(|| format!("failed to create keys directory: {}", keys_dir.display()))?;

    let keypair = NodeKeypair::generate();
    let pubkey_hex = keypair.public_key().to_hex();
    let address = Address::from_bytes(keypair.public_key_bytes());

    let secret_bytes = keypair.secret_key_bytes();
    std::fs::write(&key_path, hex::encode(secret_bytes))
        .with_context(|| format!("failed to write validator key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let config = NodeConfig::default();
    let config_path = data_dir.join("config.toml");
    let rendered = toml::to_string_pretty(&config).context("failed to render default configuration")?;
    std::fs::write(&config_path, rendered)
        .with_context(|| format!("failed to write config to {}", config_path.display()))?;

    tracing::info!(
        public_key = %pubkey_hex,
        address = %address.to_hex(),
        key_path = %key_path.display(),
        "validator keypair generated"
    );

    println!();
    println!("Node initialized successfully.");
    println!();
    println!("  Data directory : {}", data_dir.display());
    println!("  Validator key  : {}", key_path.display());
    println!("  Public key     : {}", pubkey_hex);
    println!("  Address        : {}", address.to_hex());
    println!("  Config         : {}", config_path.display());
    println!();
    println!("Run `covenant-node run -d {}` to start the node.", data_dir.display());

    Ok(())
}

// ---------------------------------------------------------------------------
// status — Query a running node
// ---------------------------------------------------------------------------

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.metrics_url.trim_end_matches('/'));
    let body = http_get(&url).await?;

    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => {
            if let Some(version) = json.get("version").and_then(|v| v.as_str()) {
                println!("Node Status");
                println!("  Version     : {}", version);
            }
            if let Some(height) = json.get("block_height").and_then(|v| v.as_u64()) {
                println!("  Block Height: {}", height);
            }
            if let Some(peers) = json.get("peer_count").and_then(|v| v.as_u64()) {
                println!("  Peers       : {}", peers);
            }
        }
        Err(_) => println!("{}", body),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

fn print_version() {
    println!("covenant-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol      {}", covenant_core::config::PROTOCOL_VERSION);
    println!("rustc         {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

// ---------------------------------------------------------------------------
// Keypair persistence
// ---------------------------------------------------------------------------

/// Loads a validator keypair from `{data_dir}/keys/validator.key`, or
/// generates and saves a new one if the key file does not exist.
fn load_or_generate_keypair(data_dir: &std::path::Path) -> Result<NodeKeypair> {
    let keys_dir = data_dir.join("keys");
    let key_path = keys_dir.join("validator.key");

    if key_path.exists() {
        let hex_str = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read validator key from {}", key_path.display()))?;
        let keypair = NodeKeypair::from_hex(hex_str.trim())
            .map_err(|e| anyhow::anyhow!("invalid validator key: {}", e))?;
        tracing::info!(
            public_key = %keypair.public_key().to_hex(),
            key_path = %key_path.display(),
            "loaded validator keypair from disk"
        );
        Ok(keypair)
    } else {
        std::fs::create_dir_all(&keys_dir)
            .with_context(|| format!("failed to create keys directory: {}", keys_dir.display()))?;

        let keypair = NodeKeypair::generate();
        let secret_hex = hex::encode(keypair.secret_key_bytes());
        std::fs::write(&key_path, &secret_hex)
            .with_context(|| format!("failed to write validator key to {}", key_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!(
            public_key = %keypair.public_key().to_hex(),
            key_path = %key_path.display(),
            "generated and saved new validator keypair"
        );
        Ok(keypair)
    }
}

// ---------------------------------------------------------------------------
// Dev mode helpers
// ---------------------------------------------------------------------------

/// Generates a deterministic 32-byte seed from a u64 index.
fn generate_dev_seed(index: u64) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"covenant-dev-account-");
    hasher.update(index.to_le_bytes());
    let result = hasher.finalize();
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&result);
    seed
}

/// Pre-funds `DEV_ACCOUNT_COUNT` deterministic dev accounts directly through
/// the repository, bypassing transaction replay. Returns the funded
/// addresses.
fn prefund_dev_accounts(node: &Node) -> Vec<Address> {
    let mut addresses = Vec::with_capacity(DEV_ACCOUNT_COUNT as usize);
    for i in 1..=DEV_ACCOUNT_COUNT {
        let seed = generate_dev_seed(i);
        let kp = NodeKeypair::from_seed(&seed);
        let addr = Address::from_bytes(kp.public_key_bytes());
        node.seed_account(addr, DEV_ACCOUNT_BALANCE);
        addresses.push(addr);
    }
    addresses
}

// ---------------------------------------------------------------------------
// Startup banner
// ---------------------------------------------------------------------------

fn print_startup_banner(address_hex: &str, config: &NodeConfig, data_dir: &std::path::Path) {
    let address_short = if address_hex.len() > 20 {
        format!("{}...", &address_hex[..20])
    } else {
        address_hex.to_string()
    };

    let lines = [
        format!("  Address:    {}", address_short),
        format!("  Status:     http://0.0.0.0:{}", config.network.rpc_port),
        format!("  Metrics:    http://0.0.0.0:{}", config.network.metrics_port),
        format!("  Data:       {}", data_dir.display()),
        format!("  Policy:     {}", config.network.consensus_policy),
    ];

    let title = format!("  Covenant Node v{}", env!("CARGO_PKG_VERSION"));

    let max_width = lines
        .iter()
        .map(|l| l.len())
        .chain(std::iter::once(title.len()))
        .max()
        .unwrap_or(50)
        + 4;

    let border = "\u{2550}".repeat(max_width);

    println!();
    println!("\u{2554}{}\u{2557}", border);
    println!("\u{2551}  {:<width$}  \u{2551}", title.trim(), width = max_width - 4);
    println!("\u{2560}{}\u{2563}", border);
    for line in &lines {
        println!("\u{2551}  {:<width$}  \u{2551}", line.trim(), width = max_width - 4);
    }
    println!("\u{255A}{}\u{255D}", border);
    println!();
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Minimal HTTP client
// ---------------------------------------------------------------------------

/// Minimal HTTP GET without pulling in `reqwest` as a dependency.
async fn http_get(url: &str) -> Result<String> {
    let parsed: HttpUrl = url.parse().map_err(|e| anyhow::anyhow!("invalid URL: {}", e))?;

    let addr = format!("{}:{}", parsed.host, parsed.port.unwrap_or(80));
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        parsed.path, parsed.host,
    );

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Minimal URL parser — just enough to extract host/port/path.
struct HttpUrl {
    host: String,
    port: Option<u16>,
    path: String,
}

impl std::str::FromStr for HttpUrl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("http://").or_else(|| s.strip_prefix("https://")).unwrap_or(s);

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rfind(':') {
            Some(i) => {
                let p = authority[i + 1..].parse::<u16>().map_err(|e| format!("bad port: {}", e))?;
                (authority[..i].to_string(), Some(p))
            }
            None => (authority.to_string(), None),
        };

        Ok(HttpUrl {
            host,
            port,
            path: path.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
