//! DriftKV Server Binary
//!
//! Starts one cluster node from the shared YAML config.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use clap::Parser;
use driftkv::{Config, Node};
use tracing_subscriber::{fmt, EnvFilter};

/// DriftKV Server
#[derive(Parser, Debug)]
#[command(name = "driftkv-server")]
#[command(about = "Clustered key-value store node")]
#[command(version)]
struct Args {
    /// Cluster config file (YAML)
    #[arg(short, long, default_value = "./driftkv.yaml")]
    config: PathBuf,

    /// Which node of the config this process runs
    #[arg(short, long)]
    node: String,
}

fn main() {
    let args = Args::parse();

    // Config first: it decides where the log output goes
    let config = match Config::from_yaml_file(&args.config, &args.node) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to set up logging: {}", e);
        process::exit(1);
    }

    tracing::info!("DriftKV Server v{}", driftkv::VERSION);
    tracing::info!("Node: {}", config.node.node_id);
    tracing::info!("Data directory: {}", config.node_data_dir().display());
    tracing::info!(
        "Client port: {}, replication port: {}",
        config.node.listen_port,
        config.node.kv_port
    );

    let node = match Node::start(config) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("Failed to start node: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = node.wait() {
        tracing::error!("Node error: {}", e);
        process::exit(1);
    }

    tracing::info!("Server stopped");
}

/// Log to stdout, or to `log_path` (without colors) when configured
fn init_tracing(config: &Config) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,driftkv=debug"));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match &config.log_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }

    Ok(())
}
