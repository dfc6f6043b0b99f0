//! DriftKV CLI Client
//!
//! Command-line interface for talking to a DriftKV node.

use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use driftkv::network::Client;
use driftkv::Result;

/// DriftKV CLI
#[derive(Parser, Debug)]
#[command(name = "driftkv-cli")]
#[command(about = "CLI for the DriftKV key-value store")]
struct Args {
    /// Node address; the client port for get/set/del, the kv port for fetch
    #[arg(short, long, default_value = "127.0.0.1:7001")]
    server: String,

    /// Connect and I/O timeout in milliseconds
    #[arg(short, long, default_value = "2000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Ping the server
    Ping,

    /// Dump a node's backup log records after an index
    Fetch {
        /// Only records with a larger index
        #[arg(default_value = "0")]
        since: u64,

        /// Maximum number of records
        #[arg(short, long, default_value = "100")]
        limit: u32,
    },
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("(error) {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut client = Client::connect(&args.server, Duration::from_millis(args.timeout_ms))?;

    match args.command {
        Commands::Get { key } => match client.get(&key)? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Set { key, value } => {
            let version = client.put(&key, value.as_bytes())?;
            println!("OK {}", version);
        }
        Commands::Del { key } => {
            let version = client.delete(&key)?;
            println!("OK {}", version);
        }
        Commands::Ping => {
            client.ping()?;
            println!("PONG");
        }
        Commands::Fetch { since, limit } => {
            let batch = client.fetch(since, limit)?;
            println!("last_index {}", batch.last_index);
            for record in &batch.records {
                let entry = &record.entry;
                match entry.live_value() {
                    Some(value) => println!(
                        "{} {} {} = {}",
                        record.index,
                        entry.version,
                        entry.key,
                        String::from_utf8_lossy(value)
                    ),
                    None => println!("{} {} {} (deleted)", record.index, entry.version, entry.key),
                }
            }
            if let Some(e) = batch.corrupt {
                println!("(corrupt) {}", e);
            }
        }
    }

    Ok(())
}
