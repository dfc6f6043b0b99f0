//! Configuration for driftkv
//!
//! Centralized, immutable configuration with sensible defaults. A `Config`
//! is built once at startup (through [`ConfigBuilder`] or from a YAML file)
//! and handed to the engine, the servers and the replication poller.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};

/// Main configuration for a driftkv node
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for backup logs
    /// Internal structure:
    ///   {data_dir}/
    ///     └── {node_id}/
    ///           ├── backup.log             (append-only write log)
    ///           └── backup.log.quarantine  (corrupt records set aside)
    pub data_dir: PathBuf,

    /// Whether every accepted write is appended durably before returning
    pub backup_on_write: bool,

    /// Sync strategy: how often to fsync the backup log
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Locking Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on waiting for a key lock (milliseconds)
    pub lock_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Replication Configuration
    // -------------------------------------------------------------------------
    /// Period of the replication poller (milliseconds)
    pub poll_interval_ms: u64,

    /// Timeout for a single FETCH round trip to a peer (milliseconds)
    pub fetch_timeout_ms: u64,

    /// Maximum records requested per FETCH
    pub fetch_batch_size: u32,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Max concurrent connections per listener
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------
    /// Diagnostic log file used by the server binary (stderr when unset)
    pub log_path: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------
    /// This node
    pub node: NodeSettings,

    /// Every node of the cluster, this one included
    pub nodes: Vec<NodeSettings>,
}

/// Backup log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// Flush to the OS on every append, fsync after N appends
    EveryNEntries { count: usize },
}

/// Addressing for one node of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeSettings {
    pub node_id: String,

    #[serde(default = "default_host")]
    pub host: String,

    /// Client-facing GET/PUT/DELETE port
    pub listen_port: u16,

    /// Peer-to-peer replication port
    pub kv_port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl NodeSettings {
    pub fn new(node_id: impl Into<String>, listen_port: u16, kv_port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            host: default_host(),
            listen_port,
            kv_port,
        }
    }

    /// Set the host the ports are bound on / reached at
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// `host:listen_port`
    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.host, self.listen_port)
    }

    /// `host:kv_port`
    pub fn replication_addr(&self) -> String {
        format!("{}:{}", self.host, self.kv_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        let node = NodeSettings::new("node1", 7001, 8001);
        Self {
            data_dir: PathBuf::from("./driftkv_data"),
            backup_on_write: true,
            sync_strategy: SyncStrategy::EveryWrite,
            lock_timeout_ms: 1000,
            poll_interval_ms: 1000,
            fetch_timeout_ms: 500,
            fetch_batch_size: 1024,
            max_connections: 1024,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            log_path: None,
            nodes: vec![node.clone()],
            node,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory holding this node's backup log
    pub fn node_data_dir(&self) -> PathBuf {
        self.data_dir.join(&self.node.node_id)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fetch timeout, never longer than one poll interval
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms.min(self.poll_interval_ms))
    }

    /// Check the invariants the rest of the node relies on
    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(DriftError::Config("lock_timeout must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(DriftError::Config("poll_interval must be positive".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(DriftError::Config("fetch_timeout must be positive".into()));
        }
        if self.fetch_batch_size == 0 {
            return Err(DriftError::Config("fetch_batch_size must be positive".into()));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(DriftError::Config("sync_strategy count must be positive".into()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.node_id.is_empty() {
                return Err(DriftError::Config("node_id must not be empty".into()));
            }
            if !seen.insert(node.node_id.as_str()) {
                return Err(DriftError::Config(format!(
                    "duplicate node_id '{}'",
                    node.node_id
                )));
            }
        }
        if !self.nodes.contains(&self.node) {
            return Err(DriftError::Config(format!(
                "local node '{}' missing from the node table",
                self.node.node_id
            )));
        }

        Ok(())
    }

    // =========================================================================
    // YAML loading
    // =========================================================================

    /// Load a cluster file and select `local` as this node
    ///
    /// The file carries a `kv:` section with the shared settings and one
    /// top-level section per node:
    ///
    /// ```yaml
    /// kv:
    ///   data_dir: ./data
    ///   lock_timeout: 500
    ///   poll_interval: 100
    ///   backup_on_write: true
    ///   log_path: ./driftkv.log
    /// node1: { node_id: node1, listen_port: 7001, kv_port: 8001 }
    /// ```
    pub fn from_yaml_file(path: &Path, local: &str) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DriftError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text, local)
    }

    /// Parse cluster YAML text and select `local` as this node
    pub fn from_yaml_str(text: &str, local: &str) -> Result<Self> {
        let file: ClusterFile =
            serde_yaml::from_str(text).map_err(|e| DriftError::Config(e.to_string()))?;

        let node = file
            .nodes
            .get(local)
            .or_else(|| file.nodes.values().find(|n| n.node_id == local))
            .cloned()
            .ok_or_else(|| DriftError::Config(format!("no section for node '{}'", local)))?;

        let defaults = Config::default();
        let kv = file.kv;
        let config = Config {
            data_dir: kv.data_dir,
            backup_on_write: kv.backup_on_write,
            sync_strategy: kv.sync_strategy.unwrap_or(defaults.sync_strategy),
            lock_timeout_ms: kv.lock_timeout,
            poll_interval_ms: kv.poll_interval,
            fetch_timeout_ms: kv.fetch_timeout.unwrap_or(defaults.fetch_timeout_ms),
            fetch_batch_size: kv.fetch_batch_size.unwrap_or(defaults.fetch_batch_size),
            max_connections: kv.max_connections.unwrap_or(defaults.max_connections),
            read_timeout_ms: defaults.read_timeout_ms,
            write_timeout_ms: defaults.write_timeout_ms,
            log_path: kv.log_path,
            nodes: file.nodes.into_values().collect(),
            node,
        };
        config.validate()?;
        Ok(config)
    }
}

/// On-disk shape of the cluster file
#[derive(Debug, Deserialize)]
struct ClusterFile {
    kv: KvSection,

    #[serde(flatten)]
    nodes: BTreeMap<String, NodeSettings>,
}

#[derive(Debug, Deserialize)]
struct KvSection {
    data_dir: PathBuf,
    lock_timeout: u64,
    poll_interval: u64,
    backup_on_write: bool,
    #[serde(default)]
    log_path: Option<PathBuf>,
    #[serde(default)]
    fetch_timeout: Option<u64>,
    #[serde(default)]
    fetch_batch_size: Option<u32>,
    #[serde(default)]
    max_connections: Option<usize>,
    #[serde(default)]
    sync_strategy: Option<SyncStrategy>,
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all node directories)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Enable or disable the durable backup log
    pub fn backup_on_write(mut self, enabled: bool) -> Self {
        self.config.backup_on_write = enabled;
        self
    }

    /// Set the backup log sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the key lock timeout (in milliseconds)
    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    /// Set the replication poll interval (in milliseconds)
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the per-fetch timeout (in milliseconds)
    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fetch_timeout_ms = ms;
        self
    }

    /// Set the maximum number of records per fetch
    pub fn fetch_batch_size(mut self, size: u32) -> Self {
        self.config.fetch_batch_size = size;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the diagnostic log file
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = Some(path.into());
        self
    }

    /// Set the local node (replaces any node table entry with the same id)
    pub fn node(mut self, node: NodeSettings) -> Self {
        let old_id = self.config.node.node_id.clone();
        self.config
            .nodes
            .retain(|n| n.node_id != old_id && n.node_id != node.node_id);
        self.config.nodes.insert(0, node.clone());
        self.config.node = node;
        self
    }

    /// Add a peer to the node table
    pub fn peer(mut self, peer: NodeSettings) -> Self {
        self.config.nodes.push(peer);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
