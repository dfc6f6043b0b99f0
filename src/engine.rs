//! Engine Module
//!
//! The store engine that coordinates all local components.
//!
//! ## Responsibilities
//! - Coordinate Lock Manager, Backup Log and Store table
//! - Stamp local writes with `(clock, node_id)` versions
//! - Merge replicated entries with last-writer-wins
//! - Rebuild the store from the log on startup

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backup::{BackupLog, LogIndex, LogRecord, RecoveryReport};
use crate::config::Config;
use crate::error::{DriftError, Result};
use crate::lock::LockManager;
use crate::protocol::{Command, Response};
use crate::store::{Entry, LogicalClock, StoreTable, Version};

/// What `apply_replicated` did with an incoming entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The entry was newer and is now the key's current entry
    Applied { index: LogIndex },

    /// The local entry is at least as new; nothing changed
    Stale,
}

/// The main store engine
///
/// ## Concurrency Model: per-key serialization
///
/// - **Writes** (put/delete/apply_replicated): hold the key's stripe from
///   the version decision through log append and table update
///   - Same key: strictly serialized
///   - Different keys: run in parallel (unless they share a stripe)
///
/// - **Reads** (get): no key lock
///   - The table shard's RwLock makes the single read atomic
///     with respect to a concurrent writer of that key
///
/// The log is appended before the table is updated, so a failed append
/// leaves the store untouched.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Directory holding this node's backup log
    data_dir: PathBuf,

    /// Current entry per key
    table: StoreTable,

    /// Per-key timed locks
    locks: LockManager,

    /// Append-only record of accepted writes (durable or volatile)
    log: BackupLog,

    /// Lamport clock for version stamps
    clock: LogicalClock,

    /// Set once `close` starts; writes are refused afterwards
    closed: AtomicBool,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LOG_FILENAME: &'static str = "backup.log";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config and create the node's data directory
    /// 2. Open the backup log (recovering it when durable)
    /// 3. Replay the log into the table, last record per key wins
    /// 4. Advance the clock past every replayed version
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Create data directory if it doesn't exist
        let data_dir = config.node_data_dir();
        fs::create_dir_all(&data_dir)?;

        // Step 2: Open the backup log
        let log = if config.backup_on_write {
            BackupLog::open(&data_dir.join(Self::LOG_FILENAME), config.sync_strategy)?
        } else {
            tracing::warn!(
                node = %config.node.node_id,
                "backup_on_write disabled; recovery relies on replication"
            );
            BackupLog::volatile()
        };

        // Step 3: Replay
        let table = StoreTable::new();
        let clock = LogicalClock::new();
        let mut replayed = 0u64;
        for record in log.replay_from(0) {
            clock.observe(record.entry.version.clock);
            table.insert(record.entry);
            replayed += 1;
        }

        tracing::info!(
            node = %config.node.node_id,
            replayed,
            keys = table.entry_count(),
            clock = clock.now(),
            "engine opened"
        );

        Ok(Self {
            locks: LockManager::new(config.lock_timeout()),
            config,
            data_dir,
            table,
            log,
            clock,
            closed: AtomicBool::new(false),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Execute a command
    ///
    /// Routes commands to appropriate handlers
    pub fn execute(&self, command: Command) -> Result<Response> {
        match command {
            Command::Get { key } => Ok(match self.get(&key) {
                Some(value) => Response::ok(Some(value)),
                None => Response::not_found(),
            }),
            Command::Put { key, value } => {
                let version = self.put(&key, &value)?;
                Ok(Response::ack(&version))
            }
            Command::Delete { key } => {
                let version = self.delete(&key)?;
                Ok(Response::ack(&version))
            }
            Command::Ping => Ok(Response::ok(Some(b"PONG".to_vec()))),
            Command::Fetch { since, limit } => {
                let records = self.fetch_since(since, limit as usize);
                Response::fetched(self.log.last_index(), &records)
            }
        }
    }

    /// Get a value by key
    ///
    /// `None` when the key is absent or deleted.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.table
            .get(key)
            .filter(|entry| !entry.tombstone)
            .map(|entry| entry.value)
    }

    /// Current entry for a key, tombstones included
    pub fn entry(&self, key: &str) -> Option<Entry> {
        self.table.get(key)
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire key lock (fails with `LockTimeout`)
    /// 2. Stamp a fresh version (fails with `RecordTooLarge` when the
    ///    record could not be served to peers)
    /// 3. Append to the backup log (fails with `DurabilityFailure`)
    /// 4. Advance the clock and write to the table
    ///
    /// A failure leaves the table, the log and the clock as they were.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<Version> {
        self.write_local(key, Some(value))
    }

    /// Delete a key
    ///
    /// Same steps as `put`, writing a tombstone so the deletion replicates.
    pub fn delete(&self, key: &str) -> Result<Version> {
        self.write_local(key, None)
    }

    fn write_local(&self, key: &str, value: Option<&[u8]>) -> Result<Version> {
        let token = self.locks.lock(key)?;
        self.ensure_open()?;

        let version = Version::new(self.clock.peek_next(), self.node_id());
        let entry = match value {
            Some(value) => Entry::value(key, value, version.clone()),
            None => Entry::tombstone(key, version.clone()),
        };
        // A record peers could never FETCH is refused up front
        LogRecord::encoded_len(&entry)?;

        let index = self.log.append(&entry)?;
        self.clock.observe(version.clock);
        self.table.insert(entry);
        self.locks.release(token);

        tracing::trace!(key, %version, index, tombstone = value.is_none(), "local write");
        Ok(version)
    }

    /// Merge an entry received from a peer
    ///
    /// Applies it only if its version beats the local one; otherwise it is
    /// discarded. Re-applying an entry is a no-op.
    pub fn apply_replicated(&self, entry: Entry) -> Result<ApplyOutcome> {
        let token = self.locks.lock(&entry.key)?;
        self.ensure_open()?;

        self.clock.observe(entry.version.clock);

        if let Some(current) = self.table.get(&entry.key) {
            if !entry.supersedes(&current) {
                return Ok(ApplyOutcome::Stale);
            }
        }

        let index = self.log.append(&entry)?;
        tracing::trace!(key = %entry.key, version = %entry.version, index, "replicated write");
        self.table.insert(entry);
        self.locks.release(token);

        Ok(ApplyOutcome::Applied { index })
    }

    /// Log records with index > `since`, at most `limit`
    pub fn fetch_since(&self, since: LogIndex, limit: usize) -> Vec<LogRecord> {
        self.log.records_after(since, limit)
    }

    /// Close the engine gracefully
    ///
    /// Refuses new writes, waits for every in-flight writer to leave its
    /// critical section, then syncs the log.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let drained = self.locks.drain();
        let synced = self.log.sync();
        drop(drained);

        tracing::info!(node = %self.node_id(), "engine closed");
        synced
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriftError::ShuttingDown);
        }
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// This node's id
    pub fn node_id(&self) -> &str {
        &self.config.node.node_id
    }

    /// Get the node's data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Every entry in key order, tombstones included
    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        self.table.snapshot()
    }

    /// Number of keys, tombstones included
    pub fn entry_count(&self) -> usize {
        self.table.entry_count()
    }

    /// Current logical clock reading
    pub fn clock(&self) -> u64 {
        self.clock.now()
    }

    /// Lock manager guarding the keys
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Backup log
    pub fn log(&self) -> &BackupLog {
        &self.log
    }

    /// What recovery found on open
    pub fn recovery_report(&self) -> &RecoveryReport {
        self.log.recovery_report()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
