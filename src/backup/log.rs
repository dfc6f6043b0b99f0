//! Backup Log
//!
//! Append-only record of accepted writes, optionally backed by a file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::SyncStrategy;
use crate::error::{DriftError, Result};
use crate::store::Entry;
use super::record::{LogIndex, LogRecord, MAX_BATCH_BYTES};
use super::recovery::{rewrite_log, LogRecovery, RecoveryReport};

/// Append-only log of committed entries
///
/// Every record stays in memory so peers can FETCH it. A *durable* log also
/// writes each record to a file before `append` returns; a *volatile* log
/// (`backup_on_write = false`) keeps memory only.
pub struct BackupLog {
    /// Log file, `None` for a volatile log
    path: Option<PathBuf>,

    sync_strategy: SyncStrategy,

    inner: Mutex<LogInner>,

    /// What recovery found when the log was opened
    recovery: RecoveryReport,
}

struct LogInner {
    /// Append handle, `None` for a volatile log
    file: Option<File>,

    /// Bytes of the file that hold complete records
    file_len: u64,

    /// Records in index order (indices increase, gaps allowed)
    records: Vec<LogRecord>,

    next_index: LogIndex,

    /// Appends since the last fsync
    uncommitted: usize,
}

impl BackupLog {
    /// Open or create a durable log, recovering whatever the file holds
    pub fn open(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (records, recovery) = LogRecovery::recover(path)?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file_len = file.metadata()?.len();
        // Never reuse the index of a record that was quarantined
        let next_index = recovery.last_index.max(recovery.high_water).saturating_add(1);

        tracing::info!(
            path = %path.display(),
            recovered = recovery.entries_recovered,
            corrupted = recovery.entries_corrupted,
            high_water = recovery.high_water,
            truncated = recovery.was_truncated,
            "backup log opened"
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            sync_strategy,
            inner: Mutex::new(LogInner {
                file: Some(file),
                file_len,
                records,
                next_index,
                uncommitted: 0,
            }),
            recovery,
        })
    }

    /// An in-memory log that never touches disk
    pub fn volatile() -> Self {
        Self {
            path: None,
            sync_strategy: SyncStrategy::EveryWrite,
            inner: Mutex::new(LogInner {
                file: None,
                file_len: 0,
                records: Vec::new(),
                next_index: 1,
                uncommitted: 0,
            }),
            recovery: RecoveryReport::default(),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Append an entry and return its index
    ///
    /// For a durable log the record is on disk (per the sync strategy)
    /// before this returns. On failure the log is left as it was and the
    /// error is a `DurabilityFailure`.
    pub fn append(&self, entry: &Entry) -> Result<LogIndex> {
        let mut inner = self.inner.lock();
        let record = LogRecord::new(inner.next_index, entry.clone());

        if self.path.is_some() {
            let bytes = record.encode()?;
            let sync_due = match self.sync_strategy {
                SyncStrategy::EveryWrite => true,
                SyncStrategy::EveryNEntries { count } => inner.uncommitted + 1 >= count,
            };

            let file_len = inner.file_len;
            let file = inner.file.as_mut().ok_or_else(|| {
                DriftError::DurabilityFailure("backup log file is not open".to_string())
            })?;
            let written = file
                .write_all(&bytes)
                .and_then(|_| if sync_due { file.sync_data() } else { Ok(()) });

            if let Err(e) = written {
                // Cut any partial record so later appends stay readable
                if let Err(trim) = file.set_len(file_len) {
                    tracing::error!(error = %trim, "failed to trim partial backup log record");
                }
                return Err(DriftError::DurabilityFailure(e.to_string()));
            }

            inner.file_len += bytes.len() as u64;
            inner.uncommitted = if sync_due { 0 } else { inner.uncommitted + 1 };
        } else {
            // Volatile records are still served over FETCH
            LogRecord::encoded_len(entry)?;
        }

        let index = record.index;
        inner.records.push(record);
        inner.next_index += 1;
        Ok(index)
    }

    /// Lazily iterate records with index >= `index`, in log order
    pub fn replay_from(&self, index: LogIndex) -> Replay<'_> {
        Replay { log: self, next: index }
    }

    /// Up to `limit` records with index > `since`
    ///
    /// The batch also stops before its encoded size would pass
    /// `MAX_BATCH_BYTES`, but always holds at least one record when any
    /// follow `since`.
    pub fn records_after(&self, since: LogIndex, limit: usize) -> Vec<LogRecord> {
        let inner = self.inner.lock();
        let start = inner.records.partition_point(|r| r.index <= since);

        let mut batch = Vec::new();
        let mut bytes = 0;
        for record in inner.records[start..].iter().take(limit) {
            let len = LogRecord::encoded_len(&record.entry).unwrap_or(MAX_BATCH_BYTES);
            if !batch.is_empty() && bytes + len > MAX_BATCH_BYTES {
                break;
            }
            bytes += len;
            batch.push(record.clone());
        }
        batch
    }

    /// Drop every record with index < `index`; returns how many were dropped
    ///
    /// The newest record is always kept so the index sequence survives a
    /// restart. Durable logs are rewritten through a temporary file and a
    /// rename; if that fails nothing is dropped.
    pub fn truncate_before(&self, index: LogIndex) -> Result<usize> {
        let mut inner = self.inner.lock();
        let held = inner.records.len();
        let cut = inner
            .records
            .partition_point(|r| r.index < index)
            .min(held.saturating_sub(1));
        if cut == 0 {
            return Ok(0);
        }

        if let Some(path) = &self.path {
            // The old handle stays valid until the new file is in place
            rewrite_log(path, &inner.records[cut..])?;
            inner.records.drain(..cut);

            // Appends fail with DurabilityFailure until a handle is back
            inner.file = None;
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            inner.file_len = file.metadata()?.len();
            inner.file = Some(file);
            inner.uncommitted = 0;
        } else {
            inner.records.drain(..cut);
        }

        tracing::debug!(dropped = cut, before = index, "backup log compacted");
        Ok(cut)
    }

    /// Index of the most recent append (0 when nothing was ever appended)
    pub fn last_index(&self) -> LogIndex {
        self.inner.lock().next_index - 1
    }

    /// Index of the oldest record still held
    pub fn first_index(&self) -> Option<LogIndex> {
        self.inner.lock().records.first().map(|r| r.index)
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends not yet fsynced
    pub fn uncommitted_count(&self) -> usize {
        self.inner.lock().uncommitted
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if self.path.is_some() {
            let file = inner.file.as_mut().ok_or_else(|| {
                DriftError::DurabilityFailure("backup log file is not open".to_string())
            })?;
            file.sync_data()
                .map_err(|e| DriftError::DurabilityFailure(e.to_string()))?;
        }
        inner.uncommitted = 0;
        Ok(())
    }
}

/// Iterator over log records, see [`BackupLog::replay_from`]
///
/// Each step takes the log's lock briefly, so appends made while iterating
/// are picked up.
pub struct Replay<'a> {
    log: &'a BackupLog,
    next: LogIndex,
}

impl Iterator for Replay<'_> {
    type Item = LogRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.log.inner.lock();
        let pos = inner.records.partition_point(|r| r.index < self.next);
        let record = inner.records.get(pos)?.clone();
        self.next = record.index + 1;
        Some(record)
    }
}
