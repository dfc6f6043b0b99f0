//! Backup log recovery
//!
//! Handles crash recovery by scanning the log file.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytes::Buf;

use crate::error::Result;
use super::record::{encode_records, LogIndex, LogRecord, RecordFrame, HEADER_SIZE};

/// Handles backup log recovery after a crash
pub struct LogRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of records successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupt records quarantined
    pub entries_corrupted: u64,

    /// Last valid index (0 when nothing was recovered)
    pub last_index: LogIndex,

    /// Highest index any record ever held, corrupt or quarantined ones
    /// included; new appends start above it
    pub high_water: LogIndex,

    /// Whether a torn tail was cut off the file
    pub was_truncated: bool,
}

/// What a scan of the raw file found
struct Scan<'a> {
    records: Vec<LogRecord>,
    corrupt: Vec<(LogIndex, String, &'a [u8])>,
    /// Length of the well-framed prefix
    valid_len: usize,
    torn: bool,
    high_water: LogIndex,
}

impl LogRecovery {
    /// Recover records from a backup log file
    ///
    /// This will:
    /// 1. Read all valid records in file order
    /// 2. Quarantine corrupt records whose framing is intact
    /// 3. Truncate a torn tail (partial write at crash time)
    /// 4. Return the valid records
    ///
    /// A missing file recovers to nothing.
    pub fn recover(path: &Path) -> Result<(Vec<LogRecord>, RecoveryReport)> {
        if !path.exists() {
            return Ok((Vec::new(), RecoveryReport::default()));
        }

        let bytes = read_log(path)?;
        let scan = Self::scan(&bytes);
        let report = Self::report(&scan, Self::quarantined_high_water(path)?);

        if !scan.corrupt.is_empty() {
            let quarantine = Self::quarantine_path(path);
            let mut file = OpenOptions::new().create(true).append(true).open(&quarantine)?;
            for (index, reason, raw) in &scan.corrupt {
                tracing::warn!(index, %reason, "quarantining corrupt backup log record");
                file.write_all(raw)?;
            }
            file.sync_all()?;

            // Rewriting also drops a torn tail
            rewrite_log(path, &scan.records)?;
        } else if scan.torn {
            tracing::warn!(
                valid_len = scan.valid_len,
                file_len = bytes.len(),
                "truncating torn tail of backup log"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scan.valid_len as u64)?;
            file.sync_all()?;
        }

        Ok((scan.records, report))
    }

    /// Verify integrity of a backup log file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryReport> {
        if !path.exists() {
            return Ok(RecoveryReport::default());
        }

        let bytes = read_log(path)?;
        Ok(Self::report(&Self::scan(&bytes), Self::quarantined_high_water(path)?))
    }

    /// Where corrupt records of `path` are set aside
    pub fn quarantine_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".quarantine");
        PathBuf::from(name)
    }

    /// Highest index among the frames set aside in the quarantine file
    ///
    /// Quarantined frames are whole, so their headers can be walked even
    /// though their contents are bad.
    fn quarantined_high_water(path: &Path) -> Result<LogIndex> {
        let quarantine = Self::quarantine_path(path);
        if !quarantine.exists() {
            return Ok(0);
        }

        let bytes = read_log(&quarantine)?;
        let mut rest = &bytes[..];
        let mut high: LogIndex = 0;
        while rest.len() >= HEADER_SIZE {
            let mut header = &rest[..HEADER_SIZE];
            let index = header.get_u64();
            let _crc = header.get_u32();
            let len = header.get_u32() as usize;

            high = high.max(index);
            rest = &rest[(HEADER_SIZE + len).min(rest.len())..];
        }
        Ok(high)
    }

    fn scan(bytes: &[u8]) -> Scan<'_> {
        let mut scan = Scan {
            records: Vec::new(),
            corrupt: Vec::new(),
            valid_len: 0,
            torn: false,
            high_water: 0,
        };
        let mut last_index: LogIndex = 0;

        while scan.valid_len < bytes.len() {
            match LogRecord::read_frame(&bytes[scan.valid_len..]) {
                RecordFrame::Valid { record, len } => {
                    if record.index <= last_index {
                        let raw = &bytes[scan.valid_len..scan.valid_len + len];
                        let reason = format!(
                            "index {} does not follow {}",
                            record.index, last_index
                        );
                        scan.corrupt.push((record.index, reason, raw));
                    } else {
                        last_index = record.index;
                        scan.high_water = scan.high_water.max(record.index);
                        scan.records.push(record);
                    }
                    scan.valid_len += len;
                }
                RecordFrame::Corrupt { index, reason, raw } => {
                    // The header index is unverified, but the record held
                    // some index past everything before it
                    scan.high_water = index.max(scan.high_water.saturating_add(1));
                    scan.valid_len += raw.len();
                    scan.corrupt.push((index, reason, raw));
                }
                RecordFrame::Torn { reason } => {
                    tracing::debug!(%reason, offset = scan.valid_len, "torn backup log tail");
                    scan.torn = true;
                    break;
                }
            }
        }

        scan
    }

    fn report(scan: &Scan<'_>, quarantined: LogIndex) -> RecoveryReport {
        RecoveryReport {
            entries_recovered: scan.records.len() as u64,
            entries_corrupted: scan.corrupt.len() as u64,
            last_index: scan.records.last().map(|r| r.index).unwrap_or(0),
            high_water: scan.high_water.max(quarantined),
            was_truncated: scan.torn,
        }
    }
}

/// Read the bytes the file held when opened
fn read_log(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut bytes = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Atomically replace the log at `path` with exactly `records`
pub(super) fn rewrite_log(path: &Path, records: &[LogRecord]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".rewrite");
    let tmp = PathBuf::from(tmp);

    let bytes = encode_records(records)?;
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
