//! Backup Log Module
//!
//! Durability and replication feed through append-only logging.
//!
//! ## Responsibilities
//! - Append a record for every accepted write, under the key lock
//! - CRC32 checksums for corruption detection
//! - Monotonic indices for ordering and peer cursors
//! - Crash recovery and replay
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Record 1                                     │
//! │ ┌───────────┬─────────┬─────────┬──────────┐ │
//! │ │ Index (8) │ CRC (4) │ Len (4) │ Entry    │ │
//! │ └───────────┴─────────┴─────────┴──────────┘ │
//! ├──────────────────────────────────────────────┤
//! │ Record 2                                     │
//! │ ┌───────────┬─────────┬─────────┬──────────┐ │
//! │ │ Index (8) │ CRC (4) │ Len (4) │ Entry    │ │
//! │ └───────────┴─────────┴─────────┴──────────┘ │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The entry is bincode-encoded; the CRC covers index and entry bytes.
//! FETCH responses carry records in exactly this format, at most
//! `MAX_BATCH_BYTES` per reply.

mod log;
mod record;
mod recovery;

pub use log::{BackupLog, Replay};
pub use record::{
    decode_records, encode_records, LogIndex, LogRecord, RecordFrame, HEADER_SIZE,
    MAX_BATCH_BYTES, MAX_RECORD_SIZE,
};
pub use recovery::{LogRecovery, RecoveryReport};
