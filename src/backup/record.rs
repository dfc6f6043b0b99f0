//! Log record definitions
//!
//! Framing shared by the backup log file and the FETCH wire payload.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};
use crate::store::Entry;

/// Position of a record in a node's log (first record is 1)
pub type LogIndex = u64;

/// Header size: index (8) + crc (4) + len (4)
pub const HEADER_SIZE: usize = 16;

/// Most bytes of encoded records one FETCH reply may carry
///
/// A reply is `last_index (8) | records` inside a 16 MB wire frame.
pub const MAX_BATCH_BYTES: usize = 16 * 1024 * 1024 - 8;

/// Largest payload a record may carry; any single record fits in a batch
pub const MAX_RECORD_SIZE: u32 = (MAX_BATCH_BYTES - HEADER_SIZE) as u32;

/// One committed entry and its log position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub index: LogIndex,
    pub entry: Entry,
}

/// Outcome of reading one frame from a byte buffer
#[derive(Debug)]
pub enum RecordFrame<'a> {
    /// Checksum verified and payload decoded; `len` bytes consumed
    Valid { record: LogRecord, len: usize },

    /// Framing intact but contents unusable; `raw` is the whole frame
    Corrupt {
        index: LogIndex,
        reason: String,
        raw: &'a [u8],
    },

    /// Not a whole frame: short header, short payload or absurd length
    Torn { reason: String },
}

impl LogRecord {
    pub fn new(index: LogIndex, entry: Entry) -> Self {
        Self { index, entry }
    }

    /// Encode to `| index | crc | len | bincode(entry) |`
    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Bytes a record carrying `entry` takes once encoded
    ///
    /// Fails with `RecordTooLarge` when the record could never be shipped in
    /// a FETCH reply.
    pub fn encoded_len(entry: &Entry) -> Result<usize> {
        let payload = bincode::serialized_size(entry)? as usize;
        check_payload(entry, payload)?;
        Ok(HEADER_SIZE + payload)
    }

    /// Append the encoded record to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        let payload = bincode::serialize(&self.entry)?;
        check_payload(&self.entry, payload.len())?;

        buf.reserve(HEADER_SIZE + payload.len());
        buf.put_u64(self.index);
        buf.put_u32(checksum(self.index, &payload));
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        Ok(())
    }

    /// Read the frame at the start of `bytes`
    pub fn read_frame(bytes: &[u8]) -> RecordFrame<'_> {
        if bytes.len() < HEADER_SIZE {
            return RecordFrame::Torn {
                reason: format!("short header: {} of {} bytes", bytes.len(), HEADER_SIZE),
            };
        }

        let mut header = &bytes[..HEADER_SIZE];
        let index = header.get_u64();
        let stored_crc = header.get_u32();
        let len = header.get_u32();

        if len > MAX_RECORD_SIZE {
            return RecordFrame::Torn {
                reason: format!("implausible length {} at index {}", len, index),
            };
        }

        let total = HEADER_SIZE + len as usize;
        if bytes.len() < total {
            return RecordFrame::Torn {
                reason: format!("short payload: {} of {} bytes", bytes.len() - HEADER_SIZE, len),
            };
        }

        let raw = &bytes[..total];
        let payload = &bytes[HEADER_SIZE..total];

        let computed = checksum(index, payload);
        if computed != stored_crc {
            return RecordFrame::Corrupt {
                index,
                reason: format!("crc mismatch: stored={:08x}, computed={:08x}", stored_crc, computed),
                raw,
            };
        }

        match bincode::deserialize::<Entry>(payload) {
            Ok(entry) => RecordFrame::Valid {
                record: LogRecord { index, entry },
                len: total,
            },
            Err(e) => RecordFrame::Corrupt {
                index,
                reason: format!("undecodable entry: {}", e),
                raw,
            },
        }
    }
}

fn check_payload(entry: &Entry, payload: usize) -> Result<()> {
    if payload > MAX_RECORD_SIZE as usize {
        return Err(DriftError::RecordTooLarge {
            key: entry.key.clone(),
            size: HEADER_SIZE + payload,
            max: MAX_BATCH_BYTES,
        });
    }
    Ok(())
}

/// CRC32 over the index and the payload
fn checksum(index: LogIndex, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&index.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Encode a run of records back to back
pub fn encode_records(records: &[LogRecord]) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    for record in records {
        record.encode_into(&mut buf)?;
    }
    Ok(buf.to_vec())
}

/// Decode records back to back, stopping at the first bad frame
///
/// Returns every record before the bad frame plus the error describing it.
pub fn decode_records(mut bytes: &[u8]) -> (Vec<LogRecord>, Option<DriftError>) {
    let mut records = Vec::new();

    while !bytes.is_empty() {
        match LogRecord::read_frame(bytes) {
            RecordFrame::Valid { record, len } => {
                records.push(record);
                bytes = &bytes[len..];
            }
            RecordFrame::Corrupt { index, reason, .. } => {
                return (records, Some(DriftError::CorruptLogEntry { index, reason }));
            }
            RecordFrame::Torn { reason } => {
                let index = records.last().map(|r| r.index + 1).unwrap_or(0);
                return (records, Some(DriftError::CorruptLogEntry { index, reason }));
            }
        }
    }

    (records, None)
}
