//! Response definitions
//!
//! Represents responses to clients and peers.

use crate::backup::{decode_records, encode_records, LogIndex, LogRecord};
use crate::error::{DriftError, Result};
use crate::store::Version;

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
}

/// Records returned by FETCH
#[derive(Debug)]
pub struct FetchBatch {
    /// The peer's newest log index when it answered
    pub last_index: LogIndex,

    /// Well-formed records, in the peer's log order
    pub records: Vec<LogRecord>,

    /// Set when a record failed its checksum; records after it are dropped
    pub corrupt: Option<DriftError>,
}

/// A response to send back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Optional payload (value for GET, version for PUT/DELETE,
    /// records for FETCH, message for ERROR)
    pub payload: Option<Vec<u8>>,
}

impl Response {
    /// Create an OK response with optional payload
    pub fn ok(payload: Option<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// Create a NOT_FOUND response
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: None,
        }
    }

    /// Create an ERROR response
    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Some(message.as_bytes().to_vec()),
        }
    }

    /// Acknowledge a write: `clock (8) + node_id`
    pub fn ack(version: &Version) -> Self {
        let mut payload = Vec::with_capacity(8 + version.node_id.len());
        payload.extend_from_slice(&version.clock.to_be_bytes());
        payload.extend_from_slice(version.node_id.as_bytes());
        Self::ok(Some(payload))
    }

    /// Carry FETCH results: `last_index (8)` + records in log framing
    pub fn fetched(last_index: LogIndex, records: &[LogRecord]) -> Result<Self> {
        let mut payload = last_index.to_be_bytes().to_vec();
        payload.extend_from_slice(&encode_records(records)?);
        Ok(Self::ok(Some(payload)))
    }

    fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or(&[])
    }

    /// Decode the version carried by a write acknowledgement
    pub fn version(&self) -> Result<Version> {
        let payload = self.payload_bytes();
        if payload.len() < 8 {
            return Err(DriftError::Protocol(format!(
                "ack payload too short: {} bytes",
                payload.len()
            )));
        }
        let mut clock = [0u8; 8];
        clock.copy_from_slice(&payload[..8]);
        let node_id = String::from_utf8(payload[8..].to_vec())
            .map_err(|e| DriftError::Protocol(format!("ack node id: {}", e)))?;
        Ok(Version::new(u64::from_be_bytes(clock), node_id))
    }

    /// Decode a FETCH result, keeping the records before any bad one
    pub fn fetch_batch(&self) -> Result<FetchBatch> {
        let payload = self.payload_bytes();
        if payload.len() < 8 {
            return Err(DriftError::Protocol(format!(
                "fetch payload too short: {} bytes",
                payload.len()
            )));
        }
        let mut last_index = [0u8; 8];
        last_index.copy_from_slice(&payload[..8]);
        let (records, corrupt) = decode_records(&payload[8..]);

        Ok(FetchBatch {
            last_index: u64::from_be_bytes(last_index),
            records,
            corrupt,
        })
    }

    /// Error text of an ERROR response
    pub fn error_message(&self) -> String {
        String::from_utf8_lossy(self.payload_bytes()).into_owned()
    }
}
