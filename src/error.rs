//! Error types for driftkv
//!
//! Provides a unified error type for all operations.
//!
//! A missing key is not an error: lookups return `Option` and the wire
//! protocol answers with `NOT_FOUND`.

use thiserror::Error;

/// Result type alias using DriftError
pub type Result<T> = std::result::Result<T, DriftError>;

/// Unified error type for driftkv operations
#[derive(Debug, Error)]
pub enum DriftError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Locking Errors
    // -------------------------------------------------------------------------
    #[error("Lock on key '{key}' not acquired within {timeout_ms} ms")]
    LockTimeout { key: String, timeout_ms: u64 },

    // -------------------------------------------------------------------------
    // Backup Log Errors
    // -------------------------------------------------------------------------
    #[error("Backup log append failed: {0}")]
    DurabilityFailure(String),

    #[error("Corrupt log entry at index {index}: {reason}")]
    CorruptLogEntry { index: u64, reason: String },

    #[error("Record for key '{key}' is {size} bytes, over the {max} byte limit")]
    RecordTooLarge { key: String, size: usize, max: usize },

    // -------------------------------------------------------------------------
    // Replication Errors
    // -------------------------------------------------------------------------
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("Peer {peer} did not answer within {timeout_ms} ms")]
    PeerTimeout { peer: String, timeout_ms: u64 },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Remote(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl From<bincode::Error> for DriftError {
    fn from(err: bincode::Error) -> Self {
        DriftError::Serialization(err.to_string())
    }
}

impl DriftError {
    /// Whether the failure is transient and the caller may simply retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriftError::LockTimeout { .. }
                | DriftError::PeerUnreachable { .. }
                | DriftError::PeerTimeout { .. }
        )
    }
}
