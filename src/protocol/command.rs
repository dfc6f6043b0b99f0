//! Command definitions
//!
//! Represents requests from clients and peers.

use crate::backup::LogIndex;

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0x01,
    Put = 0x02,
    Delete = 0x03,
    Ping = 0x04,
    Fetch = 0x05,
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Get a value by key
    Get { key: String },

    /// Put a key-value pair
    Put { key: String, value: Vec<u8> },

    /// Delete a key
    Delete { key: String },

    /// Ping (health check)
    Ping,

    /// Log records with index > `since`, at most `limit` of them
    Fetch { since: LogIndex, limit: u32 },
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Get { .. } => CommandType::Get,
            Command::Put { .. } => CommandType::Put,
            Command::Delete { .. } => CommandType::Delete,
            Command::Ping => CommandType::Ping,
            Command::Fetch { .. } => CommandType::Fetch,
        }
    }
}
