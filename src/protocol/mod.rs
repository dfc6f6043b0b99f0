//! Protocol Module
//!
//! Defines the wire protocol for client and peer communication.
//!
//! ## Protocol Format (Simple Binary)
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands
//! - 0x01: GET   - Payload: key_len (4) + key            (client port)
//! - 0x02: PUT   - Payload: key_len (4) + key + value    (client port)
//! - 0x03: DEL   - Payload: key_len (4) + key            (client port)
//! - 0x04: PING  - Payload: empty                        (both ports)
//! - 0x05: FETCH - Payload: since (8) + limit (4)        (kv port)
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK        (GET: value, PUT/DEL: clock (8) + node id, FETCH: last index (8) + log records)
//! - 0x01: NOT_FOUND
//! - 0x02: ERROR     (message)

mod codec;
mod command;
mod response;

pub use codec::{
    decode_command, decode_response, encode_command, encode_response, read_command,
    read_response, write_command, write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use command::{Command, CommandType};
pub use response::{FetchBatch, Response, Status};
