//! Network Module
//!
//! TCP servers, connection handling and the blocking client.
//!
//! ## Architecture
//! - One non-blocking acceptor per port (client `listen_port`, peer `kv_port`)
//! - One thread per accepted connection
//! - Commands routed through Engine, filtered by endpoint

mod client;
mod connection;
mod server;

pub use client::Client;
pub use connection::Connection;
pub use server::{Server, ShutdownHandle};

use crate::protocol::Command;

/// Which of a node's two ports a server listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `listen_port`: GET / PUT / DELETE / PING
    Client,

    /// `kv_port`: FETCH / PING
    Replication,
}

impl Endpoint {
    /// Whether `command` is accepted on this endpoint
    pub fn serves(&self, command: &Command) -> bool {
        match (self, command) {
            (_, Command::Ping) => true,
            (Endpoint::Client, Command::Fetch { .. }) => false,
            (Endpoint::Client, _) => true,
            (Endpoint::Replication, Command::Fetch { .. }) => true,
            (Endpoint::Replication, _) => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Client => "client",
            Endpoint::Replication => "replication",
        }
    }
}
