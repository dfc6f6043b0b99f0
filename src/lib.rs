//! # DriftKV
//!
//! A small clustered key-value store with:
//! - Timeout-bounded per-key locking
//! - A backup log for crash recovery, with torn-tail and corruption handling
//! - Last-writer-wins versions from a Lamport clock
//! - Pull-based replication: every node polls every peer's log
//!
//! ## Architecture Overview
//!
//! ```text
//!   clients                                   peers
//!      │ GET/PUT/DELETE/PING                     │ FETCH/PING
//! ┌────▼──────────────┐               ┌──────────▼────────┐
//! │  Server (client)  │               │ Server (replicate)│
//! └────┬──────────────┘               └──────────┬────────┘
//!      │                                         │
//! ┌────▼─────────────────────────────────────────▼────────┐
//! │                        Engine                          │
//! │        lock ─▶ version ─▶ log append ─▶ table          │
//! └────┬──────────────┬──────────────┬────────────▲────────┘
//!      │              │              │            │ apply_replicated
//!      ▼              ▼              ▼            │
//! ┌──────────┐  ┌────────────┐ ┌───────────┐ ┌────┴─────────────┐
//! │   Lock   │  │ Backup Log │ │StoreTable │ │ Replication      │
//! │ Manager  │  │  (append)  │ │ (sharded) │ │ Poller (1/peer)  │
//! └──────────┘  └────────────┘ └───────────┘ └──────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod lock;
pub mod store;
pub mod backup;
pub mod engine;
pub mod protocol;
pub mod network;
pub mod cluster;
pub mod node;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DriftError, Result};
pub use config::Config;
pub use engine::Engine;
pub use node::Node;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of DriftKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
