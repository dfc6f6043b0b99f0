//! Cluster Module
//!
//! Static membership and pull-based replication between nodes.
//!
//! ## Replication
//! ```text
//!   node A                               node B
//!  ┌──────────┐   FETCH since=cursor    ┌──────────┐
//!  │  Poller  │ ──────────────────────▶ │ kv_port  │
//!  │ (peer B) │ ◀────────────────────── │ BackupLog│
//!  └────┬─────┘   records (index > c)   └──────────┘
//!       │ apply_replicated (last-writer-wins)
//!       ▼
//!    Engine
//! ```
//!
//! Every applied record is appended to the local log, so it is served to
//! other peers in turn. Stale records are not, which ends echo loops.

mod directory;
mod poller;

pub use directory::NodeDirectory;
pub use poller::{PeerCursor, PeerPoller, PollReport, PollState, PollerOptions, ReplicationPoller};
