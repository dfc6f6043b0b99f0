//! Store Module
//!
//! In-memory state of a node.
//!
//! ## Responsibilities
//! - Hold exactly one current `Entry` per key
//! - Keep tombstones in place so deletions replicate
//! - Stamp writes with a `(clock, node_id)` version
//!
//! ## Data Structure Choice
//! Sharded `HashMap`s, each behind a `parking_lot::RwLock`:
//! - No ordering needed (nothing is flushed to sorted files)
//! - Reads of unrelated keys do not contend
//! - Write atomicity across store + log comes from the key lock

mod clock;
mod entry;
mod table;

pub use clock::LogicalClock;
pub use entry::{Entry, Version};
pub use table::StoreTable;
