//! Lock Manager Module
//!
//! Per-key, timeout-bounded mutual exclusion.
//!
//! ## Responsibilities
//! - Serialize `put` / `delete` / `apply_replicated` on the same key
//! - Give up after `lock_timeout` instead of blocking forever
//! - Let shutdown wait for in-flight writers (`drain`)
//!
//! ## Ordering rule
//! No operation holds more than one key's stripe. Anything that ever needs
//! several must take them in ascending stripe order, as `drain` does.

mod manager;

pub use manager::{DrainGuard, LockManager, LockToken};
pub(crate) use manager::stripe_index;
