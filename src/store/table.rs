//! Store table implementation
//!
//! Sharded HashMap with one RwLock per shard.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::lock::stripe_index;
use super::Entry;

/// Number of shards (power of 2 so the hash can be masked)
const DEFAULT_SHARD_COUNT: usize = 64;

/// In-memory mapping from key to its current entry
///
/// ## Concurrency:
/// - Each shard has its own RwLock, held only for the map operation itself
/// - Readers of different shards never contend
/// - Read-modify-write sequences are serialized by the key lock, not here
pub struct StoreTable {
    shards: Box<[RwLock<HashMap<String, Entry>>]>,

    /// Approximate size in bytes
    size: AtomicUsize,

    /// Number of keys (tombstones included)
    entry_count: AtomicUsize,
}

impl StoreTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::with_shard_count(DEFAULT_SHARD_COUNT)
    }

    /// Create a table with a specific shard count (rounded up to a power of 2)
    pub fn with_shard_count(count: usize) -> Self {
        let count = count.max(1).next_power_of_two();
        let shards = (0..count).map(|_| RwLock::new(HashMap::new())).collect();

        Self {
            shards,
            size: AtomicUsize::new(0),
            entry_count: AtomicUsize::new(0),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Entry>> {
        &self.shards[stripe_index(key, self.shards.len())]
    }

    /// Get the current entry for a key (tombstones included)
    pub fn get(&self, key: &str) -> Option<Entry> {
        self.shard(key).read().get(key).cloned()
    }

    /// Insert or replace the entry for its key, returning the previous one
    pub fn insert(&self, entry: Entry) -> Option<Entry> {
        let added = entry.size();
        let previous = self.shard(&entry.key).write().insert(entry.key.clone(), entry);

        self.size.fetch_add(added, Ordering::Relaxed);
        match &previous {
            Some(old) => {
                self.size.fetch_sub(old.size(), Ordering::Relaxed);
            }
            None => {
                self.entry_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        previous
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Copy of every entry in key order
    ///
    /// Shards are read one at a time, so concurrent writers may be
    /// partially reflected.
    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        let mut out = BTreeMap::new();
        for shard in self.shards.iter() {
            let shard = shard.read();
            out.extend(shard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }
}

impl Default for StoreTable {
    fn default() -> Self {
        Self::new()
    }
}
