//! Entry and Version definitions
//!
//! An `Entry` is a key's current value plus the version that wrote it.
//! Versions are totally ordered, which is all last-writer-wins needs.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Version stamp of a write: a logical clock reading plus the writing node
///
/// Ordered by `clock` first, then by `node_id` (lexicographically); the
/// greater version wins a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub clock: u64,
    pub node_id: String,
}

impl Version {
    pub fn new(clock: u64, node_id: impl Into<String>) -> Self {
        Self {
            clock,
            node_id: node_id.into(),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.clock
            .cmp(&other.clock)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.clock, self.node_id)
    }
}

/// A key's value, version and deletion marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,

    /// Empty for tombstones
    pub value: Vec<u8>,

    pub version: Version,

    /// Deletion marker, replicated like any other write
    pub tombstone: bool,
}

impl Entry {
    /// A live value
    pub fn value(key: impl Into<String>, value: impl Into<Vec<u8>>, version: Version) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            version,
            tombstone: false,
        }
    }

    /// A deletion marker
    pub fn tombstone(key: impl Into<String>, version: Version) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            version,
            tombstone: true,
        }
    }

    /// Last-writer-wins: does this entry replace `current`?
    pub fn supersedes(&self, current: &Entry) -> bool {
        self.version > current.version
    }

    /// The value visible to readers (`None` for tombstones)
    pub fn live_value(&self) -> Option<&[u8]> {
        if self.tombstone {
            None
        } else {
            Some(&self.value)
        }
    }

    /// Approximate in-memory footprint
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len() + self.version.node_id.len() + 16
    }
}
