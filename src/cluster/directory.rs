//! Node Directory
//!
//! Static membership table, built once from config.

use std::collections::BTreeMap;

use crate::config::{Config, NodeSettings};
use crate::error::{DriftError, Result};

/// Immutable node id → addressing table
#[derive(Debug, Clone)]
pub struct NodeDirectory {
    local_id: String,
    nodes: BTreeMap<String, NodeSettings>,
}

impl NodeDirectory {
    /// Build the directory for `local_id` out of a node table
    pub fn new(local_id: &str, nodes: impl IntoIterator<Item = NodeSettings>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for node in nodes {
            let id = node.node_id.clone();
            if table.insert(id.clone(), node).is_some() {
                return Err(DriftError::Config(format!("duplicate node_id '{}'", id)));
            }
        }

        if !table.contains_key(local_id) {
            return Err(DriftError::Config(format!(
                "local node '{}' missing from the node table",
                local_id
            )));
        }

        Ok(Self {
            local_id: local_id.to_string(),
            nodes: table,
        })
    }

    /// Build from a validated config
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.node.node_id, config.nodes.iter().cloned())
    }

    /// This node
    pub fn local(&self) -> &NodeSettings {
        &self.nodes[&self.local_id]
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeSettings> {
        self.nodes.get(node_id)
    }

    /// Every node except this one, in node id order
    pub fn list_peers(&self) -> impl Iterator<Item = &NodeSettings> + '_ {
        self.nodes
            .values()
            .filter(move |node| node.node_id != self.local_id)
    }

    pub fn peer_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Total members, this node included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
