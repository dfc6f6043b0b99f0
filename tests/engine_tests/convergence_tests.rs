//! Convergence tests for last-writer-wins replication
//!
//! Several engines take random local writes while exchanging their logs in
//! random order, the way pollers would. Once every log has been fully merged
//! everywhere, all engines must hold the same entries.

use std::collections::HashMap;

use driftkv::config::{Config, NodeSettings};
use driftkv::engine::Engine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct Cluster {
    _temp: TempDir,
    engines: Vec<Engine>,

    /// cursors[(to, from)]: last index of `from`'s log merged into `to`
    cursors: HashMap<(usize, usize), u64>,
}

impl Cluster {
    fn new(size: usize, durable: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let engines = (0..size)
            .map(|i| {
                let config = Config::builder()
                    .data_dir(temp.path())
                    .backup_on_write(durable)
                    .node(NodeSettings::new(format!("node{}", i), 0, 0))
                    .build();
                Engine::open(config).unwrap()
            })
            .collect();

        Self {
            _temp: temp,
            engines,
            cursors: HashMap::new(),
        }
    }

    /// Merge up to `limit` records of `from`'s log into `to`; returns how many applied
    fn pull(&mut self, to: usize, from: usize, limit: usize) -> usize {
        let cursor = self.cursors.entry((to, from)).or_insert(0);
        let records = self.engines[from].fetch_since(*cursor, limit);

        let mut applied = 0;
        for record in records {
            let outcome = self.engines[to].apply_replicated(record.entry).unwrap();
            if matches!(outcome, driftkv::engine::ApplyOutcome::Applied { .. }) {
                applied += 1;
            }
            *cursor = record.index;
        }
        applied
    }

    /// Pull everything everywhere until no engine changes
    fn settle(&mut self) {
        loop {
            let mut moved = 0;
            for to in 0..self.engines.len() {
                for from in 0..self.engines.len() {
                    if to != from {
                        moved += self.pull(to, from, usize::MAX);
                    }
                }
            }
            if moved == 0 {
                return;
            }
        }
    }

    fn assert_converged(&self) {
        let reference = self.engines[0].snapshot();
        for engine in &self.engines[1..] {
            assert_eq!(
                engine.snapshot(),
                reference,
                "{} diverged from node0",
                engine.node_id()
            );
        }
    }
}

fn random_workload(seed: u64, nodes: usize, steps: usize, durable: bool) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cluster = Cluster::new(nodes, durable);

    for step in 0..steps {
        let node = rng.gen_range(0..nodes);
        match rng.gen_range(0..10) {
            0..=5 => {
                let key = format!("k{}", rng.gen_range(0..12));
                cluster.engines[node]
                    .put(&key, format!("{}@{}", node, step).as_bytes())
                    .unwrap();
            }
            6 => {
                let key = format!("k{}", rng.gen_range(0..12));
                cluster.engines[node].delete(&key).unwrap();
            }
            _ => {
                let from = rng.gen_range(0..nodes);
                if from != node {
                    let limit = rng.gen_range(1..6);
                    cluster.pull(node, from, limit);
                }
            }
        }
    }

    cluster.settle();
    cluster.assert_converged();
}

// =============================================================================
// Randomized Tests
// =============================================================================

#[test]
fn test_three_nodes_converge() {
    for seed in 0..20 {
        random_workload(seed, 3, 300, false);
    }
}

#[test]
fn test_five_nodes_converge() {
    for seed in 100..105 {
        random_workload(seed, 5, 500, false);
    }
}

#[test]
fn test_durable_nodes_converge() {
    random_workload(42, 3, 200, true);
}

// =============================================================================
// Deterministic Tests
// =============================================================================

#[test]
fn test_concurrent_writes_pick_same_winner() {
    let mut cluster = Cluster::new(2, false);

    // Same clock on both sides; node1 > node0 wins everywhere
    let v0 = cluster.engines[0].put("x", b"zero").unwrap();
    let v1 = cluster.engines[1].put("x", b"one").unwrap();
    assert_eq!(v0.clock, v1.clock);

    cluster.settle();

    for engine in &cluster.engines {
        assert_eq!(engine.get("x"), Some(b"one".to_vec()));
    }
}

#[test]
fn test_changes_propagate_transitively() {
    let mut cluster = Cluster::new(3, false);
    cluster.engines[0].put("chain", b"from-0").unwrap();

    // node2 only ever talks to node1
    cluster.pull(1, 0, 100);
    cluster.pull(2, 1, 100);

    assert_eq!(cluster.engines[2].get("chain"), Some(b"from-0".to_vec()));
}

#[test]
fn test_echo_does_not_grow_logs() {
    let mut cluster = Cluster::new(2, false);
    cluster.engines[0].put("a", b"1").unwrap();

    cluster.settle();
    let lens: Vec<_> = cluster.engines.iter().map(|e| e.log().len()).collect();

    // Another full exchange finds nothing new
    cluster.settle();
    let again: Vec<_> = cluster.engines.iter().map(|e| e.log().len()).collect();

    assert_eq!(lens, vec![1, 1]);
    assert_eq!(again, lens);
}

#[test]
fn test_delete_wins_over_older_put() {
    let mut cluster = Cluster::new(2, false);
    cluster.engines[0].put("k", b"v").unwrap();
    cluster.settle();

    cluster.engines[1].delete("k").unwrap();
    cluster.settle();

    for engine in &cluster.engines {
        assert_eq!(engine.get("k"), None);
    }
    cluster.assert_converged();
}
