//! Tests for NodeDirectory

use driftkv::cluster::NodeDirectory;
use driftkv::config::{Config, NodeSettings};
use driftkv::DriftError;

fn three_nodes() -> Vec<NodeSettings> {
    vec![
        NodeSettings::new("node2", 7002, 8002),
        NodeSettings::new("node1", 7001, 8001),
        NodeSettings::new("node3", 7003, 8003),
    ]
}

#[test]
fn test_list_peers_excludes_local() {
    let directory = NodeDirectory::new("node2", three_nodes()).unwrap();

    let peers: Vec<_> = directory.list_peers().map(|n| n.node_id.as_str()).collect();

    assert_eq!(peers, vec!["node1", "node3"]);
    assert_eq!(directory.peer_count(), 2);
    assert_eq!(directory.len(), 3);
}

#[test]
fn test_local_and_lookup() {
    let directory = NodeDirectory::new("node1", three_nodes()).unwrap();

    assert_eq!(directory.local().listen_port, 7001);
    assert_eq!(directory.get("node3").unwrap().kv_port, 8003);
    assert!(directory.get("node4").is_none());
}

#[test]
fn test_single_node_has_no_peers() {
    let directory = NodeDirectory::new("solo", vec![NodeSettings::new("solo", 1, 2)]).unwrap();

    assert_eq!(directory.list_peers().count(), 0);
    assert!(!directory.is_empty());
}

#[test]
fn test_rejects_duplicate_ids() {
    let mut nodes = three_nodes();
    nodes.push(NodeSettings::new("node3", 9003, 9103));

    assert!(matches!(
        NodeDirectory::new("node1", nodes),
        Err(DriftError::Config(_))
    ));
}

#[test]
fn test_rejects_missing_local() {
    assert!(matches!(
        NodeDirectory::new("node9", three_nodes()),
        Err(DriftError::Config(_))
    ));
}

#[test]
fn test_from_config() {
    let config = Config::builder()
        .node(NodeSettings::new("a", 7001, 8001))
        .peer(NodeSettings::new("b", 7002, 8002))
        .build();

    let directory = NodeDirectory::from_config(&config).unwrap();

    assert_eq!(directory.local().node_id, "a");
    let peers: Vec<_> = directory.list_peers().map(|n| n.node_id.clone()).collect();
    assert_eq!(peers, vec!["b".to_string()]);
}
