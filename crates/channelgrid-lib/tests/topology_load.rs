mod common;

use std::fs;

use channelgrid_lib::{load_topology, Error, NodeKind, Topology, TopologyFile};
use common::small_network_path;
use tempfile::tempdir;

#[test]
fn fixture_loads_with_symmetric_links() {
    let topology = load_topology(&small_network_path()).expect("fixture loads");

    assert_eq!(topology.len(), 11);
    assert_eq!(topology.neighbours(8), &[5, 7]);
    assert_eq!(topology.kind(9), Some(NodeKind::Controller));
    assert_eq!(topology.node(3).unwrap().capacity, 16);
    assert_eq!(topology.boundary_nodes(), vec![3, 4, 5, 7, 20, 21]);
}

#[test]
fn written_topologies_load_back() {
    let topology = Topology::builder()
        .controller(1)
        .cable(2)
        .device(3)
        .chain(&[1, 2, 3])
        .build()
        .unwrap();
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("network.json");
    let raw = serde_json::to_string_pretty(&TopologyFile::from(&topology)).expect("serialises");
    fs::write(&path, raw).expect("write topology");

    let loaded = load_topology(&path).expect("loads");
    assert_eq!(loaded, topology);
}

#[test]
fn broken_documents_are_rejected() {
    let dir = tempdir().expect("temp dir");

    let unknown = dir.path().join("unknown.json");
    fs::write(
        &unknown,
        r#"{ "nodes": [ { "id": 1, "kind": "cable", "links": [7] } ] }"#,
    )
    .unwrap();
    assert!(matches!(
        load_topology(&unknown),
        Err(Error::UnknownNode { id: 7 })
    ));

    let garbage = dir.path().join("garbage.json");
    fs::write(&garbage, "{ nodes: ").unwrap();
    assert!(matches!(
        load_topology(&garbage),
        Err(Error::TopologyParse(_))
    ));

    let missing = dir.path().join("missing.json");
    assert!(matches!(load_topology(&missing), Err(Error::Io(_))));
}
