//! Common test utilities and fixture helpers.
//!
//! Shared topology builders and invariant checks for the integration tests.

use std::collections::BTreeSet;
use std::path::PathBuf;

use channelgrid_lib::{NodeId, NodeKind, RouteState, RoutingReport, Topology};

/// Path to fixtures directory used by tests.
#[allow(dead_code)]
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../docs/fixtures")
}

/// Path to the small mixed network fixture.
#[allow(dead_code)]
pub fn small_network_path() -> PathBuf {
    fixtures_dir().join("small_network.json")
}

/// A `width` x `height` grid of cables with controllers in two opposite corners.
///
/// Node ids run row by row from 1. Every third node is a device.
#[allow(dead_code)]
pub fn grid_topology(width: u64, height: u64, cable_capacity: u32) -> Topology {
    let id = |x: u64, y: u64| y * width + x + 1;
    let last = width * height;
    let mut builder = Topology::builder();
    for y in 0..height {
        for x in 0..width {
            let node = id(x, y);
            builder = if node == 1 || node == last {
                builder.node_with_capacity(node, NodeKind::Controller, cable_capacity * 4)
            } else if node % 3 == 0 {
                builder.node_with_capacity(node, NodeKind::Device, cable_capacity)
            } else {
                builder.node_with_capacity(node, NodeKind::Cable, cable_capacity)
            };
        }
    }
    for y in 0..height {
        for x in 0..width {
            if x + 1 < width {
                builder = builder.link(id(x, y), id(x + 1, y));
            }
            if y + 1 < height {
                builder = builder.link(id(x, y), id(x, y + 1));
            }
        }
    }
    builder.build().expect("grid topology is valid")
}

/// A single controller feeding `branches` chains of `length` cables, each ending in a device.
#[allow(dead_code)]
pub fn comb_topology(branches: u64, length: u64) -> Topology {
    let mut builder = Topology::builder()
        .node_with_capacity(1, NodeKind::Controller, 1024)
        .node_with_capacity(2, NodeKind::Cable, 1024)
        .link(1, 2);
    let mut next = 3;
    for _ in 0..branches {
        let mut previous = 2;
        for _ in 0..length {
            builder = builder.cable(next).link(previous, next);
            previous = next;
            next += 1;
        }
        builder = builder.device(next).link(previous, next);
        next += 1;
    }
    builder.build().expect("comb topology is valid")
}

/// Assert that every published chain reaches a controller within `nodes.len()` hops.
#[allow(dead_code)]
pub fn assert_chains_terminate(topology: &Topology, report: &RoutingReport) {
    for entry in &report.nodes {
        let Some(hop) = entry.upstream else {
            continue;
        };
        assert!(
            topology.are_adjacent(entry.id, hop),
            "node {} points at non-adjacent node {}",
            entry.id,
            hop
        );
        let chain = report
            .route_to_controller(entry.id)
            .unwrap_or_else(|| panic!("chain from node {} does not terminate", entry.id));
        assert!(chain.len() <= report.nodes.len());
        assert!(topology.is_controller(*chain.last().expect("chain is not empty")));
    }
}

/// Nodes published as unrouted.
#[allow(dead_code)]
pub fn unrouted_set(report: &RoutingReport) -> BTreeSet<NodeId> {
    report
        .nodes
        .iter()
        .filter(|entry| entry.state == RouteState::Unrouted)
        .map(|entry| entry.id)
        .collect()
}
