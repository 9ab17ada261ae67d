//! Read-only topology view consumed by the routing engine.
//!
//! A [`Topology`] is owned by the caller and never mutated by the engine. It
//! answers three questions: which nodes exist, which nodes are adjacent, and
//! how many channels each node may carry. Topologies are built either through
//! [`TopologyBuilder`] or from a JSON document via [`Topology::from_json_str`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Numeric identifier for a routable node.
pub type NodeId = u64;

/// Channels carried by a cable when the topology does not say otherwise.
pub const DEFAULT_CABLE_CAPACITY: u32 = 8;
/// Channels a device can carry, its own included, when the topology does not say otherwise.
pub const DEFAULT_DEVICE_CAPACITY: u32 = 8;
/// Channels a controller can serve when the topology does not say otherwise.
pub const DEFAULT_CONTROLLER_CAPACITY: u32 = 32;

/// Role a node plays in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Relays channels between its neighbours.
    Cable,
    /// Consumes one channel and relays like a cable.
    Device,
    /// Root that every route terminates at.
    Controller,
}

impl NodeKind {
    /// Capacity assumed when a node does not declare one.
    pub fn default_capacity(self) -> u32 {
        match self {
            NodeKind::Cable => DEFAULT_CABLE_CAPACITY,
            NodeKind::Device => DEFAULT_DEVICE_CAPACITY,
            NodeKind::Controller => DEFAULT_CONTROLLER_CAPACITY,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            NodeKind::Cable => "cable",
            NodeKind::Device => "device",
            NodeKind::Controller => "controller",
        };
        f.write_str(value)
    }
}

/// A single node in the topology view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub capacity: u32,
    /// Sorted, de-duplicated neighbour identifiers.
    pub adjacency: Vec<NodeId>,
}

impl TopologyNode {
    pub fn degree(&self) -> usize {
        self.adjacency.len()
    }
}

/// Immutable adjacency view of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    nodes: BTreeMap<NodeId, TopologyNode>,
}

impl Topology {
    /// Start building a topology.
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Parse a JSON topology document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: TopologyFile = serde_json::from_str(raw)?;
        file.into_topology()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&TopologyNode> {
        self.nodes.get(&id)
    }

    /// Nodes in ascending identifier order.
    pub fn nodes(&self) -> impl Iterator<Item = &TopologyNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Return the neighbours for a given node identifier.
    pub fn neighbours(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|node| node.adjacency.as_slice())
            .unwrap_or(&[])
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(|node| node.kind)
    }

    pub fn is_controller(&self, id: NodeId) -> bool {
        self.kind(id) == Some(NodeKind::Controller)
    }

    pub fn are_adjacent(&self, a: NodeId, b: NodeId) -> bool {
        self.nodes
            .get(&a)
            .map(|node| node.adjacency.binary_search(&b).is_ok())
            .unwrap_or(false)
    }

    /// Whether `id` terminates a chain of interior cables.
    ///
    /// Devices and every node whose degree is not exactly two start their own
    /// backbone segment. Controllers are chain ends but never segments.
    pub fn is_boundary(&self, id: NodeId) -> bool {
        match self.nodes.get(&id) {
            Some(node) => match node.kind {
                NodeKind::Controller => false,
                NodeKind::Device => true,
                NodeKind::Cable => node.degree() != 2,
            },
            None => false,
        }
    }

    /// Segment start nodes in ascending order.
    pub fn boundary_nodes(&self) -> Vec<NodeId> {
        self.node_ids().filter(|id| self.is_boundary(*id)).collect()
    }

    pub fn controllers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .values()
            .filter(|node| node.kind == NodeKind::Controller)
            .map(|node| node.id)
    }

    pub fn devices(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .values()
            .filter(|node| node.kind == NodeKind::Device)
            .map(|node| node.id)
    }

    /// Whether `from -> path... -> to` is a walk over existing edges.
    pub fn is_walkable(&self, from: NodeId, path: &[NodeId], to: NodeId) -> bool {
        let mut previous = from;
        for &node in path.iter().chain(std::iter::once(&to)) {
            if !self.are_adjacent(previous, node) {
                return false;
            }
            previous = node;
        }
        true
    }
}

/// Load a JSON topology document from disk.
pub fn load_topology(path: &Path) -> Result<Topology> {
    let raw = fs::read_to_string(path)?;
    let topology = Topology::from_json_str(&raw)?;
    debug!(
        nodes = topology.len(),
        path = %path.display(),
        "loaded topology"
    );
    Ok(topology)
}

/// On-disk representation of a topology.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyFile {
    pub nodes: Vec<NodeRecord>,
}

/// One node entry in a [`TopologyFile`]. Links are undirected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<NodeId>,
}

impl TopologyFile {
    pub fn into_topology(self) -> Result<Topology> {
        let mut builder = Topology::builder();
        for record in &self.nodes {
            builder = match record.capacity {
                Some(capacity) => builder.node_with_capacity(record.id, record.kind, capacity),
                None => builder.node(record.id, record.kind),
            };
        }
        for record in &self.nodes {
            for &target in &record.links {
                builder = builder.link(record.id, target);
            }
        }
        builder.build()
    }
}

impl From<&Topology> for TopologyFile {
    fn from(topology: &Topology) -> Self {
        let nodes = topology
            .nodes()
            .map(|node| NodeRecord {
                id: node.id,
                kind: node.kind,
                capacity: Some(node.capacity),
                links: node
                    .adjacency
                    .iter()
                    .copied()
                    .filter(|target| *target > node.id)
                    .collect(),
            })
            .collect();
        Self { nodes }
    }
}

/// Incremental builder for [`Topology`]. Validation is deferred to [`TopologyBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct TopologyBuilder {
    nodes: BTreeMap<NodeId, (NodeKind, u32)>,
    links: Vec<(NodeId, NodeId)>,
    duplicate: Option<NodeId>,
}

impl TopologyBuilder {
    pub fn node(self, id: NodeId, kind: NodeKind) -> Self {
        self.node_with_capacity(id, kind, kind.default_capacity())
    }

    pub fn node_with_capacity(mut self, id: NodeId, kind: NodeKind, capacity: u32) -> Self {
        if self.nodes.insert(id, (kind, capacity)).is_some() && self.duplicate.is_none() {
            self.duplicate = Some(id);
        }
        self
    }

    pub fn cable(self, id: NodeId) -> Self {
        self.node(id, NodeKind::Cable)
    }

    pub fn device(self, id: NodeId) -> Self {
        self.node(id, NodeKind::Device)
    }

    pub fn controller(self, id: NodeId) -> Self {
        self.node(id, NodeKind::Controller)
    }

    pub fn link(mut self, a: NodeId, b: NodeId) -> Self {
        self.links.push((a, b));
        self
    }

    /// Link every consecutive pair in `ids`.
    pub fn chain(mut self, ids: &[NodeId]) -> Self {
        for pair in ids.windows(2) {
            self.links.push((pair[0], pair[1]));
        }
        self
    }

    pub fn build(self) -> Result<Topology> {
        if let Some(id) = self.duplicate {
            return Err(Error::DuplicateNode { id });
        }

        let mut adjacency: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        for (&id, &(_, capacity)) in &self.nodes {
            if capacity == 0 {
                return Err(Error::InvalidCapacity { id });
            }
            adjacency.insert(id, BTreeSet::new());
        }

        for (a, b) in self.links {
            if a == b {
                return Err(Error::SelfLoop { id: a });
            }
            for id in [a, b] {
                if !self.nodes.contains_key(&id) {
                    return Err(Error::UnknownNode { id });
                }
            }
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        }

        let nodes = self
            .nodes
            .into_iter()
            .map(|(id, (kind, capacity))| {
                let neighbours: Vec<NodeId> = adjacency
                    .remove(&id)
                    .map(|set| set.into_iter().collect())
                    .unwrap_or_default();
                (
                    id,
                    TopologyNode {
                        id,
                        kind,
                        capacity,
                        adjacency: neighbours,
                    },
                )
            })
            .collect();

        Ok(Topology { nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_symmetrises_links() {
        let topology = Topology::builder()
            .controller(1)
            .cable(2)
            .device(3)
            .chain(&[1, 2, 3])
            .link(3, 2)
            .build()
            .expect("valid topology");

        assert_eq!(topology.neighbours(2), &[1, 3]);
        assert_eq!(topology.neighbours(3), &[2]);
        assert!(topology.are_adjacent(1, 2));
        assert!(!topology.are_adjacent(1, 3));
    }

    #[test]
    fn builder_rejects_invalid_input() {
        let duplicate = Topology::builder().cable(1).device(1).build();
        assert!(matches!(duplicate, Err(Error::DuplicateNode { id: 1 })));

        let unknown = Topology::builder().cable(1).link(1, 9).build();
        assert!(matches!(unknown, Err(Error::UnknownNode { id: 9 })));

        let self_loop = Topology::builder().cable(1).link(1, 1).build();
        assert!(matches!(self_loop, Err(Error::SelfLoop { id: 1 })));

        let zero = Topology::builder()
            .node_with_capacity(4, NodeKind::Cable, 0)
            .build();
        assert!(matches!(zero, Err(Error::InvalidCapacity { id: 4 })));
    }

    #[test]
    fn boundaries_exclude_chain_interiors_and_controllers() {
        // 1(C) - 2 - 3 - 4(branch) - 5(D)
        //                  \- 6(D)
        let topology = Topology::builder()
            .controller(1)
            .cable(2)
            .cable(3)
            .cable(4)
            .device(5)
            .device(6)
            .chain(&[1, 2, 3, 4, 5])
            .link(4, 6)
            .build()
            .unwrap();

        assert_eq!(topology.boundary_nodes(), vec![4, 5, 6]);
        assert!(!topology.is_boundary(1));
        assert!(!topology.is_boundary(2));
    }

    #[test]
    fn json_documents_apply_default_capacities() {
        let raw = r#"{
            "nodes": [
                { "id": 1, "kind": "controller", "links": [2] },
                { "id": 2, "kind": "cable", "capacity": 32, "links": [3] },
                { "id": 3, "kind": "device" }
            ]
        }"#;
        let topology = Topology::from_json_str(raw).expect("parses");

        assert_eq!(topology.node(1).unwrap().capacity, DEFAULT_CONTROLLER_CAPACITY);
        assert_eq!(topology.node(2).unwrap().capacity, 32);
        assert_eq!(topology.node(3).unwrap().capacity, DEFAULT_DEVICE_CAPACITY);
        assert_eq!(topology.neighbours(3), &[2]);
    }

    #[test]
    fn file_round_trip_preserves_adjacency() {
        let topology = Topology::builder()
            .controller(1)
            .cable(2)
            .device(3)
            .chain(&[1, 2, 3])
            .build()
            .unwrap();
        let file = TopologyFile::from(&topology);
        let rebuilt = file.into_topology().unwrap();
        assert_eq!(rebuilt, topology);
    }

    #[test]
    fn walkability_checks_every_edge() {
        let topology = Topology::builder()
            .cable(1)
            .cable(2)
            .cable(3)
            .cable(4)
            .chain(&[1, 2, 3, 4])
            .build()
            .unwrap();

        assert!(topology.is_walkable(1, &[2, 3], 4));
        assert!(topology.is_walkable(1, &[], 2));
        assert!(!topology.is_walkable(1, &[3], 4));
    }
}
