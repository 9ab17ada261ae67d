//! Engine-owned routing state for every node.
//!
//! The topology supplies identity, adjacency and capacity. The engine only
//! writes two things per node: the upstream hop (one step closer to a
//! controller) and the number of channels currently routed through it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::topology::{NodeId, NodeKind, Topology, TopologyNode};

/// A routable point in the network together with its current routing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    capacity: u32,
    adjacency: Vec<NodeId>,
    upstream: Option<NodeId>,
    channels: u32,
}

impl Node {
    fn from_topology(node: &TopologyNode) -> Self {
        Self {
            id: node.id,
            kind: node.kind,
            capacity: node.capacity,
            adjacency: node.adjacency.clone(),
            upstream: None,
            channels: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn adjacency(&self) -> &[NodeId] {
        &self.adjacency
    }

    /// Next node toward a controller, if this node is routed.
    pub fn upstream(&self) -> Option<NodeId> {
        self.upstream
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn is_controller(&self) -> bool {
        self.kind == NodeKind::Controller
    }

    /// Whether one more channel may pass through this node.
    pub fn can_support_more_channels(&self) -> bool {
        self.channels < self.capacity
    }

    fn links_to(&self, other: NodeId) -> bool {
        self.adjacency.binary_search(&other).is_ok()
    }
}

/// Outcome of reserving a channel along a device's upstream chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelGrant {
    /// Every node on the chain accepted the channel.
    Granted,
    /// The named node had no spare capacity; nothing was reserved.
    Saturated(NodeId),
    /// The chain does not terminate at a controller.
    NoRoute,
}

/// Per-node routing state for one network instance.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    nodes: BTreeMap<NodeId, Node>,
}

impl NodeTable {
    pub fn from_topology(topology: &Topology) -> Self {
        let nodes = topology
            .nodes()
            .map(|node| (node.id, Node::from_topology(node)))
            .collect();
        Self { nodes }
    }

    /// Rebuild from a changed topology, keeping upstream hops that still follow an edge.
    pub fn refresh(&mut self, topology: &Topology) {
        let previous = std::mem::take(&mut self.nodes);
        self.nodes = topology
            .nodes()
            .map(|source| {
                let mut node = Node::from_topology(source);
                let kept = previous
                    .get(&source.id)
                    .and_then(Node::upstream)
                    .filter(|hop| !node.is_controller() && node.links_to(*hop));
                node.upstream = kept;
                (source.id, node)
            })
            .collect();
        self.prune_dangling();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn upstream(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(Node::upstream)
    }

    pub fn is_controller(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(Node::is_controller)
    }

    pub fn can_support_more_channels(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(Node::can_support_more_channels)
    }

    pub(crate) fn set_upstream(&mut self, id: NodeId, hop: Option<NodeId>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.is_controller() {
                node.upstream = hop;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_channels(&mut self, id: NodeId, channels: u32) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.channels = channels;
        }
    }

    /// Whether `from -> path... -> to` follows existing edges.
    pub fn is_walkable(&self, from: NodeId, path: &[NodeId], to: NodeId) -> bool {
        let mut previous = from;
        for &node in path.iter().chain(std::iter::once(&to)) {
            match self.nodes.get(&previous) {
                Some(current) if current.links_to(node) => previous = node,
                _ => return false,
            }
        }
        true
    }

    /// Follow upstream hops from `from` to a controller, inclusive of both ends.
    ///
    /// Returns `None` when the chain dead-ends, leaves the adjacency graph or
    /// loops. The walk is bounded by the number of nodes.
    pub fn route_to_controller(&self, from: NodeId) -> Option<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut current = from;
        for _ in 0..=self.nodes.len() {
            let node = self.nodes.get(&current)?;
            chain.push(current);
            if node.is_controller() {
                return Some(chain);
            }
            let next = node.upstream?;
            if !node.links_to(next) {
                return None;
            }
            current = next;
        }
        None
    }

    /// Controller reached from `from`, if its chain terminates.
    pub fn controller_of(&self, from: NodeId) -> Option<NodeId> {
        self.route_to_controller(from)
            .and_then(|chain| chain.last().copied())
    }

    /// Whether the chain from `from` terminates without touching any node in `avoid`.
    pub fn terminates_avoiding(&self, from: NodeId, avoid: &BTreeSet<NodeId>) -> bool {
        self.route_to_controller(from)
            .is_some_and(|chain| chain.iter().all(|node| !avoid.contains(node)))
    }

    /// Point `path` toward `anchor` and `start` at the first path node.
    ///
    /// With an empty path `start` points straight at `anchor`.
    pub(crate) fn thread_path(&mut self, start: NodeId, path: &[NodeId], anchor: NodeId) {
        let mut next = anchor;
        for &node in path.iter().rev() {
            self.set_upstream(node, Some(next));
            next = node;
        }
        self.set_upstream(start, Some(next));
    }

    pub(crate) fn clear_channels(&mut self) {
        for node in self.nodes.values_mut() {
            node.channels = 0;
        }
    }

    /// Reserve one channel on every node from `device` to its controller.
    pub(crate) fn allocate_channel(&mut self, device: NodeId) -> ChannelGrant {
        let Some(chain) = self.route_to_controller(device) else {
            return ChannelGrant::NoRoute;
        };
        if let Some(&full) = chain
            .iter()
            .find(|id| !self.can_support_more_channels(**id))
        {
            return ChannelGrant::Saturated(full);
        }
        for id in chain {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.channels += 1;
            }
        }
        ChannelGrant::Granted
    }

    /// Clear every upstream hop whose chain no longer reaches a controller.
    pub(crate) fn prune_dangling(&mut self) -> usize {
        let mut resolved: HashMap<NodeId, bool> = HashMap::new();
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();

        for id in ids {
            if resolved.contains_key(&id) {
                continue;
            }
            let mut walk = Vec::new();
            let mut on_walk = HashSet::new();
            let mut current = id;
            let outcome = loop {
                if let Some(&known) = resolved.get(&current) {
                    break known;
                }
                if !on_walk.insert(current) {
                    break false;
                }
                walk.push(current);
                let Some(node) = self.nodes.get(&current) else {
                    break false;
                };
                if node.is_controller() {
                    break true;
                }
                match node.upstream {
                    Some(next) if node.links_to(next) => current = next,
                    _ => break false,
                }
            };
            for node in walk {
                resolved.insert(node, outcome);
            }
        }

        let mut cleared = 0;
        for node in self.nodes.values_mut() {
            if node.upstream.is_some() && !resolved.get(&node.id).copied().unwrap_or(false) {
                node.upstream = None;
                cleared += 1;
            }
        }
        if cleared > 0 {
            debug!(cleared, "cleared upstream hops that no longer reach a controller");
        }
        cleared
    }
}
