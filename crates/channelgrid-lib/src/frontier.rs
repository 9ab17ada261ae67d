//! Search working sets shared by every segment during one pass.
//!
//! [`SearchFrontier`] owns the closed set for a whole backbone: the first
//! segment to claim a node keeps it for the rest of the pass. Each segment
//! keeps its own [`PathSegment`] with the open list it expands from and the
//! semi-open set of contact nodes it touched but could not claim.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::segment::SegmentId;
use crate::topology::{NodeId, Topology};

/// Closed set, claim owners and search parents for one pass.
#[derive(Debug, Clone, Default)]
pub struct SearchFrontier {
    closed: HashSet<NodeId>,
    owner: HashMap<NodeId, SegmentId>,
    parent: HashMap<NodeId, NodeId>,
}

impl SearchFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.closed.clear();
        self.owner.clear();
        self.parent.clear();
    }

    pub fn is_closed(&self, node: NodeId) -> bool {
        self.closed.contains(&node)
    }

    pub fn closed_len(&self) -> usize {
        self.closed.len()
    }

    pub fn owner(&self, node: NodeId) -> Option<SegmentId> {
        self.owner.get(&node).copied()
    }

    /// Node the claiming segment reached `node` from.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parent.get(&node).copied()
    }

    /// Claimed nodes and their search parents.
    pub fn parents(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.parent.iter().map(|(node, parent)| (*node, *parent))
    }

    /// Claim `node` for `owner`. The first writer wins; returns whether this call claimed it.
    pub fn claim(&mut self, node: NodeId, owner: SegmentId, parent: Option<NodeId>) -> bool {
        if !self.closed.insert(node) {
            return false;
        }
        self.owner.insert(node, owner);
        if let Some(parent) = parent {
            self.parent.insert(node, parent);
        }
        true
    }

    /// Close `node` without assigning an owner.
    pub fn close(&mut self, node: NodeId) -> bool {
        self.closed.insert(node)
    }

    /// Walk search parents from `from` until `stop`, which is excluded.
    ///
    /// The second value reports whether `stop` was reached; on a dead end the
    /// partial walk is returned.
    pub fn trace(&self, from: NodeId, stop: NodeId) -> (Vec<NodeId>, bool) {
        let mut path = Vec::new();
        let mut current = from;
        while current != stop {
            if path.len() > self.parent.len() {
                return (path, false);
            }
            path.push(current);
            match self.parent(current) {
                Some(next) => current = next,
                None => return (path, false),
            }
        }
        (path, true)
    }
}

/// Something a segment's expansion ran into instead of claiming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    /// `controller` is adjacent to `via`, a node of the searching segment.
    Controller { via: NodeId, controller: NodeId },
    /// `connection` belongs to `neighbour` and is adjacent to `via`.
    Segment {
        via: NodeId,
        connection: NodeId,
        neighbour: SegmentId,
    },
}

/// Per-segment open and semi-open working sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    start: NodeId,
    open: Vec<NodeId>,
    semi_open: BTreeSet<NodeId>,
}

impl PathSegment {
    pub fn new(start: NodeId) -> Self {
        Self {
            start,
            open: Vec::new(),
            semi_open: BTreeSet::new(),
        }
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn open(&self) -> &[NodeId] {
        &self.open
    }

    /// Contact nodes touched this pass: controllers and other segments' claims.
    pub fn semi_open(&self) -> &BTreeSet<NodeId> {
        &self.semi_open
    }

    pub fn is_exhausted(&self) -> bool {
        self.open.is_empty()
    }

    /// Put the start node back at the head of the search.
    pub(crate) fn seed(&mut self, frontier: &mut SearchFrontier, owner: SegmentId) {
        self.open.clear();
        self.semi_open.clear();
        frontier.claim(self.start, owner, None);
        self.open.push(self.start);
    }

    /// Expand every open node by one hop.
    ///
    /// Unclaimed nodes are claimed and join the next open list. Controllers,
    /// segment start nodes and nodes claimed by other segments are reported
    /// as contacts instead.
    pub(crate) fn step(
        &mut self,
        me: SegmentId,
        topology: &Topology,
        frontier: &mut SearchFrontier,
        starts: &HashMap<NodeId, SegmentId>,
    ) -> Vec<Contact> {
        let mut contacts = Vec::new();
        let previous = std::mem::take(&mut self.open);

        for via in previous {
            for &next in topology.neighbours(via) {
                if topology.is_controller(next) {
                    self.semi_open.insert(next);
                    contacts.push(Contact::Controller {
                        via,
                        controller: next,
                    });
                    continue;
                }

                if let Some(&other) = starts.get(&next) {
                    if other != me {
                        self.semi_open.insert(next);
                        contacts.push(Contact::Segment {
                            via,
                            connection: next,
                            neighbour: other,
                        });
                    }
                    continue;
                }

                match frontier.owner(next) {
                    Some(owner) if owner == me => {}
                    Some(owner) => {
                        self.semi_open.insert(next);
                        contacts.push(Contact::Segment {
                            via,
                            connection: next,
                            neighbour: owner,
                        });
                    }
                    None => {
                        if frontier.claim(next, me, Some(via)) {
                            self.open.push(next);
                        }
                    }
                }
            }
        }

        contacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> Topology {
        // 1(C) - 2 - 3 - 4 - 5
        Topology::builder()
            .controller(1)
            .cable(2)
            .cable(3)
            .cable(4)
            .cable(5)
            .chain(&[1, 2, 3, 4, 5])
            .build()
            .unwrap()
    }

    #[test]
    fn first_claim_wins() {
        let mut frontier = SearchFrontier::new();
        assert!(frontier.claim(3, 0, Some(4)));
        assert!(!frontier.claim(3, 1, Some(2)));
        assert_eq!(frontier.owner(3), Some(0));
        assert_eq!(frontier.parent(3), Some(4));
    }

    #[test]
    fn trace_stops_at_dead_ends() {
        let mut frontier = SearchFrontier::new();
        frontier.claim(5, 0, None);
        frontier.claim(4, 0, Some(5));
        frontier.claim(3, 0, Some(4));

        assert_eq!(frontier.trace(3, 5), (vec![3, 4], true));
        assert_eq!(frontier.trace(3, 9), (vec![3, 4, 5], false));
        assert_eq!(frontier.trace(5, 5), (vec![], true));
    }

    #[test]
    fn step_claims_chain_nodes_and_reports_controllers() {
        let topology = line();
        let mut frontier = SearchFrontier::new();
        let starts = HashMap::from([(5, 0)]);
        let mut segment = PathSegment::new(5);
        segment.seed(&mut frontier, 0);

        let mut contacts = Vec::new();
        while !segment.is_exhausted() {
            contacts.extend(segment.step(0, &topology, &mut frontier, &starts));
        }

        assert_eq!(
            contacts,
            vec![Contact::Controller {
                via: 2,
                controller: 1
            }]
        );
        assert_eq!(frontier.trace(2, 5), (vec![2, 3, 4], true));
        assert!(segment.semi_open().contains(&1));
        assert!(!frontier.is_closed(1));
    }

    #[test]
    fn step_reports_foreign_claims_as_segment_contacts() {
        let topology = line();
        let mut frontier = SearchFrontier::new();
        let starts = HashMap::from([(5, 0), (2, 1)]);
        let mut near = PathSegment::new(5);
        let mut far = PathSegment::new(2);
        near.seed(&mut frontier, 0);
        far.seed(&mut frontier, 1);

        // near claims 4, far claims 3; near then touches 3.
        near.step(0, &topology, &mut frontier, &starts);
        far.step(1, &topology, &mut frontier, &starts);
        let contacts = near.step(0, &topology, &mut frontier, &starts);

        assert_eq!(
            contacts,
            vec![Contact::Segment {
                via: 4,
                connection: 3,
                neighbour: 1
            }]
        );
        assert_eq!(frontier.owner(3), Some(1));
    }
}
