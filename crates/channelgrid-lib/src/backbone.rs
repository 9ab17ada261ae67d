//! The backbone map: every live segment of one network, addressed by index.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::frontier::{Contact, SearchFrontier};
use crate::node::NodeTable;
use crate::segment::{lead_in, BackboneSegment, RouteCandidate, SegmentId, SegmentState};
use crate::topology::{NodeId, Topology};

/// Arena of backbone segments plus a start-node index.
///
/// Removed segments leave a hole so that indices held elsewhere stay valid for
/// the rest of the recompute; holes are reused when the backbone is refreshed.
#[derive(Debug, Clone, Default)]
pub struct Backbone {
    segments: Vec<Option<BackboneSegment>>,
    by_start: HashMap<NodeId, SegmentId>,
    free: BTreeSet<SegmentId>,
    retired: Vec<BackboneSegment>,
}

/// What [`Backbone::refresh`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub dropped: usize,
    pub pruned: usize,
}

impl Backbone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live segments.
    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }

    pub fn get(&self, id: SegmentId) -> Option<&BackboneSegment> {
        self.segments.get(id).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: SegmentId) -> Option<&mut BackboneSegment> {
        self.segments.get_mut(id).and_then(Option::as_mut)
    }

    /// Live segments in index order.
    pub fn iter(&self) -> impl Iterator<Item = &BackboneSegment> {
        self.segments.iter().flatten()
    }

    pub fn ids(&self) -> Vec<SegmentId> {
        self.iter().map(BackboneSegment::id).collect()
    }

    /// The live segment whose start node is `start`.
    pub fn segment_of(&self, start: NodeId) -> Option<&BackboneSegment> {
        self.by_start.get(&start).and_then(|id| self.get(*id))
    }

    /// Segments removed by repair during the last recompute.
    pub fn retired(&self) -> &[BackboneSegment] {
        &self.retired
    }

    pub(crate) fn slots(&self) -> &[Option<BackboneSegment>] {
        &self.segments
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Option<BackboneSegment>] {
        &mut self.segments
    }

    /// Bring the segment set in line with the topology's boundary nodes.
    pub fn refresh(&mut self, topology: &Topology) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        self.retired.clear();

        let boundaries: BTreeSet<NodeId> = topology.boundary_nodes().into_iter().collect();
        let stale: Vec<SegmentId> = self
            .iter()
            .filter(|segment| !boundaries.contains(&segment.start()))
            .map(BackboneSegment::id)
            .collect();
        for id in stale {
            if let Some(removed) = self.take(id) {
                for segment in self.segments.iter_mut().flatten() {
                    segment.remove_neighbour(&removed);
                }
                summary.dropped += 1;
            }
        }

        let live: HashMap<SegmentId, NodeId> = self
            .iter()
            .map(|segment| (segment.id(), segment.start()))
            .collect();
        for segment in self.segments.iter_mut().flatten() {
            summary.pruned += segment.prune_stale(topology, &live);
        }

        for start in boundaries {
            if self.by_start.contains_key(&start) {
                continue;
            }
            let id = match self.free.pop_first() {
                Some(free) => free,
                None => {
                    self.segments.push(None);
                    self.segments.len() - 1
                }
            };
            self.segments[id] = Some(BackboneSegment::new(id, start));
            self.by_start.insert(start, id);
            summary.added += 1;
        }

        debug!(
            segments = self.len(),
            added = summary.added,
            dropped = summary.dropped,
            pruned = summary.pruned,
            "refreshed backbone"
        );
        summary
    }

    /// Prepare a fresh pass over a shared frontier.
    ///
    /// Every start node is claimed and seeded before any candidate is
    /// protected, so a first hop that is another segment's start stays with
    /// that segment.
    pub fn reset(&mut self, frontier: &mut SearchFrontier, nodes: &NodeTable) {
        frontier.clear();
        for segment in self.segments.iter_mut().flatten() {
            segment.seed(frontier);
            if segment.state() == SegmentState::Unsearched {
                segment.set_state(SegmentState::Searching);
            }
        }
        for segment in self.iter() {
            segment.protect_candidates(frontier, nodes);
        }
    }

    /// Expand every segment in lockstep until all open lists are exhausted.
    ///
    /// Returns whether any segment learned a new candidate or neighbour.
    pub fn search(
        &mut self,
        topology: &Topology,
        frontier: &mut SearchFrontier,
        nodes: &NodeTable,
    ) -> bool {
        let ids = self.ids();
        let mut changed = false;
        let mut rounds = 0usize;

        loop {
            let mut progressed = false;
            for &id in &ids {
                let Some(segment) = self.segments.get_mut(id).and_then(Option::as_mut) else {
                    continue;
                };
                if segment.search().is_exhausted() {
                    continue;
                }
                progressed = true;
                let contacts = segment
                    .search_mut()
                    .step(id, topology, frontier, &self.by_start);
                for contact in contacts {
                    changed |= self.record_contact(id, contact, frontier, nodes);
                }
            }
            if !progressed {
                break;
            }
            rounds += 1;
        }

        debug!(rounds, claimed = frontier.closed_len(), changed, "backbone search finished");
        changed
    }

    fn record_contact(
        &mut self,
        id: SegmentId,
        contact: Contact,
        frontier: &SearchFrontier,
        nodes: &NodeTable,
    ) -> bool {
        match contact {
            Contact::Controller { via, controller } => {
                let Some(segment) = self.get_mut(id) else {
                    return false;
                };
                let path = lead_in(frontier, segment.start(), via);
                let added = segment.add_controller_route(RouteCandidate::to_controller(path, controller));
                if added {
                    debug!(segment = id, controller, "found controller route");
                }
                added
            }
            Contact::Segment {
                via,
                connection,
                neighbour,
            } => {
                if neighbour == id {
                    return false;
                }
                let (Some(own_start), Some(neighbour_start)) = (
                    self.get(id).map(BackboneSegment::start),
                    self.get(neighbour).map(BackboneSegment::start),
                ) else {
                    return false;
                };

                let mut changed = false;
                let link = {
                    let Some(segment) = self.get_mut(id) else {
                        return false;
                    };
                    if segment.neighbour(neighbour).is_none() {
                        let lead = lead_in(frontier, own_start, via);
                        changed |= segment.add_path_to_neighbour(
                            neighbour,
                            neighbour_start,
                            lead,
                            connection,
                            frontier,
                        );
                    }
                    segment.neighbour(neighbour).cloned()
                };
                let Some(link) = link else {
                    return changed;
                };

                let neighbour_routed = match self.get_mut(neighbour) {
                    Some(other) => {
                        changed |= other.insert_neighbour(id, link.reversed(own_start));
                        other.is_routed(nodes)
                    }
                    None => false,
                };
                if neighbour_routed {
                    if let Some(segment) = self.get_mut(id) {
                        let candidate =
                            RouteCandidate::via_segment(link.path, neighbour, neighbour_start);
                        changed |= segment.add_controller_route(candidate);
                    }
                }
                changed
            }
        }
    }

    /// Remove a segment from the map, leaving its slot empty.
    pub(crate) fn take(&mut self, id: SegmentId) -> Option<BackboneSegment> {
        let segment = self.segments.get_mut(id)?.take()?;
        self.by_start.remove(&segment.start());
        self.free.insert(id);
        Some(segment)
    }

    pub(crate) fn retire(&mut self, segment: BackboneSegment) {
        self.retired.push(segment);
    }
}
