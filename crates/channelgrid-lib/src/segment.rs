//! Backbone segments: merged runs of nodes that route as one unit.
//!
//! A segment starts at a boundary node (a device, a branch point or a chain
//! end) and claims the unbranched cables it reaches first. It remembers every
//! controller route it discovered, keyed by the first hop out of its start
//! node, and the literal node path to each neighbouring segment so that it can
//! hand its traffic to a neighbour when it has to be dropped.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::frontier::{PathSegment, SearchFrontier};
use crate::node::NodeTable;
use crate::topology::{NodeId, Topology};

/// Stable index of a segment inside its backbone arena.
pub type SegmentId = usize;

/// Lifecycle of a segment within one recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    Unsearched,
    Searching,
    Routed,
    Invalid,
}

/// Where a route candidate ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// The path ends next to a controller.
    Controller(NodeId),
    /// The path ends next to the start node of an already routed segment.
    Segment { id: SegmentId, start: NodeId },
}

impl RouteTarget {
    /// Node the last path hop points at.
    pub fn anchor(&self) -> NodeId {
        match self {
            RouteTarget::Controller(controller) => *controller,
            RouteTarget::Segment { start, .. } => *start,
        }
    }

    pub fn segment(&self) -> Option<SegmentId> {
        match self {
            RouteTarget::Controller(_) => None,
            RouteTarget::Segment { id, .. } => Some(*id),
        }
    }
}

/// One known way out of a segment toward a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCandidate {
    /// Nodes between the segment start and the anchor, start side first.
    pub path: Vec<NodeId>,
    pub target: RouteTarget,
}

impl RouteCandidate {
    pub fn to_controller(path: Vec<NodeId>, controller: NodeId) -> Self {
        Self {
            path,
            target: RouteTarget::Controller(controller),
        }
    }

    pub fn via_segment(path: Vec<NodeId>, id: SegmentId, start: NodeId) -> Self {
        Self {
            path,
            target: RouteTarget::Segment { id, start },
        }
    }

    /// Node the segment start points at when this candidate is selected.
    pub fn first_hop(&self) -> NodeId {
        self.path
            .first()
            .copied()
            .unwrap_or_else(|| self.target.anchor())
    }
}

/// Literal path from this segment's start to a neighbour's start, both excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighbourLink {
    pub start: NodeId,
    pub path: Vec<NodeId>,
}

impl NeighbourLink {
    /// The same link seen from the other end.
    pub fn reversed(&self, own_start: NodeId) -> Self {
        Self {
            start: own_start,
            path: self.path.iter().rev().copied().collect(),
        }
    }
}

/// A contiguous routing unit in the backbone.
#[derive(Debug, Clone)]
pub struct BackboneSegment {
    id: SegmentId,
    search: PathSegment,
    state: SegmentState,
    controller_routes: BTreeMap<NodeId, RouteCandidate>,
    selected: Option<NodeId>,
    /// First hops dropped for lack of capacity during the current recompute.
    rejected: BTreeSet<NodeId>,
    neighbours: BTreeMap<SegmentId, NeighbourLink>,
}

impl BackboneSegment {
    pub fn new(id: SegmentId, start: NodeId) -> Self {
        Self {
            id,
            search: PathSegment::new(start),
            state: SegmentState::Unsearched,
            controller_routes: BTreeMap::new(),
            selected: None,
            rejected: BTreeSet::new(),
            neighbours: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn start(&self) -> NodeId {
        self.search.start()
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// First hop of the route currently threaded from the start node.
    pub fn selected(&self) -> Option<NodeId> {
        self.selected
    }

    pub fn search(&self) -> &PathSegment {
        &self.search
    }

    pub(crate) fn search_mut(&mut self) -> &mut PathSegment {
        &mut self.search
    }

    pub(crate) fn set_state(&mut self, state: SegmentState) {
        self.state = state;
    }

    /// A segment can carry a route only while it knows at least one candidate.
    pub fn is_valid(&self) -> bool {
        !self.controller_routes.is_empty()
    }

    /// Whether the selected route is threaded and reaches a controller.
    pub fn is_routed(&self, nodes: &NodeTable) -> bool {
        self.selected.is_some()
            && nodes.upstream(self.start()) == self.selected
            && nodes.controller_of(self.start()).is_some()
    }

    pub fn candidate_count(&self) -> usize {
        self.controller_routes.len()
    }

    pub fn candidate(&self, first_hop: NodeId) -> Option<&RouteCandidate> {
        self.controller_routes.get(&first_hop)
    }

    pub fn candidates(&self) -> impl Iterator<Item = &RouteCandidate> {
        self.controller_routes.values()
    }

    pub fn neighbour(&self, id: SegmentId) -> Option<&NeighbourLink> {
        self.neighbours.get(&id)
    }

    pub fn neighbours(&self) -> impl Iterator<Item = (SegmentId, &NeighbourLink)> {
        self.neighbours.iter().map(|(id, link)| (*id, link))
    }

    pub fn neighbour_count(&self) -> usize {
        self.neighbours.len()
    }

    /// Record one more way out toward a controller. Returns `false` for a known first hop.
    ///
    /// First hops rejected by [`Self::switch_controller_route`] stay rejected
    /// until the next recompute.
    pub fn add_controller_route(&mut self, route: RouteCandidate) -> bool {
        let hop = route.first_hop();
        if self.rejected.contains(&hop) {
            return false;
        }
        match self.controller_routes.entry(hop) {
            Entry::Vacant(entry) => {
                entry.insert(route);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Record the path to `neighbour`, reached from own node `lead_in.last()` through `connection`.
    ///
    /// The part inside the neighbour's claim is recovered by walking search
    /// parents from `connection`; a dead end keeps the partial path.
    pub fn add_path_to_neighbour(
        &mut self,
        neighbour: SegmentId,
        neighbour_start: NodeId,
        lead_in: Vec<NodeId>,
        connection: NodeId,
        frontier: &SearchFrontier,
    ) -> bool {
        if neighbour == self.id || self.neighbours.contains_key(&neighbour) {
            return false;
        }
        let path = contact_path(
            self.start(),
            lead_in,
            connection,
            neighbour_start,
            frontier,
        );
        self.neighbours.insert(
            neighbour,
            NeighbourLink {
                start: neighbour_start,
                path,
            },
        );
        true
    }

    pub(crate) fn insert_neighbour(&mut self, neighbour: SegmentId, link: NeighbourLink) -> bool {
        if neighbour == self.id || self.neighbours.contains_key(&neighbour) {
            return false;
        }
        self.neighbours.insert(neighbour, link);
        true
    }

    /// Thread the first usable candidate and point the start node at it.
    ///
    /// Candidates are tried in first-hop order and unusable ones are skipped.
    /// A candidate is usable when its path still follows edges and either its
    /// anchor or one of its path nodes reaches a controller without passing
    /// back through this segment; the path is threaded up to that join point.
    pub fn select_controller_route(&mut self, nodes: &mut NodeTable) -> Option<NodeId> {
        debug_assert!(
            self.is_valid(),
            "segment {} has no controller route to select",
            self.id
        );
        let start = self.start();
        let chosen = self.controller_routes.iter().find_map(|(hop, route)| {
            join_point(nodes, start, &route.path, route.target.anchor()).map(|join| (*hop, join))
        });

        let Some((hop, (threaded, join))) = chosen else {
            self.selected = None;
            self.state = SegmentState::Invalid;
            return None;
        };

        let path = &self.controller_routes[&hop].path[..threaded];
        nodes.thread_path(start, path, join);
        debug!(
            segment = self.id,
            start,
            hop,
            join,
            "selected controller route"
        );
        self.selected = Some(hop);
        self.state = SegmentState::Routed;
        Some(hop)
    }

    /// Capacity-aware reroute.
    ///
    /// Keeps the current route while the upstream hop of its first hop has
    /// spare capacity. A first hop that is itself a controller has no upstream
    /// hop, so that route is dropped.
    /// Otherwise the current candidate is dropped and the next one selected;
    /// `false` means no route is left.
    pub fn switch_controller_route(&mut self, nodes: &mut NodeTable) -> bool {
        let Some(current) = self.selected else {
            return false;
        };
        if self.controller_routes.is_empty() {
            return false;
        }

        let upstream_has_room = nodes
            .upstream(current)
            .is_some_and(|hop| nodes.can_support_more_channels(hop));
        if upstream_has_room {
            return true;
        }

        self.controller_routes.remove(&current);
        self.rejected.insert(current);
        self.selected = None;
        if self.controller_routes.is_empty() {
            debug!(segment = self.id, dropped = current, "controller routes exhausted");
            self.state = SegmentState::Invalid;
            return false;
        }
        debug!(segment = self.id, dropped = current, "switching controller route");
        self.select_controller_route(nodes).is_some()
    }

    /// Forget `removed` and inherit its other neighbours through it.
    ///
    /// Each inherited link is this segment's path to `removed`, its start
    /// node, then `removed`'s own path onward.
    pub fn remove_neighbour(&mut self, removed: &BackboneSegment) -> bool {
        let Some(link) = self.neighbours.remove(&removed.id) else {
            return false;
        };

        self.controller_routes
            .retain(|_, route| route.target.segment() != Some(removed.id));
        if self
            .selected
            .is_some_and(|hop| !self.controller_routes.contains_key(&hop))
        {
            self.selected = None;
        }

        let start = self.start();
        for (&other, onward) in &removed.neighbours {
            if other == self.id || self.neighbours.contains_key(&other) {
                continue;
            }
            let mut path = link.path.clone();
            path.push(removed.start());
            path.extend(onward.path.iter().copied());
            self.neighbours.insert(
                other,
                NeighbourLink {
                    start: onward.start,
                    path: simplify_path(start, path, onward.start),
                },
            );
        }
        true
    }

    /// Hand this segment's traffic to a neighbour before it leaves the backbone.
    ///
    /// Every neighbour forgets this segment first. The first remaining
    /// neighbour whose route stays clear of this segment becomes the anchor:
    /// the recorded path is threaded toward it and the start node points at
    /// the first path node. Without such a neighbour the start node is
    /// cleared and everything routed through it is pruned.
    pub fn transfer_to_neighbours(
        &self,
        segments: &mut [Option<BackboneSegment>],
        nodes: &mut NodeTable,
    ) -> Option<SegmentId> {
        for &id in self.neighbours.keys() {
            if let Some(Some(neighbour)) = segments.get_mut(id) {
                neighbour.remove_neighbour(self);
            }
        }

        let start = self.start();
        let target = self.transfer_target(segments, nodes).and_then(|id| {
            let link = &self.neighbours[&id];
            join_point(nodes, start, &link.path, link.start).map(|join| (id, link, join))
        });
        match target {
            Some((id, link, (threaded, join))) => {
                nodes.thread_path(start, &link.path[..threaded], join);
                debug!(
                    segment = self.id,
                    neighbour = id,
                    hops = threaded,
                    join,
                    "transferred routes to neighbour"
                );
                Some(id)
            }
            None => {
                nodes.set_upstream(start, None);
                nodes.prune_dangling();
                warn!(
                    segment = self.id,
                    start, "no neighbour can take over this segment; its nodes are unrouted"
                );
                None
            }
        }
    }

    /// First live neighbour whose route stays clear of this segment.
    pub fn transfer_target(
        &self,
        segments: &[Option<BackboneSegment>],
        nodes: &NodeTable,
    ) -> Option<SegmentId> {
        let start = self.start();
        self.neighbours
            .iter()
            .find(|(id, link)| {
                segments.get(**id).is_some_and(Option::is_some)
                    && join_point(nodes, start, &link.path, link.start).is_some()
            })
            .map(|(id, _)| *id)
    }

    /// Seed the search: claim the start node and re-open it.
    pub(crate) fn seed(&mut self, frontier: &mut SearchFrontier) {
        let id = self.id;
        self.search.seed(frontier, id);
    }

    /// Close every known first hop so that no other segment claims it this pass.
    pub(crate) fn protect_candidates(&self, frontier: &mut SearchFrontier, nodes: &NodeTable) {
        let start = self.start();
        for &hop in self.controller_routes.keys() {
            if nodes.is_controller(hop) {
                frontier.close(hop);
            } else {
                frontier.claim(hop, self.id, Some(start));
            }
        }
    }

    /// Drop candidates and links that no longer fit the topology or the live segments.
    pub(crate) fn prune_stale(
        &mut self,
        topology: &Topology,
        live: &HashMap<SegmentId, NodeId>,
    ) -> usize {
        let start = self.start();
        let before = self.controller_routes.len() + self.neighbours.len();

        self.controller_routes.retain(|_, route| {
            let target_alive = match route.target {
                RouteTarget::Controller(controller) => topology.is_controller(controller),
                RouteTarget::Segment { id, start } => live.get(&id) == Some(&start),
            };
            target_alive && topology.is_walkable(start, &route.path, route.target.anchor())
        });
        self.neighbours.retain(|id, link| {
            live.get(id) == Some(&link.start) && topology.is_walkable(start, &link.path, link.start)
        });
        if self
            .selected
            .is_some_and(|hop| !self.controller_routes.contains_key(&hop))
        {
            self.selected = None;
        }
        self.rejected.clear();
        self.state = SegmentState::Unsearched;

        before - (self.controller_routes.len() + self.neighbours.len())
    }
}

/// Search path from `start` out to `via`, first hop first.
pub(crate) fn lead_in(frontier: &SearchFrontier, start: NodeId, via: NodeId) -> Vec<NodeId> {
    let (mut path, reached) = frontier.trace(via, start);
    if !reached {
        warn!(
            start,
            via, "search parents dead-ended before the segment start; keeping partial path"
        );
    }
    path.reverse();
    path
}

/// Full path from `start` to `neighbour_start` through a contact at `connection`.
pub(crate) fn contact_path(
    start: NodeId,
    lead_in: Vec<NodeId>,
    connection: NodeId,
    neighbour_start: NodeId,
    frontier: &SearchFrontier,
) -> Vec<NodeId> {
    let mut path = lead_in;
    if connection != neighbour_start {
        let (tail, reached) = frontier.trace(connection, neighbour_start);
        if !reached {
            warn!(
                connection,
                neighbour_start,
                "search parents dead-ended before the neighbouring segment; keeping partial path"
            );
        }
        path.extend(tail);
    }
    simplify_path(start, path, neighbour_start)
}

/// Cut loops out of the walk `from -> path... -> to` and return its interior.
pub(crate) fn simplify_path(from: NodeId, path: Vec<NodeId>, to: NodeId) -> Vec<NodeId> {
    let mut walk: Vec<NodeId> = Vec::with_capacity(path.len() + 2);
    let mut seen: HashMap<NodeId, usize> = HashMap::new();

    for node in std::iter::once(from)
        .chain(path)
        .chain(std::iter::once(to))
    {
        if let Some(&index) = seen.get(&node) {
            for dropped in walk.drain(index + 1..) {
                seen.remove(&dropped);
            }
            continue;
        }
        seen.insert(node, walk.len());
        walk.push(node);
    }

    if walk.len() < 2 {
        return Vec::new();
    }
    walk[1..walk.len() - 1].to_vec()
}

/// Where the walk `start -> path... -> anchor` can join a terminating chain.
///
/// Returns how many path nodes to thread and the node the last of them points
/// at. The full path is preferred; otherwise the first path node whose chain
/// reaches a controller clear of `start` and the nodes before it.
fn join_point(
    nodes: &NodeTable,
    start: NodeId,
    path: &[NodeId],
    anchor: NodeId,
) -> Option<(usize, NodeId)> {
    if !nodes.is_walkable(start, path, anchor) {
        return None;
    }
    let mut avoid: BTreeSet<NodeId> = std::iter::once(start)
        .chain(path.iter().copied())
        .collect();
    if nodes.terminates_avoiding(anchor, &avoid) {
        return Some((path.len(), anchor));
    }

    avoid.clear();
    avoid.insert(start);
    for (index, &node) in path.iter().enumerate() {
        if nodes.terminates_avoiding(node, &avoid) {
            return Some((index, node));
        }
        avoid.insert(node);
    }
    None
}
