//! Multi-pass routing for one network instance.
//!
//! [`ChannelEngine`] owns the node routing state and the backbone map between
//! calls. Each [`ChannelEngine::recompute`] refreshes both from the caller's
//! topology and then runs passes of search, selection, repair and channel
//! allocation until nothing changes or the configured budget runs out.

use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backbone::Backbone;
use crate::frontier::SearchFrontier;
use crate::node::{ChannelGrant, Node, NodeTable};
use crate::report::RoutingReport;
use crate::segment::{BackboneSegment, SegmentId, SegmentState};
use crate::topology::{NodeId, NodeKind, Topology};

/// Passes per recompute when no budget is configured.
pub const DEFAULT_MAX_PASSES: usize = 32;

/// Budget and tuning for [`ChannelEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on fixed-point passes per recompute. Zero runs one pass.
    pub max_passes: usize,
    /// Wall-clock budget per recompute, checked between passes.
    pub time_budget: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            time_budget: None,
        }
    }
}

impl EngineConfig {
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    fn pass_limit(&self) -> usize {
        self.max_passes.max(1)
    }
}

/// Routing engine for one network. Independent engines share no state.
#[derive(Debug, Clone, Default)]
pub struct ChannelEngine {
    config: EngineConfig,
    nodes: NodeTable,
    backbone: Backbone,
    frontier: SearchFrontier,
    overloaded: BTreeSet<NodeId>,
}

impl ChannelEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Routing state left by the last recompute.
    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn backbone(&self) -> &Backbone {
        &self.backbone
    }

    /// Claims made during the last pass of the last recompute.
    pub fn frontier(&self) -> &SearchFrontier {
        &self.frontier
    }

    /// Route every node of `topology` and publish the result.
    ///
    /// State from the previous call is reused where the topology still
    /// supports it. Running out of passes or time is not an error: the best
    /// routing found so far is published with `converged == false`.
    pub fn recompute(&mut self, topology: &Topology) -> RoutingReport {
        let started = Instant::now();
        self.nodes.refresh(topology);
        self.backbone.refresh(topology);

        let limit = self.config.pass_limit();
        let mut passes = 0;
        let mut converged = false;
        while passes < limit {
            if passes > 0 && self.budget_spent(started) {
                break;
            }
            passes += 1;
            if !self.run_pass(topology, started) {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                passes,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "routing budget exhausted before a fixed point; publishing partial routing"
            );
        }

        self.finalize(topology);
        let report = RoutingReport::build(
            &self.nodes,
            &self.backbone,
            &self.overloaded,
            passes,
            converged,
        );
        info!(
            passes,
            converged,
            segments = self.backbone.len(),
            unrouted = report.unrouted.len(),
            overloaded = report.overloaded.len(),
            "recompute finished"
        );
        report
    }

    fn budget_spent(&self, started: Instant) -> bool {
        self.config
            .time_budget
            .is_some_and(|budget| started.elapsed() >= budget)
    }

    /// One pass; returns whether anything changed.
    ///
    /// A pass cut short by the time budget counts as changed.
    fn run_pass(&mut self, topology: &Topology, started: Instant) -> bool {
        self.backbone.reset(&mut self.frontier, &self.nodes);
        let discovered = self
            .backbone
            .search(topology, &mut self.frontier, &self.nodes);
        let rerouted = self.route_segments();
        let repaired = self.repair_invalid(started);
        let switched = self.allocate_channels(started);
        debug!(
            discovered,
            rerouted, repaired, switched, "finished routing pass"
        );
        discovered || rerouted || repaired || switched
    }

    /// Select a route for every valid segment that does not hold one.
    fn route_segments(&mut self) -> bool {
        let mut changed = false;
        for id in self.backbone.ids() {
            let Some(segment) = self.backbone.get_mut(id) else {
                continue;
            };
            let was = segment.state();
            if !segment.is_valid() {
                segment.set_state(SegmentState::Invalid);
                changed |= was != SegmentState::Invalid;
                continue;
            }
            if segment.is_routed(&self.nodes) {
                segment.set_state(SegmentState::Routed);
                continue;
            }
            match segment.select_controller_route(&mut self.nodes) {
                Some(_) => changed = true,
                None => changed |= was != SegmentState::Invalid,
            }
        }
        changed
    }

    /// Hand every invalid segment that has a routed neighbour over to it.
    ///
    /// Every invalid segment is tried once. A repair re-queues the invalid
    /// neighbours of the removed segment, since their links now run through
    /// it. Anything left over is picked up by the next pass.
    fn repair_invalid(&mut self, started: Instant) -> bool {
        let mut queue: VecDeque<SegmentId> = self
            .backbone
            .iter()
            .filter(|segment| segment.state() == SegmentState::Invalid)
            .map(BackboneSegment::id)
            .collect();
        let mut queued: BTreeSet<SegmentId> = queue.iter().copied().collect();
        let mut repaired = false;

        while let Some(id) = queue.pop_front() {
            queued.remove(&id);
            if self.budget_spent(started) {
                debug!(pending = queue.len() + 1, "time budget spent during repair");
                return true;
            }
            let Some(segment) = self.backbone.get(id) else {
                continue;
            };
            if segment.state() != SegmentState::Invalid
                || segment
                    .transfer_target(self.backbone.slots(), &self.nodes)
                    .is_none()
            {
                continue;
            }
            let neighbours: Vec<SegmentId> =
                segment.neighbours().map(|(other, _)| other).collect();
            self.repair(id);
            repaired = true;

            for other in neighbours {
                let waiting = self
                    .backbone
                    .get(other)
                    .is_some_and(|segment| segment.state() == SegmentState::Invalid);
                if waiting && queued.insert(other) {
                    queue.push_back(other);
                }
            }
        }
        repaired
    }

    fn repair(&mut self, id: SegmentId) -> Option<SegmentId> {
        let segment = self.backbone.take(id)?;
        let target = segment.transfer_to_neighbours(self.backbone.slots_mut(), &mut self.nodes);
        debug!(
            segment = id,
            start = segment.start(),
            target,
            "removed invalid segment from the backbone"
        );
        self.backbone.retire(segment);
        target
    }

    fn devices(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.kind() == NodeKind::Device)
            .map(Node::id)
            .collect()
    }

    /// Give every device one channel, rerouting around saturated nodes.
    ///
    /// Counts restart from zero after every reroute. Each restart consumes a
    /// candidate or a segment, so the loop ends. Running out of time stops
    /// the rounds early; the counts are settled when the result is published.
    fn allocate_channels(&mut self, started: Instant) -> bool {
        let devices = self.devices();
        let mut changed = false;
        'round: loop {
            self.nodes.clear_channels();
            self.overloaded.clear();
            for &device in &devices {
                let ChannelGrant::Saturated(full) = self.nodes.allocate_channel(device) else {
                    continue;
                };
                if self.relieve(device, full) {
                    if self.budget_spent(started) {
                        debug!(device, "time budget spent during channel allocation");
                        return true;
                    }
                    changed = true;
                    continue 'round;
                }
                debug!(device, saturated = full, "device overloaded");
                self.overloaded.insert(device);
            }
            return changed;
        }
    }

    /// Switch a segment whose route feeds `full` on `device`'s chain.
    ///
    /// Segments nearest the saturated node go first. A segment with a single
    /// candidate has nowhere else to go and is left alone.
    fn relieve(&mut self, device: NodeId, full: NodeId) -> bool {
        let Some(chain) = self.nodes.route_to_controller(device) else {
            return false;
        };
        let feeding: Vec<SegmentId> = chain
            .iter()
            .take_while(|node| **node != full)
            .filter_map(|node| self.backbone.segment_of(*node).map(BackboneSegment::id))
            .collect();

        for id in feeding.into_iter().rev() {
            let Some(segment) = self.backbone.get_mut(id) else {
                continue;
            };
            let Some(before) = segment.selected() else {
                continue;
            };
            if segment.candidate_count() < 2 {
                continue;
            }
            if segment.switch_controller_route(&mut self.nodes) {
                if segment.selected() != Some(before) {
                    debug!(
                        segment = id,
                        device,
                        saturated = full,
                        "rerouted segment around saturated node"
                    );
                    return true;
                }
                continue;
            }
            let start = segment.start();
            self.drop_exhausted(id, start);
            return true;
        }
        false
    }

    fn drop_exhausted(&mut self, id: SegmentId, start: NodeId) {
        let repairable = self
            .backbone
            .get(id)
            .and_then(|segment| segment.transfer_target(self.backbone.slots(), &self.nodes))
            .is_some();
        if repairable {
            self.repair(id);
            return;
        }
        warn!(
            segment = id,
            start, "segment exhausted its controller routes and has no neighbour to repair through"
        );
        self.nodes.set_upstream(start, None);
        self.nodes.prune_dangling();
    }

    /// Publishable state: stranded segments unrouted, idle cables attached, counts settled.
    fn finalize(&mut self, topology: &Topology) {
        let stranded: Vec<NodeId> = self
            .backbone
            .iter()
            .filter(|segment| segment.state() == SegmentState::Invalid)
            .map(BackboneSegment::start)
            .collect();
        for &start in &stranded {
            self.nodes.set_upstream(start, None);
        }
        if !stranded.is_empty() {
            warn!(
                segments = stranded.len(),
                "segments left without a controller route"
            );
        }
        self.nodes.prune_dangling();
        self.attach_idle_cables(topology);
        self.settle_channels();
    }

    /// Point unrouted cables at a routed neighbour, preferring their search parent.
    fn attach_idle_cables(&mut self, topology: &Topology) -> usize {
        let mut attached = 0;
        loop {
            let mut progressed = false;
            for node in topology.nodes().filter(|node| node.kind == NodeKind::Cable) {
                if self.nodes.upstream(node.id).is_some() {
                    continue;
                }
                let hop = self
                    .frontier
                    .parent(node.id)
                    .into_iter()
                    .chain(node.adjacency.iter().copied())
                    .find(|hop| {
                        topology.are_adjacent(node.id, *hop)
                            && self.nodes.controller_of(*hop).is_some()
                    });
                if let Some(hop) = hop {
                    self.nodes.set_upstream(node.id, Some(hop));
                    attached += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        if attached > 0 {
            debug!(attached, "attached idle cables to routed neighbours");
        }
        attached
    }

    fn settle_channels(&mut self) {
        self.nodes.clear_channels();
        self.overloaded.clear();
        for device in self.devices() {
            if let ChannelGrant::Saturated(_) = self.nodes.allocate_channel(device) {
                self.overloaded.insert(device);
            }
        }
    }
}

/// Route `topology` once with a fresh engine.
pub fn route_topology(topology: &Topology, config: EngineConfig) -> RoutingReport {
    ChannelEngine::new(config).recompute(topology)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RouteState;
    use crate::segment::{NeighbourLink, RouteCandidate};
    use crate::test_helpers::{branching_tree, two_device_chain};

    fn trunk_with_two_controllers(trunk_capacity: u32) -> Topology {
        // 1(C) - 3 - 5 - 4 - 6 - 2(C), devices 10 and 11 hang off 4.
        Topology::builder()
            .controller(1)
            .controller(2)
            .node_with_capacity(3, NodeKind::Cable, trunk_capacity)
            .cable(4)
            .cable(5)
            .cable(6)
            .device(10)
            .device(11)
            .chain(&[1, 3, 5, 4, 6, 2])
            .link(4, 10)
            .link(4, 11)
            .build()
            .unwrap()
    }

    fn cornered_network() -> Topology {
        // 1(C) - 3 - 4 - 10(D) - 8 - 9(D) - 2(C), with 10 - 6 - 7(D).
        Topology::builder()
            .controller(1)
            .controller(2)
            .node_with_capacity(3, NodeKind::Cable, 1)
            .cable(4)
            .cable(6)
            .cable(8)
            .device(7)
            .device(9)
            .device(10)
            .chain(&[1, 3, 4, 10, 8, 9, 2])
            .chain(&[10, 6, 7])
            .build()
            .unwrap()
    }

    /// Segment 10 routes toward controller 1 through cable 3, which holds a
    /// single channel. Its other candidate runs through segment 7, which is
    /// itself routed through 10. Segment 9 is routed straight to controller 2.
    fn cornered_engine(topology: &Topology, linked_to_nine: bool) -> ChannelEngine {
        let mut engine = ChannelEngine::default();
        engine.nodes = NodeTable::from_topology(topology);
        engine.backbone.refresh(topology);
        let seven = engine.backbone.segment_of(7).unwrap().id();
        let nine = engine.backbone.segment_of(9).unwrap().id();
        let ten = engine.backbone.segment_of(10).unwrap().id();

        let segment = engine.backbone.get_mut(nine).unwrap();
        segment.add_controller_route(RouteCandidate::to_controller(vec![], 2));
        segment.insert_neighbour(ten, NeighbourLink { start: 10, path: vec![8] });
        assert_eq!(segment.select_controller_route(&mut engine.nodes), Some(2));

        let segment = engine.backbone.get_mut(ten).unwrap();
        segment.add_controller_route(RouteCandidate::to_controller(vec![4, 3], 1));
        segment.add_controller_route(RouteCandidate::via_segment(vec![6], seven, 7));
        segment.insert_neighbour(seven, NeighbourLink { start: 7, path: vec![6] });
        if linked_to_nine {
            segment.insert_neighbour(nine, NeighbourLink { start: 9, path: vec![8] });
        }
        assert_eq!(segment.select_controller_route(&mut engine.nodes), Some(4));

        let segment = engine.backbone.get_mut(seven).unwrap();
        segment.add_controller_route(RouteCandidate::via_segment(vec![6], ten, 10));
        segment.insert_neighbour(ten, NeighbourLink { start: 10, path: vec![6] });
        assert_eq!(segment.select_controller_route(&mut engine.nodes), Some(6));

        engine
    }

    #[test]
    fn default_config_uses_documented_budget() {
        let config = EngineConfig::default();
        assert_eq!(config.max_passes, DEFAULT_MAX_PASSES);
        assert_eq!(config.time_budget, None);
        assert_eq!(config.with_max_passes(0).pass_limit(), 1);
    }

    #[test]
    fn chained_devices_share_one_route() {
        let topology = two_device_chain();
        let mut engine = ChannelEngine::default();
        let report = engine.recompute(&topology);

        assert!(report.converged);
        assert!(report.unrouted.is_empty());
        assert_eq!(report.route_to_controller(3), Some(vec![3, 2, 1]));
        assert_eq!(report.node(2).unwrap().channels, 2);
        assert_eq!(report.channels_in_use, 2);
    }

    #[test]
    fn branches_merge_on_the_trunk() {
        let topology = branching_tree();
        let report = route_topology(&topology, EngineConfig::default());

        assert!(report.converged);
        assert!(report.unrouted.is_empty());
        assert!(report.overloaded.is_empty());
        for device in [6, 9, 10] {
            assert_eq!(report.node(device).unwrap().state, RouteState::Routed);
            let chain = report.route_to_controller(device).unwrap();
            assert_eq!(chain.last(), Some(&1));
        }
        assert_eq!(report.node(2).unwrap().channels, 3);
        assert_eq!(report.node(1).unwrap().channels, 3);
    }

    #[test]
    fn saturated_trunk_moves_the_branch_to_another_controller() {
        let topology = trunk_with_two_controllers(1);
        let report = route_topology(&topology, EngineConfig::default());

        assert!(report.converged);
        assert!(report.overloaded.is_empty());
        assert!(report.unrouted.is_empty());
        for device in [10, 11] {
            let chain = report.route_to_controller(device).unwrap();
            assert_eq!(chain.last(), Some(&2));
        }
        assert_eq!(report.node(6).unwrap().channels, 2);
        assert_eq!(report.node(3).unwrap().channels, 0);
    }

    #[test]
    fn exhausted_segments_are_repaired_through_a_neighbour() {
        let topology = cornered_network();
        let mut engine = cornered_engine(&topology, true);

        assert!(engine.allocate_channels(Instant::now()));

        assert!(engine.backbone.segment_of(10).is_none());
        assert_eq!(engine.backbone.retired().len(), 1);
        assert_eq!(engine.backbone.retired()[0].start(), 10);
        assert_eq!(
            engine.nodes.route_to_controller(7),
            Some(vec![7, 6, 10, 8, 9, 2])
        );
        assert!(engine.overloaded.is_empty());
        assert_eq!(engine.nodes.get(3).unwrap().channels(), 0);
        assert_eq!(engine.nodes.get(9).unwrap().channels(), 3);
    }

    #[test]
    fn exhausted_segments_without_a_usable_neighbour_are_unrouted() {
        let topology = cornered_network();
        let mut engine = cornered_engine(&topology, false);

        assert!(engine.allocate_channels(Instant::now()));

        let segment = engine.backbone.segment_of(10).unwrap();
        assert_eq!(segment.state(), SegmentState::Invalid);
        assert!(engine.backbone.retired().is_empty());
        assert_eq!(engine.nodes.upstream(10), None);
        assert_eq!(engine.nodes.controller_of(7), None);
        assert!(engine.overloaded.is_empty());
        assert_eq!(engine.nodes.get(9).unwrap().channels(), 1);
    }

    #[test]
    fn repairs_cascade_back_along_a_chain_within_one_pass() {
        // 1(C) - 9(D) - 5(D) - 3(D). Segment 3 is tried before 5 can route it.
        let topology = Topology::builder()
            .controller(1)
            .device(3)
            .device(5)
            .device(9)
            .chain(&[1, 9, 5, 3])
            .build()
            .unwrap();
        let report = route_topology(&topology, EngineConfig::default().with_max_passes(1));

        assert_eq!(report.passes, 1);
        assert_eq!(report.retired_segments, 2);
        assert!(report.unrouted.is_empty());
        assert_eq!(report.route_to_controller(3), Some(vec![3, 5, 9, 1]));
    }

    #[test]
    fn a_spent_time_budget_stops_repair_inside_the_first_pass() {
        let topology = two_device_chain();
        let config = EngineConfig::default().with_time_budget(Duration::ZERO);
        let report = route_topology(&topology, config);

        assert_eq!(report.passes, 1);
        assert!(!report.converged);
        assert_eq!(report.retired_segments, 0);
        assert_eq!(report.unrouted, vec![3]);
        assert_eq!(report.route_to_controller(2), Some(vec![2, 1]));
    }

    #[test]
    fn devices_beyond_capacity_are_reported_overloaded() {
        // 1(C) - 3(cap 1) - 4, devices 10 and 11 hang off 4.
        let topology = Topology::builder()
            .controller(1)
            .node_with_capacity(3, NodeKind::Cable, 1)
            .cable(4)
            .device(10)
            .device(11)
            .chain(&[1, 3, 4])
            .link(4, 10)
            .link(4, 11)
            .build()
            .unwrap();
        let report = route_topology(&topology, EngineConfig::default());

        assert!(report.converged);
        assert_eq!(report.overloaded, vec![11]);
        assert!(report.unrouted.is_empty());
        assert_eq!(report.node(10).unwrap().state, RouteState::Routed);
        assert_eq!(report.node(11).unwrap().state, RouteState::Overloaded);
        assert_eq!(report.node(3).unwrap().channels, 1);
    }

    #[test]
    fn isolated_islands_stay_unrouted() {
        // 1(C) - 2(D)    5 - 6(D)
        let topology = Topology::builder()
            .controller(1)
            .device(2)
            .cable(5)
            .device(6)
            .link(1, 2)
            .link(5, 6)
            .build()
            .unwrap();
        let report = route_topology(&topology, EngineConfig::default());

        assert!(report.converged);
        assert_eq!(report.unrouted, vec![5, 6]);
        assert_eq!(report.node(6).unwrap().state, RouteState::Unrouted);
        assert_eq!(report.node(6).unwrap().upstream, None);
    }

    #[test]
    fn a_single_pass_budget_reports_partial_routing() {
        let topology = two_device_chain();
        let report = route_topology(&topology, EngineConfig::default().with_max_passes(1));

        assert_eq!(report.passes, 1);
        assert!(!report.converged);
    }

    #[test]
    fn recompute_follows_topology_changes() {
        let mut engine = ChannelEngine::default();
        let before = engine.recompute(&branching_tree());
        assert!(before.unrouted.is_empty());

        // Cut the trunk between 3 and 4.
        let cut = Topology::builder()
            .controller(1)
            .cable(2)
            .cable(3)
            .cable(4)
            .cable(5)
            .device(6)
            .cable(7)
            .cable(8)
            .device(9)
            .device(10)
            .chain(&[1, 2, 3])
            .chain(&[4, 5, 6])
            .chain(&[4, 7, 10])
            .chain(&[5, 8, 9])
            .build()
            .unwrap();
        let after = engine.recompute(&cut);

        assert!(after.converged);
        for device in [6, 9, 10] {
            assert_eq!(after.node(device).unwrap().state, RouteState::Unrouted);
        }
        assert_eq!(after.node(3).unwrap().state, RouteState::Routed);
    }
}
