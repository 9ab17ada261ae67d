//! Published routing state: per-node entries, segment summaries and text rendering.

use std::collections::BTreeSet;
use std::fmt::Write;

use serde::Serialize;

use crate::backbone::Backbone;
use crate::node::NodeTable;
use crate::segment::{SegmentId, SegmentState};
use crate::topology::{NodeId, NodeKind};

/// Published routing outcome for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    /// Route root.
    Controller,
    /// Reaches a controller; devices also hold their channel.
    Routed,
    /// A device that reaches a controller but could not get a channel.
    Overloaded,
    /// No chain to any controller.
    Unrouted,
}

impl RouteState {
    /// Human-readable label shown in textual renderings.
    pub fn label(self) -> &'static str {
        match self {
            RouteState::Controller => "controller",
            RouteState::Routed => "routed",
            RouteState::Overloaded => "overloaded",
            RouteState::Unrouted => "unrouted",
        }
    }
}

/// Per-node routing entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeRouting {
    pub id: NodeId,
    pub kind: NodeKind,
    pub upstream: Option<NodeId>,
    pub channels: u32,
    pub capacity: u32,
    pub state: RouteState,
}

/// Diagnostic view of one live backbone segment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SegmentSummary {
    pub id: SegmentId,
    pub start: NodeId,
    pub state: SegmentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<NodeId>,
    pub candidates: usize,
    pub neighbours: usize,
}

/// Structured result of one recompute that higher-level consumers can serialise.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoutingReport {
    pub passes: usize,
    /// `false` when the pass or time budget ran out first.
    pub converged: bool,
    /// Devices holding a channel.
    pub channels_in_use: usize,
    pub unrouted: Vec<NodeId>,
    pub overloaded: Vec<NodeId>,
    /// Segments handed over to a neighbour during this recompute.
    pub retired_segments: usize,
    pub nodes: Vec<NodeRouting>,
    pub segments: Vec<SegmentSummary>,
}

impl RoutingReport {
    pub(crate) fn build(
        nodes: &NodeTable,
        backbone: &Backbone,
        overloaded: &BTreeSet<NodeId>,
        passes: usize,
        converged: bool,
    ) -> Self {
        let entries: Vec<NodeRouting> = nodes
            .iter()
            .map(|node| {
                let state = if node.is_controller() {
                    RouteState::Controller
                } else if nodes.controller_of(node.id()).is_none() {
                    RouteState::Unrouted
                } else if overloaded.contains(&node.id()) {
                    RouteState::Overloaded
                } else {
                    RouteState::Routed
                };
                NodeRouting {
                    id: node.id(),
                    kind: node.kind(),
                    upstream: node.upstream(),
                    channels: node.channels(),
                    capacity: node.capacity(),
                    state,
                }
            })
            .collect();

        let unrouted = entries
            .iter()
            .filter(|entry| entry.state == RouteState::Unrouted)
            .map(|entry| entry.id)
            .collect();
        let overloaded = entries
            .iter()
            .filter(|entry| entry.state == RouteState::Overloaded)
            .map(|entry| entry.id)
            .collect();
        let channels_in_use = entries
            .iter()
            .filter(|entry| entry.kind == NodeKind::Device && entry.state == RouteState::Routed)
            .count();

        let segments = backbone
            .iter()
            .map(|segment| SegmentSummary {
                id: segment.id(),
                start: segment.start(),
                state: segment.state(),
                selected: segment.selected(),
                candidates: segment.candidate_count(),
                neighbours: segment.neighbour_count(),
            })
            .collect();

        Self {
            passes,
            converged,
            channels_in_use,
            unrouted,
            overloaded,
            retired_segments: backbone.retired().len(),
            nodes: entries,
            segments,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRouting> {
        self.nodes
            .binary_search_by_key(&id, |entry| entry.id)
            .ok()
            .map(|index| &self.nodes[index])
    }

    /// Follow published upstream hops from `from` to its controller, both ends included.
    pub fn route_to_controller(&self, from: NodeId) -> Option<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut current = from;
        for _ in 0..=self.nodes.len() {
            let entry = self.node(current)?;
            chain.push(current);
            if entry.state == RouteState::Controller {
                return Some(chain);
            }
            current = entry.upstream?;
        }
        None
    }

    /// Render a plain-text summary followed by one line per node.
    pub fn render_plain(&self) -> String {
        let mut buffer = String::new();
        let _ = writeln!(
            buffer,
            "Routing: {} nodes, {} segments, {} passes ({})",
            self.nodes.len(),
            self.segments.len(),
            self.passes,
            if self.converged {
                "converged"
            } else {
                "budget exhausted"
            }
        );
        let _ = writeln!(buffer, "Channels in use: {}", self.channels_in_use);
        let _ = writeln!(buffer, "Unrouted: {}", join_ids(&self.unrouted));
        let _ = writeln!(buffer, "Overloaded: {}", join_ids(&self.overloaded));
        let _ = writeln!(
            buffer,
            "{:>8}  {:<10}  {:<10}  {:>8}  {:>8}",
            "node", "kind", "state", "upstream", "channels"
        );
        for entry in &self.nodes {
            let upstream = entry
                .upstream
                .map(|hop| hop.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                buffer,
                "{:>8}  {:<10}  {:<10}  {:>8}  {:>8}",
                entry.id,
                entry.kind.to_string(),
                entry.state.label(),
                upstream,
                format!("{}/{}", entry.channels, entry.capacity)
            );
        }
        buffer
    }
}

fn join_ids(ids: &[NodeId]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
