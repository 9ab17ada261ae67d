//! Channelgrid library entry points.
//!
//! This crate routes a network of cables and devices to its controllers under
//! per-node channel capacity limits. Unbranched runs of cables are merged into
//! backbone segments, every segment searches outward for controllers and
//! neighbouring segments, and the engine selects, reroutes and repairs routes
//! over repeated passes until nothing changes or its budget runs out.
//! Higher-level consumers (the CLI, host simulations) should only depend on
//! the items exported here.
//!
//! ```ignore
//! use channelgrid_lib::{load_topology, ChannelEngine, EngineConfig};
//!
//! let topology = load_topology("network.json".as_ref())?;
//! let mut engine = ChannelEngine::new(EngineConfig::default());
//! let report = engine.recompute(&topology);
//! println!("{}", report.render_plain());
//! ```

pub mod backbone;
pub mod engine;
pub mod error;
pub mod frontier;
pub mod node;
pub mod report;
pub mod segment;
pub mod topology;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use backbone::{Backbone, RefreshSummary};
pub use engine::{route_topology, ChannelEngine, EngineConfig, DEFAULT_MAX_PASSES};
pub use error::{Error, Result};
pub use frontier::{Contact, PathSegment, SearchFrontier};
pub use node::{ChannelGrant, Node, NodeTable};
pub use report::{NodeRouting, RouteState, RoutingReport, SegmentSummary};
pub use segment::{
    BackboneSegment, NeighbourLink, RouteCandidate, RouteTarget, SegmentId, SegmentState,
};
pub use topology::{
    load_topology, NodeId, NodeKind, NodeRecord, Topology, TopologyBuilder, TopologyFile,
    TopologyNode,
};
