//! Output formatting for routing reports and topology checks.

use std::fmt::Write;

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

use channelgrid_lib::{Backbone, NodeKind, RoutingReport, Topology};

/// Presentation style for command results on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary and node table.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Render a routing report in the requested format.
pub fn render_report(report: &RoutingReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(report.render_plain()),
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(report)?)),
    }
}

/// Static shape of a topology before any routing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckSummary {
    pub nodes: usize,
    pub controllers: usize,
    pub devices: usize,
    pub cables: usize,
    pub links: usize,
    pub segments: usize,
}

impl CheckSummary {
    pub fn from_topology(topology: &Topology) -> Self {
        let count = |kind: NodeKind| topology.nodes().filter(|node| node.kind == kind).count();
        let links = topology.nodes().map(|node| node.degree()).sum::<usize>() / 2;
        let mut backbone = Backbone::new();
        backbone.refresh(topology);

        Self {
            nodes: topology.len(),
            controllers: count(NodeKind::Controller),
            devices: count(NodeKind::Device),
            cables: count(NodeKind::Cable),
            links,
            segments: backbone.len(),
        }
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Text => {
                let mut buffer = String::new();
                let _ = writeln!(
                    buffer,
                    "Topology: {} nodes ({} controllers, {} devices, {} cables), {} links",
                    self.nodes, self.controllers, self.devices, self.cables, self.links
                );
                let _ = writeln!(buffer, "Segments: {}", self.segments);
                Ok(buffer)
            }
            OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(self)?)),
        }
    }
}
