use thiserror::Error;

use crate::topology::NodeId;

/// Convenient result alias for the channelgrid library.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level library error type.
///
/// Routing outcomes (exhausted capacity, unreachable controllers, an iteration
/// budget running out) are never reported through this type; they surface in
/// [`crate::RoutingReport`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Raised when the same node identifier is declared twice.
    #[error("node {id} is declared more than once")]
    DuplicateNode { id: NodeId },

    /// Raised when a link references a node that was never declared.
    #[error("link references unknown node {id}")]
    UnknownNode { id: NodeId },

    /// Raised when a node is linked to itself.
    #[error("node {id} cannot link to itself")]
    SelfLoop { id: NodeId },

    /// Raised when a node declares a capacity of zero channels.
    #[error("node {id} must carry at least one channel")]
    InvalidCapacity { id: NodeId },

    /// Raised when a topology document is not valid JSON for the expected schema.
    #[error("failed to parse topology: {0}")]
    TopologyParse(#[from] serde_json::Error),

    /// Wrapper for IO errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
