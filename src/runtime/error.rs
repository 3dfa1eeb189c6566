/// Engine-level errors
///
/// Node faults never surface here: they are mapped to the `fail` port at the
/// task boundary. These are the failures that prevent a run from starting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no graph is loaded")]
    NoGraph,
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("the graph has no start node")]
    NoStartNode,
    #[error("start node {0} does not exist")]
    UnknownStartNode(String),
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
}
