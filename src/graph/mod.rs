/// Graph Model Layer
///
/// This module handles automation graph definitions, persistence and the
/// hot-swap registry:
/// - Type definitions (Graph, Node, Link, NodeType)
/// - Typed per-node parameters built from raw node data
/// - JSON project files with embedded base64 images
/// - Lock-free registry using ArcSwap

// Core graph type definitions
pub mod types;

// Typed node parameters
pub mod params;

// Project file persistence
pub mod storage;

// Hot-swap registry with the petgraph link index
pub mod registry;

// Re-export commonly used types
pub use params::{Fields, NodeParams};
pub use registry::{CompiledGraph, GraphRegistry};
pub use storage::ProjectStorage;
pub use types::{Graph, GraphMetadata, Link, Node, NodeAssets, NodeType, FAIL_PORT, STOP_PORT};
