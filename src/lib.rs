/// Flowpilot: graph-driven desktop automation engine
///
/// This library loads node graphs authored in a visual editor and runs them
/// against the desktop: every link traversal is its own tokio task, and
/// nodes drive input devices, locate reference images on screen and branch
/// on what they find.

// Core configuration and setup
pub mod config;

// Graph model, project file codec and compiled graph registry
pub mod graph;

// Image matching: template, feature and stillness checks
pub mod vision;

// Platform seams: input, capture, windows, audio, process launching
pub mod desktop;

// Runtime execution engine - run lifecycle, scheduling and node handlers
pub mod runtime;

// HTTP API layer - project loading and run control endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use desktop::Desktop;
pub use graph::{Graph, Link, Node, NodeType};
pub use runtime::{Engine, EngineError, EngineEvent, EngineState};
pub use server::start_server;
