/// HTTP API Layer
///
/// This module provides the REST control surface of the engine. It handles:
/// - Loading and reading back the project graph
/// - Starting, stopping, pausing and resuming runs
/// - Breakpoints, status and recent events

use crate::graph::ProjectStorage;
use crate::runtime::Engine;
use std::sync::Arc;

// Project load/read endpoints
pub mod project;

// Run control endpoints
pub mod control;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// The engine runs are started on
    pub engine: Arc<Engine>,
    /// Where uploaded projects are persisted, if anywhere
    pub storage: Option<ProjectStorage>,
}

// Re-export router builders
pub use control::create_control_routes;
pub use project::create_project_routes;
