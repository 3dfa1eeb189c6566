/// Runtime Execution Engine
///
/// This module runs loaded graphs against the desktop. It handles:
/// - The run lifecycle (start, pause, resume, stop, breakpoints)
/// - Fork-per-edge task scheduling with tokio
/// - Per-node execution handlers
/// - Shared run memory and the engine event stream

// Run lifecycle and supervisor
pub mod engine;

// Fork-per-edge task spawning and concurrency cap
pub mod scheduler;

// Individual node execution handlers
pub mod executor;

// Per-run state shared by all tasks of a run
pub mod context;

// Stop token, pause gate and breakpoints
pub mod control;

// Run variables and `${name}` interpolation
pub mod memory;

// Engine events for observers
pub mod events;

pub mod error;

// Re-export main types
pub use context::{ExecutionContext, RunSummary, WindowBinding};
pub use control::ControlSignal;
pub use engine::{Engine, EngineState, EngineStatus};
pub use error::EngineError;
pub use events::{EngineEvent, EventBus, LogLevel, NodeStatus, WindowCommand};
pub use executor::{NodeExecutor, Outcome};
pub use memory::{VarValue, VariableStore};
pub use scheduler::Scheduler;
