/// Run lifecycle engine
///
/// Owns the graph registry, the scheduler and the event bus, and moves
/// between `Idle → Running → {Paused ⇄ Running} → Stopping → Idle`. Each
/// `start` builds a fresh `ExecutionContext`, forks one task per start
/// node and spawns a supervisor that returns the engine to idle once no
/// task is left or stop has been requested.

use crate::config::{Config, EngineConfig};
use crate::desktop::Desktop;
use crate::graph::{CompiledGraph, Graph, GraphRegistry};
use crate::runtime::context::{ExecutionContext, RunSummary};
use crate::runtime::control::{BreakpointSet, ControlSignal};
use crate::runtime::error::EngineError;
use crate::runtime::events::{EngineEvent, EventBus, LogLevel, WindowCommand};
use crate::runtime::executor::NodeExecutor;
use crate::runtime::scheduler::Scheduler;
use crate::vision::VisualLocator;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Stopping,
}

/// Snapshot reported by the status API
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub run_id: Option<Uuid>,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub last_run: Option<RunSummary>,
    pub graph_nodes: Option<usize>,
    pub breakpoints: Vec<String>,
}

/// Graph execution engine
///
/// Shared behind an `Arc`; every method takes `&self` or `&Arc<Self>`.
pub struct Engine {
    config: EngineConfig,
    runtime_scale: f64,
    registry: GraphRegistry,
    scheduler: Scheduler,
    events: Arc<EventBus>,
    breakpoints: BreakpointSet,
    /// Holds Idle, Running or Stopping; Paused is derived from the run's gate
    state: watch::Sender<EngineState>,
    /// Most recent run, kept after it ends for statistics
    run: Mutex<Option<Arc<ExecutionContext>>>,
}

impl Engine {
    /// Create an engine driving `desktop`
    pub fn new(config: &Config, desktop: Desktop) -> Self {
        let runtime_scale = config
            .locator
            .runtime_scale
            .unwrap_or_else(|| desktop.screen.scale_factor());
        let locator = Arc::new(VisualLocator::new(config.locator.clone()));
        let executor = Arc::new(NodeExecutor::new(desktop, locator));
        let (state, _) = watch::channel(EngineState::Idle);

        Self {
            config: config.engine.clone(),
            runtime_scale,
            registry: GraphRegistry::new(),
            scheduler: Scheduler::new(executor),
            events: Arc::new(EventBus::new(config.server.event_history)),
            breakpoints: Arc::new(RwLock::new(BTreeSet::new())),
            state,
            run: Mutex::new(None),
        }
    }

    /// Validate and publish a graph
    ///
    /// Runs in flight keep the graph they started with. The breakpoint set
    /// is replaced by the graph's own.
    pub fn load(&self, graph: Graph) -> Result<Arc<CompiledGraph>, EngineError> {
        let breakpoints = graph.breakpoint_set();
        let compiled = self
            .registry
            .load(graph)
            .map_err(|e| EngineError::InvalidGraph(format!("{:#}", e)))?;
        *self.breakpoints.write() = breakpoints;
        Ok(compiled)
    }

    /// The loaded graph, if any
    pub fn graph(&self) -> Option<Arc<CompiledGraph>> {
        self.registry.current()
    }

    /// Start a run from `start_id`, or from every start node
    ///
    /// Fails without side effects when no graph is loaded or a run is in
    /// progress. Returns the new run's context.
    pub fn start(self: &Arc<Self>, start_id: Option<&str>) -> Result<Arc<ExecutionContext>, EngineError> {
        let graph = self.registry.current().ok_or(EngineError::NoGraph)?;

        let (ctx, starts) = {
            let mut run = self.run.lock();
            if *self.state.borrow() != EngineState::Idle {
                return Err(EngineError::AlreadyRunning);
            }

            let starts = match start_id {
                Some(id) if graph.node(id).is_none() => {
                    self.events
                        .log(format!("❌ Start node {} does not exist", id), LogLevel::Error);
                    return Err(EngineError::UnknownStartNode(id.to_string()));
                }
                Some(id) => vec![id.to_string()],
                None => graph.start_nodes(),
            };
            if starts.is_empty() {
                self.events.log("❌ No start node found", LogLevel::Error);
                return Err(EngineError::NoStartNode);
            }

            let scale_ratio = graph.graph.scale_ratio(self.runtime_scale);
            let ctx = Arc::new(ExecutionContext::new(
                Arc::clone(&graph),
                ControlSignal::new(Arc::clone(&self.breakpoints)),
                Arc::clone(&self.events),
                &self.config,
                scale_ratio,
            ));
            *run = Some(Arc::clone(&ctx));
            self.set_state(EngineState::Running);
            (ctx, starts)
        };

        self.events
            .log(format!("🚀 Engine started (run {})", ctx.run_id), LogLevel::Exec);
        tracing::info!(
            "🧭 {} of {} nodes reachable from {:?} (scale ratio {:.3})",
            graph.reachable_count(&starts),
            graph.graph.nodes.len(),
            starts,
            ctx.scale_ratio
        );
        if self.config.iconify_on_run {
            self.events.window(WindowCommand::Iconify);
        }

        for start in &starts {
            self.scheduler.fork(&ctx, start);
        }

        let engine = Arc::clone(self);
        let supervised = Arc::clone(&ctx);
        tokio::spawn(async move { engine.supervise(supervised).await });
        Ok(ctx)
    }

    /// Wait for the run to drain or be stopped, then report and go idle
    async fn supervise(&self, ctx: Arc<ExecutionContext>) {
        loop {
            if ctx.control.is_stopped() || ctx.pending_tasks() == 0 {
                break;
            }
            tokio::select! {
                _ = ctx.control.token().cancelled() => {}
                _ = tokio::time::sleep(self.config.supervisor_poll) => {}
            }
        }

        let summary = ctx.summary();
        self.events.log(
            format!(
                "📊 Run statistics: {} nodes, {} errors, {} dropped branches, {:.2}s",
                summary.nodes_executed,
                summary.errors,
                summary.dropped_forks,
                summary.elapsed.as_secs_f64()
            ),
            LogLevel::Info,
        );
        self.events.log("🏁 Flow finished", LogLevel::Info);
        self.events.select(None);
        if self.config.iconify_on_run {
            self.events.window(WindowCommand::Restore);
        }

        let _run = self.run.lock();
        self.set_state(EngineState::Idle);
    }

    /// Request stop; false when nothing is running
    pub fn stop(&self) -> bool {
        {
            // serialized with the supervisor's transition to idle
            let run = self.run.lock();
            if *self.state.borrow() == EngineState::Idle {
                return false;
            }
            let Some(ctx) = run.as_ref() else {
                return false;
            };
            if ctx.control.is_stopped() {
                return false;
            }
            ctx.control.stop();
            self.set_state(EngineState::Stopping);
        }
        self.events.log("🛑 Stopping...", LogLevel::Warning);
        true
    }

    /// Close the pause gate of the current run
    pub fn pause(&self) -> bool {
        let Some(ctx) = self.active_run() else {
            return false;
        };
        if ctx.control.is_stopped() || !ctx.control.pause() {
            return false;
        }
        self.events.log("⏸️ Flow paused", LogLevel::Paused);
        self.events.emit(EngineEvent::State {
            state: EngineState::Paused,
        });
        true
    }

    /// Reopen the pause gate of the current run
    pub fn resume(&self) -> bool {
        let Some(ctx) = self.active_run() else {
            return false;
        };
        if !ctx.control.resume() {
            return false;
        }
        self.events.log("▶️ Flow resumed", LogLevel::Info);
        self.events.emit(EngineEvent::State {
            state: EngineState::Running,
        });
        true
    }

    /// Toggle a breakpoint; applies to the current run immediately
    pub fn set_breakpoint(&self, node_id: &str, enabled: bool) {
        let mut breakpoints = self.breakpoints.write();
        if enabled {
            breakpoints.insert(node_id.to_string());
        } else {
            breakpoints.remove(node_id);
        }
        tracing::debug!("🔴 Breakpoint {} {}", node_id, if enabled { "set" } else { "cleared" });
    }

    pub fn breakpoints(&self) -> Vec<String> {
        self.breakpoints.read().iter().cloned().collect()
    }

    pub fn state(&self) -> EngineState {
        let base = *self.state.borrow();
        match (base, self.active_run()) {
            (EngineState::Running, Some(ctx)) if ctx.control.is_paused() => EngineState::Paused,
            _ => base,
        }
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.state();
        let run = self.run.lock().clone();
        let active = run.as_ref().filter(|_| state != EngineState::Idle);
        EngineStatus {
            state,
            run_id: active.map(|ctx| ctx.run_id),
            active_tasks: active.map(|ctx| ctx.active_tasks()).unwrap_or(0),
            queued_tasks: active
                .map(|ctx| ctx.pending_tasks().saturating_sub(ctx.active_tasks()))
                .unwrap_or(0),
            last_run: run.as_ref().map(|ctx| ctx.summary()),
            graph_nodes: self.registry.current().map(|g| g.graph.nodes.len()),
            breakpoints: self.breakpoints(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Resolve once the engine is idle
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|state| *state == EngineState::Idle).await;
    }

    /// The current run while one is in progress
    fn active_run(&self) -> Option<Arc<ExecutionContext>> {
        if *self.state.borrow() == EngineState::Idle {
            return None;
        }
        self.run.lock().clone()
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("⚙️ Engine state {:?} -> {:?}", previous, state);
            self.events.emit(EngineEvent::State { state });
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
