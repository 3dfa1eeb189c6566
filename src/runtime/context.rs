/// Per-run execution context
///
/// Everything a run owns lives here: the graph snapshot it started with,
/// its control signal, variables, window binding, device lock, task slots
/// and statistics. Tasks hold an `Arc<ExecutionContext>`, so tasks left
/// over from a stopped run only ever touch their own run's state.

use crate::config::{EngineConfig, OverflowPolicy};
use crate::graph::CompiledGraph;
use crate::runtime::control::ControlSignal;
use crate::runtime::events::EventBus;
use crate::runtime::memory::VariableStore;
use crate::vision::Rect;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The OS window a run is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowBinding {
    pub handle: u64,
    pub rect: Rect,
}

impl WindowBinding {
    /// Offset added to window-relative coordinates
    pub fn offset(&self) -> (i32, i32) {
        (self.rect.x, self.rect.y)
    }
}

/// Running and parked node tasks
#[derive(Debug, Default)]
pub(crate) struct TaskSlots {
    pub running: usize,
    pub queued: VecDeque<String>,
}

/// Counters reported when a run ends
#[derive(Debug, Default)]
pub struct RunStats {
    pub nodes_executed: AtomicUsize,
    pub errors: AtomicUsize,
    pub dropped_forks: AtomicUsize,
}

/// Point-in-time copy of `RunStats`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    pub nodes_executed: usize,
    pub errors: usize,
    pub dropped_forks: usize,
    pub elapsed: Duration,
}

pub struct ExecutionContext {
    pub run_id: Uuid,
    pub graph: Arc<CompiledGraph>,
    pub control: ControlSignal,
    pub memory: VariableStore,
    pub events: Arc<EventBus>,
    /// Serializes physical input sequences; perception never takes it
    pub io_lock: tokio::sync::Mutex<()>,
    /// Runtime scale over authoring scale, for template matching
    pub scale_ratio: f64,
    pub stats: RunStats,
    pub started: Instant,
    binding: Mutex<Option<WindowBinding>>,
    pub(crate) slots: Mutex<TaskSlots>,
    max_concurrency: usize,
    overflow: OverflowPolicy,
}

impl ExecutionContext {
    pub fn new(
        graph: Arc<CompiledGraph>,
        control: ControlSignal,
        events: Arc<EventBus>,
        config: &EngineConfig,
        scale_ratio: f64,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            graph,
            control,
            memory: VariableStore::new(),
            events,
            io_lock: tokio::sync::Mutex::new(()),
            scale_ratio,
            stats: RunStats::default(),
            started: Instant::now(),
            binding: Mutex::new(None),
            slots: Mutex::new(TaskSlots::default()),
            max_concurrency: config.max_concurrency.max(1),
            overflow: config.overflow,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    pub fn binding(&self) -> Option<WindowBinding> {
        *self.binding.lock()
    }

    pub fn set_binding(&self, binding: Option<WindowBinding>) {
        *self.binding.lock() = binding;
    }

    /// Offset of the bound window, `(0, 0)` when unbound
    pub fn window_offset(&self) -> (i32, i32) {
        self.binding().map(|b| b.offset()).unwrap_or((0, 0))
    }

    /// Tasks currently running
    pub fn active_tasks(&self) -> usize {
        self.slots.lock().running
    }

    /// Tasks running or parked
    pub fn pending_tasks(&self) -> usize {
        let slots = self.slots.lock();
        slots.running + slots.queued.len()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            nodes_executed: self.stats.nodes_executed.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            dropped_forks: self.stats.dropped_forks.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("binding", &self.binding())
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}
