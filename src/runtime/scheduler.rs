/// Fork-per-edge task scheduler
///
/// Every traversal of a link spawns its own tokio task, so a node reached
/// through two links runs twice. Tasks are counted in the run's
/// `TaskSlots`; the count is incremented before spawning and decremented
/// only after a task has forked all of its successors, so the supervisor
/// never sees zero while work is still being handed on.

use crate::config::OverflowPolicy;
use crate::graph::types::{NodeType, FAIL_PORT, NEGATIVE_PORTS};
use crate::runtime::context::ExecutionContext;
use crate::runtime::engine::EngineState;
use crate::runtime::events::{EngineEvent, LogLevel, NodeStatus, WindowCommand};
use crate::runtime::executor::{NodeExecutor, Outcome};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Spawns node tasks for one engine
#[derive(Debug, Clone)]
pub struct Scheduler {
    executor: Arc<NodeExecutor>,
}

impl Scheduler {
    pub fn new(executor: Arc<NodeExecutor>) -> Self {
        Self { executor }
    }

    /// Start a task for `node_id`, subject to the concurrency cap
    pub fn fork(&self, ctx: &Arc<ExecutionContext>, node_id: &str) {
        if ctx.control.is_stopped() {
            return;
        }
        if ctx.graph.node(node_id).is_none() {
            tracing::warn!("⚠️ Fork to unknown node {} ignored", node_id);
            return;
        }

        {
            let mut slots = ctx.slots.lock();
            if slots.running >= ctx.max_concurrency() {
                match ctx.overflow() {
                    OverflowPolicy::Drop => {
                        drop(slots);
                        ctx.stats.dropped_forks.fetch_add(1, Ordering::Relaxed);
                        ctx.events.log(
                            format!(
                                "⚠️ Concurrency limit {} reached, dropping branch to {}",
                                ctx.max_concurrency(),
                                node_id
                            ),
                            LogLevel::Warning,
                        );
                    }
                    OverflowPolicy::Queue => {
                        slots.queued.push_back(node_id.to_string());
                        tracing::debug!("⏳ Queued {} ({} waiting)", node_id, slots.queued.len());
                    }
                }
                return;
            }
            slots.running += 1;
        }
        self.spawn(Arc::clone(ctx), node_id.to_string());
    }

    fn spawn(&self, ctx: Arc<ExecutionContext>, node_id: String) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let _slot = SlotGuard {
                scheduler: scheduler.clone(),
                ctx: Arc::clone(&ctx),
            };
            scheduler.run_task(&ctx, &node_id).await;
        });
    }

    /// Task body: breakpoint, pause gate, execute, propagate
    async fn run_task(&self, ctx: &Arc<ExecutionContext>, node_id: &str) {
        if ctx.control.is_stopped() {
            return;
        }
        let Some(node) = ctx.graph.node(node_id) else {
            return;
        };
        let title = node.title();

        if ctx.control.is_breakpoint(node_id) && ctx.control.pause() {
            ctx.events.log(format!("🔴 Breakpoint hit: {} ({})", title, node_id), LogLevel::Paused);
            ctx.events.emit(EngineEvent::State {
                state: EngineState::Paused,
            });
            ctx.events.window(WindowCommand::Restore);
        }
        ctx.control.wait_if_paused().await;
        if ctx.control.is_stopped() {
            return;
        }

        ctx.events.node_status(node_id, NodeStatus::Running);
        ctx.events.select(Some(node_id));

        let outcome = match self.executor.execute(ctx, node).await {
            Ok(Outcome::Port(port)) if !node.declares_port(&port) => {
                self.record_fault(ctx, node_id, &format!("returned undeclared port {}", port))
            }
            Ok(outcome) => {
                ctx.stats.nodes_executed.fetch_add(1, Ordering::Relaxed);
                outcome
            }
            Err(e) => self.record_fault(ctx, node_id, &format!("{:#}", e)),
        };

        let (source, port) = match outcome {
            Outcome::Stop => return,
            Outcome::Port(port) => (node_id.to_string(), port),
            Outcome::Redirect { node_id: target, port } => {
                ctx.events.node_status(node_id, NodeStatus::Ok);
                (target, port)
            }
        };
        if ctx.control.is_stopped() {
            return;
        }

        if let Some(source_node) = ctx.graph.node(&source) {
            if source_node.node_type != NodeType::Reroute {
                ctx.events.log(format!("↳ [{}] -> {}", source_node.title(), port), LogLevel::Exec);
            }
        }
        let status = if NEGATIVE_PORTS.contains(&port.as_str()) {
            NodeStatus::Fail
        } else {
            NodeStatus::Ok
        };
        ctx.events.node_status(&source, status);

        for target in ctx.graph.targets(&source, &port) {
            if ctx.control.is_stopped() {
                break;
            }
            self.fork(ctx, &target);
        }
    }

    fn record_fault(&self, ctx: &ExecutionContext, node_id: &str, reason: &str) -> Outcome {
        ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
        ctx.events.log(format!("💥 Node [{}] failed: {}", node_id, reason), LogLevel::Error);
        Outcome::port(FAIL_PORT)
    }

    /// Release a slot; under the queue policy the oldest parked fork takes it
    fn release(&self, ctx: &Arc<ExecutionContext>) {
        let next = {
            let mut slots = ctx.slots.lock();
            slots.running = slots.running.saturating_sub(1);
            if ctx.control.is_stopped() {
                slots.queued.clear();
                None
            } else {
                let next = slots.queued.pop_front();
                if next.is_some() {
                    slots.running += 1;
                }
                next
            }
        };
        if let Some(node_id) = next {
            self.spawn(Arc::clone(ctx), node_id);
        }
    }
}

/// Gives the task's slot back when the task ends, even by panic
struct SlotGuard {
    scheduler: Scheduler,
    ctx: Arc<ExecutionContext>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.scheduler.release(&self.ctx);
    }
}
