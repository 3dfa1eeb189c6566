/// Node execution handlers
///
/// `NodeExecutor::execute` substitutes `${var}` tokens into the node's data,
/// refreshes the bound window, then dispatches on the node type and returns
/// the port to continue from. Expected negatives (not found, timeout,
/// condition unmet) are ports; only unexpected faults are `Err`, which the
/// scheduler maps to the `fail` port.

use crate::desktop::{Desktop, InputAction, MouseButton, WindowQuery};
use crate::graph::params::{
    BindWinParams, ClickKind, Comparison, Fields, ImageParams, KeyboardParams, MouseAction, MouseParams, NodeParams,
    SetVarParams, SoundMode, SoundParams, StaticParams, SwitchParams,
};
use crate::graph::types::{Node, SUCCESS_PORTS};
use crate::runtime::context::{ExecutionContext, WindowBinding};
use crate::runtime::events::{EngineEvent, LogLevel};
use crate::runtime::memory::VarValue;
use crate::vision::{MatchStrategy, Rect, VisualLocator};
use anyhow::{bail, Context, Result};
use async_recursion::async_recursion;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long later anchors of an image node get to appear
const ANCHOR_FOLLOWUP: Duration = Duration::from_secs(2);
/// Padding added around the anchor-derived search region
const ANCHOR_PADDING: i32 = 15;
const IMAGE_RETRY: Duration = Duration::from_millis(200);
const SCROLL_SETTLE: Duration = Duration::from_millis(800);
const STATIC_POLL: Duration = Duration::from_millis(200);
const SOUND_POLL: Duration = Duration::from_millis(100);
const WEB_SETTLE: Duration = Duration::from_secs(2);

/// What a node execution asks the scheduler to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fork the targets linked to this port of the executed node
    Port(String),
    /// Do not propagate
    Stop,
    /// Fork the targets linked to `port` of another node, which was
    /// executed inline (sequence branches)
    Redirect { node_id: String, port: String },
}

impl Outcome {
    pub fn port(name: &str) -> Self {
        Outcome::Port(name.to_string())
    }
}

/// Seconds from node data as a `Duration`; negative or non-finite is zero
pub fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value.min(1.0e9))
    } else {
        Duration::ZERO
    }
}

/// Node executor that handles execution of every node type
///
/// Holds the desktop seams and the locator; all run state comes in through
/// the `ExecutionContext`.
#[derive(Debug)]
pub struct NodeExecutor {
    desktop: Desktop,
    locator: Arc<VisualLocator>,
}

impl NodeExecutor {
    pub fn new(desktop: Desktop, locator: Arc<VisualLocator>) -> Self {
        Self { desktop, locator }
    }

    /// Execute a single node
    #[async_recursion]
    pub async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Outcome> {
        if ctx.control.is_stopped() {
            return Ok(Outcome::Stop);
        }

        let params = {
            let fields = Fields::substituted(&node.data, |text| ctx.memory.interpolate(text));
            NodeParams::parse(node.node_type, &fields)
        };
        self.refresh_binding(ctx).await;
        tracing::debug!("🚀 Executing node {} ({})", node.id, node.node_type);

        match params {
            NodeParams::Start | NodeParams::Reroute => Ok(Outcome::port("out")),
            NodeParams::End => {
                ctx.control.stop();
                Ok(Outcome::Stop)
            }
            NodeParams::Wait { seconds: secs } => Ok(if ctx.control.sleep(seconds(secs)).await {
                Outcome::port("out")
            } else {
                Outcome::Stop
            }),
            NodeParams::Notify { message, duration, sound } => {
                ctx.events.log(format!("🔔 {}", message), LogLevel::Info);
                ctx.events.emit(EngineEvent::Notify { message, duration, sound });
                Ok(Outcome::port("out"))
            }
            NodeParams::OpenApp { path, args } => Ok(self.execute_open_app(ctx, &path, &args).await),
            NodeParams::Cmd { command } => {
                if let Err(e) = self.desktop.launcher.shell(&command).await {
                    ctx.events.log(format!("❌ Command failed: {:#}", e), LogLevel::Error);
                }
                Ok(Outcome::port("out"))
            }
            NodeParams::Web { url } => {
                if let Err(e) = self.desktop.launcher.open_url(&url).await {
                    ctx.events.log(format!("❌ Could not open {}: {:#}", url, e), LogLevel::Error);
                }
                ctx.control.sleep(WEB_SETTLE).await;
                Ok(Outcome::port("out"))
            }
            NodeParams::BindWin(p) => self.execute_bind_window(ctx, &p).await,
            NodeParams::SetVar(p) => {
                apply_set_var(ctx, &p);
                Ok(Outcome::port("out"))
            }
            NodeParams::VarSwitch(p) => Ok(Outcome::Port(evaluate_switch(ctx, &p))),
            NodeParams::Sequence { steps } => self.execute_sequence(ctx, node, steps).await,
            NodeParams::Loop { infinite, count } => Ok(Outcome::port(advance_loop(ctx, &node.id, infinite, count))),
            NodeParams::Mouse(p) => {
                self.execute_mouse(ctx, &p).await;
                Ok(Outcome::port("out"))
            }
            NodeParams::Keyboard(p) => {
                self.execute_keyboard(ctx, &p).await;
                Ok(Outcome::port("out"))
            }
            NodeParams::Image(p) => self.execute_find_image(ctx, node, &p).await,
            NodeParams::IfImg { confidence } => self.execute_images_present(ctx, node, confidence).await,
            NodeParams::IfStatic(p) => self.execute_stillness(ctx, &p).await,
            NodeParams::IfSound(p) => self.execute_sound(ctx, &p).await,
        }
    }

    /// Re-read the bound window's bounds; a vanished window drops the binding
    async fn refresh_binding(&self, ctx: &ExecutionContext) {
        let Some(binding) = ctx.binding() else {
            return;
        };
        match self.desktop.windows.window_rect(binding.handle).await {
            Ok(Some(rect)) => ctx.set_binding(Some(WindowBinding {
                handle: binding.handle,
                rect,
            })),
            Ok(None) => {
                ctx.events.log("⚠️ Bound window is gone, clearing window context", LogLevel::Warning);
                ctx.set_binding(None);
            }
            Err(e) => {
                ctx.events.log(
                    format!("⚠️ Could not read bound window bounds, clearing window context: {:#}", e),
                    LogLevel::Warning,
                );
                ctx.set_binding(None);
            }
        }
    }

    async fn execute_open_app(&self, ctx: &ExecutionContext, path: &str, args: &str) -> Outcome {
        match self.desktop.launcher.spawn(path, args).await {
            Ok(()) => {
                let name = Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string());
                ctx.events.log(format!("🚀 Launched {}", name), LogLevel::Success);
                Outcome::port("out")
            }
            Err(e) => {
                ctx.events.log(format!("❌ Launch failed: {:#}", e), LogLevel::Error);
                Outcome::port("fail")
            }
        }
    }

    async fn execute_bind_window(&self, ctx: &ExecutionContext, params: &BindWinParams) -> Result<Outcome> {
        let query = WindowQuery::from_params(params);
        let Some(window) = self.desktop.windows.find(&query).await? else {
            ctx.events.log(format!("❌ No window matches ({})", query), LogLevel::Warning);
            return Ok(Outcome::port("fail"));
        };

        if let Err(e) = self.desktop.windows.focus(window.handle).await {
            tracing::warn!("⚠️ Could not focus window {}: {:#}", window.handle, e);
        }
        ctx.set_binding(Some(WindowBinding {
            handle: window.handle,
            rect: window.rect,
        }));
        let label = [&params.exe_name, &params.title]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "window".to_string());
        ctx.events.log(format!("⚓ Bound {}", label), LogLevel::Success);
        Ok(Outcome::port("success"))
    }

    /// Probe branches 1..N in order, executing each branch target inline
    ///
    /// The first branch reporting a success-like port wins: its own
    /// downstream is forked and the sequence itself does not propagate.
    async fn execute_sequence(&self, ctx: &ExecutionContext, node: &Node, steps: usize) -> Result<Outcome> {
        for step in 1..=steps {
            if ctx.control.is_stopped() {
                return Ok(Outcome::Stop);
            }
            let Some(target_id) = ctx.graph.targets(&node.id, &step.to_string()).into_iter().next() else {
                continue;
            };
            let Some(target) = ctx.graph.node(&target_id) else {
                continue;
            };

            tracing::debug!("🔀 Sequence {} probing branch {} ({})", node.id, step, target_id);
            let outcome = match self.execute(ctx, target).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
                    ctx.events.log(
                        format!("💥 Sequence branch {} ({}) failed: {:#}", step, target_id, e),
                        LogLevel::Error,
                    );
                    continue;
                }
            };
            match outcome {
                Outcome::Port(port) if SUCCESS_PORTS.contains(&port.as_str()) => {
                    return Ok(Outcome::Redirect {
                        node_id: target_id,
                        port,
                    })
                }
                redirect @ Outcome::Redirect { .. } => return Ok(redirect),
                _ if ctx.control.is_stopped() => return Ok(Outcome::Stop),
                _ => {}
            }
        }
        Ok(Outcome::port("else"))
    }

    async fn execute_mouse(&self, ctx: &ExecutionContext, params: &MouseParams) {
        let _io = ctx.io_lock.lock().await;
        let (ox, oy) = ctx.window_offset();
        let duration = seconds(params.duration);
        let action = match params.action {
            MouseAction::Click { x, y, button, clicks } => InputAction::Click {
                x: x + ox,
                y: y + oy,
                button,
                clicks,
            },
            MouseAction::DoubleClick { x, y } => InputAction::Click {
                x: x + ox,
                y: y + oy,
                button: MouseButton::Left,
                clicks: 2,
            },
            MouseAction::Move { x, y } => InputAction::MoveTo {
                x: x + ox,
                y: y + oy,
                duration,
            },
            MouseAction::Drag { from, to } => InputAction::Drag {
                from: (from.0 + ox, from.1 + oy),
                to: (to.0 + ox, to.1 + oy),
                duration,
            },
            MouseAction::Scroll { amount } => InputAction::Scroll { amount },
        };
        if let Err(e) = self.desktop.actuator.perform(action).await {
            ctx.events.log(format!("❌ Mouse action failed: {:#}", e), LogLevel::Error);
        }
    }

    async fn execute_keyboard(&self, ctx: &ExecutionContext, params: &KeyboardParams) {
        let _io = ctx.io_lock.lock().await;
        let actions = match params {
            KeyboardParams::Text { text, paste, press_enter } => {
                let mut actions = vec![if *paste {
                    InputAction::Paste { text: text.clone() }
                } else {
                    InputAction::TypeText { text: text.clone() }
                }];
                if *press_enter {
                    actions.push(InputAction::PressKey { key: "enter".to_string() });
                }
                actions
            }
            KeyboardParams::Hotkey { keys } => vec![InputAction::Hotkey { keys: keys.clone() }],
        };
        for action in actions {
            if let Err(e) = self.desktop.actuator.perform(action).await {
                ctx.events.log(format!("❌ Keyboard action failed: {:#}", e), LogLevel::Error);
                break;
            }
        }
    }

    async fn execute_find_image(&self, ctx: &ExecutionContext, node: &Node, params: &ImageParams) -> Result<Outcome> {
        let Some(reference) = node.assets.image.clone() else {
            bail!("node {} has no reference image", node.id);
        };
        let timeout = seconds(params.timeout);
        let token = ctx.control.token();
        let screen = self.desktop.screen.as_ref();
        let opts = self
            .locator
            .options(params.confidence, ctx.scale_ratio)
            .with_strategy(params.strategy);
        let mut region = ctx.binding().map(|b| b.rect);

        if let Some(first) = params.anchors.first() {
            let mut primary = None;
            for (i, _) in params.anchors.iter().enumerate() {
                if ctx.control.is_stopped() {
                    return Ok(Outcome::Stop);
                }
                let anchor = node
                    .assets
                    .anchors
                    .get(i)
                    .cloned()
                    .flatten()
                    .with_context(|| format!("anchor {} of node {} has no image", i + 1, node.id))?;
                let wait = if i == 0 { timeout } else { ANCHOR_FOLLOWUP };
                let opts = opts.clone().with_region(region);
                match self.locator.poll(screen, anchor, &opts, wait, token).await {
                    Some(found) if i == 0 => primary = Some(found),
                    Some(_) => {}
                    None if ctx.control.is_stopped() => return Ok(Outcome::Stop),
                    None => {
                        tracing::debug!("⚓ Anchor {} of {} not found", i + 1, node.id);
                        return Ok(Outcome::port("timeout"));
                    }
                }
            }
            if let Some(anchor) = primary {
                let dx = params.target_rect.x - first.rect_x;
                let dy = params.target_rect.y - first.rect_y;
                region = Some(Rect::new(
                    (anchor.rect.x + dx - ANCHOR_PADDING).max(0),
                    (anchor.rect.y + dy - ANCHOR_PADDING).max(0),
                    params.target_rect.width + 2 * ANCHOR_PADDING as u32,
                    params.target_rect.height + 2 * ANCHOR_PADDING as u32,
                ));
            }
        }

        let opts = opts.with_region(region);
        let started = Instant::now();
        loop {
            if ctx.control.is_stopped() {
                return Ok(Outcome::Stop);
            }
            ctx.control.wait_if_paused().await;

            if let Some(found) = self
                .locator
                .poll(screen, Arc::clone(&reference), &opts, Duration::ZERO, token)
                .await
            {
                tracing::debug!("🎯 Node {} found target at {:?} (score {:.3})", node.id, found.rect, found.score);
                self.click_match(ctx, found.rect, params).await;
                return Ok(Outcome::port("found"));
            }

            if params.auto_scroll {
                {
                    let _io = ctx.io_lock.lock().await;
                    if let Err(e) = self
                        .desktop
                        .actuator
                        .perform(InputAction::Scroll {
                            amount: params.scroll_amount,
                        })
                        .await
                    {
                        tracing::warn!("⚠️ Auto-scroll failed: {:#}", e);
                    }
                }
                if !ctx.control.sleep(SCROLL_SETTLE).await {
                    return Ok(Outcome::Stop);
                }
            }

            if started.elapsed() > timeout {
                return Ok(Outcome::port("timeout"));
            }
            if !ctx.control.sleep(IMAGE_RETRY).await {
                return Ok(Outcome::Stop);
            }
        }
    }

    async fn click_match(&self, ctx: &ExecutionContext, rect: Rect, params: &ImageParams) {
        let (button, clicks) = match params.click {
            ClickKind::None => return,
            ClickKind::Click => (MouseButton::Left, 1),
            ClickKind::DoubleClick => (MouseButton::Left, 2),
            ClickKind::RightClick => (MouseButton::Right, 1),
        };
        let (fx, fy) = rect.point_at(params.relative_click.0, params.relative_click.1);
        let x = fx.round() as i32 + params.offset.0;
        let y = fy.round() as i32 + params.offset.1;

        let _io = ctx.io_lock.lock().await;
        let actions = [
            InputAction::MoveTo {
                x,
                y,
                duration: Duration::ZERO,
            },
            InputAction::Click { x, y, button, clicks },
        ];
        for action in actions {
            if let Err(e) = self.desktop.actuator.perform(action).await {
                ctx.events.log(format!("❌ Click on match failed: {:#}", e), LogLevel::Error);
                return;
            }
        }
    }

    /// One capture; every condition image must match it
    async fn execute_images_present(&self, ctx: &ExecutionContext, node: &Node, confidence: f32) -> Result<Outcome> {
        if node.assets.images.is_empty() {
            return Ok(Outcome::port("no"));
        }
        let region = ctx.binding().map(|b| b.rect);
        let capture = Arc::new(self.desktop.screen.capture(region).await?);
        let mut opts = self
            .locator
            .options(confidence, ctx.scale_ratio)
            .with_strategy(MatchStrategy::Hybrid);
        opts.multiscale = true;

        for (i, image) in node.assets.images.iter().enumerate() {
            if ctx.control.is_stopped() {
                return Ok(Outcome::Stop);
            }
            let Some(image) = image.clone() else {
                tracing::debug!("🖼️ Condition image {} of {} was never captured", i + 1, node.id);
                return Ok(Outcome::port("no"));
            };
            let locator = Arc::clone(&self.locator);
            let capture = Arc::clone(&capture);
            let opts = opts.clone();
            let found = tokio::task::spawn_blocking(move || locator.locate(&image, &capture, &opts))
                .await
                .context("image matching task failed")?;
            if found.is_none() {
                return Ok(Outcome::port("no"));
            }
        }
        Ok(Outcome::port("yes"))
    }

    /// Wait for the region to stay unchanged for `duration` within `timeout`
    async fn execute_stillness(&self, ctx: &ExecutionContext, params: &StaticParams) -> Result<Outcome> {
        let Some(roi) = params.roi else {
            return Ok(Outcome::port("no"));
        };
        let (ox, oy) = ctx.window_offset();
        let area = roi.offset(ox, oy);
        let hold = seconds(params.duration);
        let timeout = seconds(params.timeout);
        let threshold = params.threshold;

        let started = Instant::now();
        let mut still_since = Instant::now();
        let mut last = Arc::new(self.desktop.screen.capture(Some(area)).await?);
        while started.elapsed() < timeout {
            if ctx.control.is_stopped() {
                return Ok(Outcome::Stop);
            }
            let current = Arc::new(self.desktop.screen.capture(Some(area)).await?);
            let (a, b) = (Arc::clone(&last), Arc::clone(&current));
            let still = tokio::task::spawn_blocking(move || VisualLocator::is_static(&a, &b, threshold))
                .await
                .context("stillness comparison failed")?;

            if still {
                if still_since.elapsed() >= hold {
                    return Ok(Outcome::port("yes"));
                }
            } else {
                still_since = Instant::now();
                last = current;
            }
            if !ctx.control.sleep(STATIC_POLL).await {
                return Ok(Outcome::Stop);
            }
        }
        Ok(Outcome::port("no"))
    }

    async fn execute_sound(&self, ctx: &ExecutionContext, params: &SoundParams) -> Result<Outcome> {
        let timeout = seconds(params.timeout);
        let started = Instant::now();
        while started.elapsed() < timeout {
            if ctx.control.is_stopped() {
                return Ok(Outcome::Stop);
            }
            let peak = self.desktop.audio.peak().await?;
            let hit = match params.mode {
                SoundMode::HasSound => peak > params.threshold,
                SoundMode::IsSilent => peak < params.threshold,
            };
            if hit {
                return Ok(Outcome::port("yes"));
            }
            if !ctx.control.sleep(SOUND_POLL).await {
                return Ok(Outcome::Stop);
            }
        }
        Ok(Outcome::port("no"))
    }
}

/// Batch entries first, then the single `var_name`/`var_value` pair
fn apply_set_var(ctx: &ExecutionContext, params: &SetVarParams) {
    for (name, value) in params.batch.iter().chain(params.single.iter()) {
        ctx.memory.set(name.clone(), VarValue::from(value));
    }
}

/// Port chosen by a variable switch
///
/// Single mode compares text exactly (case-sensitive). Multi mode returns
/// the first case, in declaration order, whose value equals every listed
/// variable.
fn evaluate_switch(ctx: &ExecutionContext, params: &SwitchParams) -> String {
    match params {
        SwitchParams::Single {
            variable,
            comparison,
            value,
        } => {
            let equal = ctx.memory.text(variable) == *value;
            let hit = match comparison {
                Comparison::Equal => equal,
                Comparison::NotEqual => !equal,
            };
            let port = if hit { "yes" } else { "no" };
            port.to_string()
        }
        SwitchParams::Multi { variables, cases } => {
            let values: Vec<String> = variables.iter().map(|v| ctx.memory.text(v)).collect();
            cases
                .iter()
                .find(|case| values.iter().all(|v| *v == case.value))
                .map(|case| case.id.clone())
                .unwrap_or_else(|| "else".to_string())
        }
    }
}

/// Counted loop: `loop` while the counter is below `count`, then `exit`
/// once and forget the counter
fn advance_loop(ctx: &ExecutionContext, node_id: &str, infinite: bool, count: i64) -> &'static str {
    if infinite {
        return "loop";
    }
    let key = format!("loop_{}", node_id);
    let mut looped = false;
    ctx.memory.update_with(&key, |current| {
        let done = current.and_then(VarValue::as_int).unwrap_or(0);
        if done < count {
            looped = true;
            Some(VarValue::Int(done + 1))
        } else {
            None
        }
    });
    if looped {
        "loop"
    } else {
        "exit"
    }
}
