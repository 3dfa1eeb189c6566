/// Headless desktop implementations
///
/// Used when the engine runs without a display (servers, CI) and by the test
/// suite. Input is recorded instead of injected, the screen is an image held
/// in memory, and windows and audio levels are whatever the owner sets.

use crate::desktop::{Actuator, AudioMeter, InputAction, ScreenCapture, WindowInfo, WindowSystem};
use crate::vision::Rect;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Actuator that appends every action to an in-memory log
#[derive(Debug, Default)]
pub struct RecordingActuator {
    actions: Mutex<Vec<InputAction>>,
    /// Simulated time each action takes
    latency: Option<Duration>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            latency: Some(latency),
        }
    }

    /// Snapshot of everything performed so far
    pub fn actions(&self) -> Vec<InputAction> {
        self.actions.lock().clone()
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn perform(&self, action: InputAction) -> Result<()> {
        tracing::debug!("🖱️ Input: {:?}", action);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.actions.lock().push(action);
        Ok(())
    }
}

/// Screen backed by an in-memory image that can be swapped at any time
#[derive(Debug)]
pub struct StaticScreen {
    frame: RwLock<Arc<DynamicImage>>,
    scale: f64,
}

impl StaticScreen {
    pub fn new(frame: DynamicImage) -> Self {
        Self {
            frame: RwLock::new(Arc::new(frame)),
            scale: 1.0,
        }
    }

    /// Uniform mid-grey screen
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))))
    }

    /// Screen showing an image file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let frame = image::open(path).with_context(|| format!("Failed to open screen image {}", path.display()))?;
        Ok(Self::new(frame))
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Replace what the screen shows
    pub fn set_frame(&self, frame: DynamicImage) {
        *self.frame.write() = Arc::new(frame);
    }
}

#[async_trait]
impl ScreenCapture for StaticScreen {
    async fn capture(&self, region: Option<Rect>) -> Result<DynamicImage> {
        let frame = self.frame.read().clone();
        match region {
            None => Ok((*frame).clone()),
            Some(region) => {
                let area = region
                    .clamp_to(frame.width(), frame.height())
                    .ok_or_else(|| anyhow!("Region {:?} lies outside the screen", region))?;
                Ok(frame.crop_imm(area.x as u32, area.y as u32, area.width, area.height))
            }
        }
    }

    fn scale_factor(&self) -> f64 {
        self.scale
    }
}

/// Window system with no windows at all
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWindows;

#[async_trait]
impl WindowSystem for NoWindows {
    async fn list(&self) -> Result<Vec<WindowInfo>> {
        Ok(Vec::new())
    }

    async fn focus(&self, handle: u64) -> Result<()> {
        Err(anyhow!("No window with handle {}", handle))
    }

    async fn window_rect(&self, _handle: u64) -> Result<Option<Rect>> {
        Ok(None)
    }
}

/// Window system holding a caller-managed window list
#[derive(Debug, Default)]
pub struct StaticWindows {
    windows: RwLock<Vec<WindowInfo>>,
    focused: Mutex<Vec<u64>>,
}

impl StaticWindows {
    pub fn new(windows: Vec<WindowInfo>) -> Self {
        Self {
            windows: RwLock::new(windows),
            focused: Mutex::new(Vec::new()),
        }
    }

    /// Close a window
    pub fn remove(&self, handle: u64) {
        self.windows.write().retain(|w| w.handle != handle);
    }

    /// Move or resize a window
    pub fn set_rect(&self, handle: u64, rect: Rect) {
        if let Some(window) = self.windows.write().iter_mut().find(|w| w.handle == handle) {
            window.rect = rect;
        }
    }

    /// Handles focused so far, oldest first
    pub fn focus_history(&self) -> Vec<u64> {
        self.focused.lock().clone()
    }
}

#[async_trait]
impl WindowSystem for StaticWindows {
    async fn list(&self) -> Result<Vec<WindowInfo>> {
        Ok(self.windows.read().clone())
    }

    async fn focus(&self, handle: u64) -> Result<()> {
        if !self.windows.read().iter().any(|w| w.handle == handle) {
            return Err(anyhow!("No window with handle {}", handle));
        }
        self.focused.lock().push(handle);
        Ok(())
    }

    async fn window_rect(&self, handle: u64) -> Result<Option<Rect>> {
        Ok(self.windows.read().iter().find(|w| w.handle == handle).map(|w| w.rect))
    }
}

/// Audio meter that never hears anything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAudio;

#[async_trait]
impl AudioMeter for SilentAudio {
    async fn peak(&self) -> Result<f32> {
        Ok(0.0)
    }
}

/// Audio meter reporting whatever level was last set
#[derive(Debug, Default)]
pub struct ScriptedAudio {
    level: RwLock<f32>,
}

impl ScriptedAudio {
    pub fn new(level: f32) -> Self {
        Self { level: RwLock::new(level) }
    }

    pub fn set_level(&self, level: f32) {
        *self.level.write() = level;
    }
}

#[async_trait]
impl AudioMeter for ScriptedAudio {
    async fn peak(&self) -> Result<f32> {
        Ok(*self.level.read())
    }
}
