/// Desktop Integration Seams
///
/// The engine never talks to the operating system directly. Everything it
/// needs from the desktop goes through the traits below:
/// - `Actuator`: pointer and keyboard input
/// - `ScreenCapture`: screen (or screen region) grabs
/// - `WindowSystem`: window enumeration, focus and geometry
/// - `AudioMeter`: output peak level
/// - `Launcher`: processes, shell commands and URLs
///
/// `Desktop` bundles one implementation of each and is handed to the engine.

use crate::graph::params::BindWinParams;
use crate::vision::Rect;
use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// Headless implementations for servers, CI and tests
pub mod headless;

// Real process launching
pub mod launcher;

pub use headless::{NoWindows, RecordingActuator, ScriptedAudio, SilentAudio, StaticScreen, StaticWindows};
pub use launcher::SystemLauncher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "right" => MouseButton::Right,
            "middle" => MouseButton::Middle,
            _ => MouseButton::Left,
        }
    }
}

/// One physical input action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InputAction {
    MoveTo { x: i32, y: i32, duration: Duration },
    Click { x: i32, y: i32, button: MouseButton, clicks: u32 },
    Drag { from: (i32, i32), to: (i32, i32), duration: Duration },
    Scroll { amount: i32 },
    TypeText { text: String },
    Paste { text: String },
    PressKey { key: String },
    Hotkey { keys: Vec<String> },
}

/// Pointer and keyboard driver
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn perform(&self, action: InputAction) -> Result<()>;
}

/// Screen grabber
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Grab the whole screen, or only `region` when given
    async fn capture(&self, region: Option<Rect>) -> Result<DynamicImage>;

    /// Display scale factor of this machine
    fn scale_factor(&self) -> f64 {
        1.0
    }
}

/// A top-level window as reported by the window system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub handle: u64,
    pub title: String,
    pub class_name: String,
    pub exe_name: String,
    pub rect: Rect,
}

/// Window lookup criteria; empty criteria are ignored
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowQuery {
    /// Process executable name, compared case-insensitively
    pub exe_name: Option<String>,
    /// Window class, compared case-insensitively
    pub class_name: Option<String>,
    /// Case-insensitive substring of the title
    pub title: Option<String>,
}

impl WindowQuery {
    /// Build the query a bind-window node describes
    ///
    /// Each criterion is used only when its toggle is on. With every toggle
    /// off the title is used as a substring match.
    pub fn from_params(params: &BindWinParams) -> Self {
        let pick = |on: bool, value: &str| (on && !value.is_empty()).then(|| value.to_string());
        let mut query = Self {
            exe_name: pick(params.use_exe, &params.exe_name),
            class_name: pick(params.use_class, &params.class_name),
            title: pick(params.use_title, &params.title),
        };
        if query.is_empty() {
            query.title = pick(true, &params.title);
        }
        query
    }

    pub fn is_empty(&self) -> bool {
        self.exe_name.is_none() && self.class_name.is_none() && self.title.is_none()
    }

    pub fn matches(&self, window: &WindowInfo) -> bool {
        if let Some(exe) = &self.exe_name {
            if !exe.eq_ignore_ascii_case(&window.exe_name) {
                return false;
            }
        }
        if let Some(class) = &self.class_name {
            if !class.eq_ignore_ascii_case(&window.class_name) {
                return false;
            }
        }
        if let Some(title) = &self.title {
            if !window.title.to_lowercase().contains(&title.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for WindowQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "exe={} class={} title={}",
            self.exe_name.as_deref().unwrap_or("-"),
            self.class_name.as_deref().unwrap_or("-"),
            self.title.as_deref().unwrap_or("-")
        )
    }
}

/// Window enumeration, focus and geometry
#[async_trait]
pub trait WindowSystem: Send + Sync {
    /// Visible top-level windows in z-order
    async fn list(&self) -> Result<Vec<WindowInfo>>;

    /// Bring a window to the foreground
    async fn focus(&self, handle: u64) -> Result<()>;

    /// Current bounds of a window, `None` once it no longer exists
    async fn window_rect(&self, handle: u64) -> Result<Option<Rect>>;

    /// First window matching `query`; an empty query matches nothing
    async fn find(&self, query: &WindowQuery) -> Result<Option<WindowInfo>> {
        if query.is_empty() {
            return Ok(None);
        }
        Ok(self.list().await?.into_iter().find(|w| query.matches(w)))
    }
}

/// Audio output peak meter
#[async_trait]
pub trait AudioMeter: Send + Sync {
    /// Current output peak in `0.0..=1.0`
    async fn peak(&self) -> Result<f32>;
}

/// Process, shell and browser launcher
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start an executable with a raw argument string
    async fn spawn(&self, path: &str, args: &str) -> Result<()>;

    /// Run a shell command line without waiting for it
    async fn shell(&self, command: &str) -> Result<()>;

    /// Open a URL in the default browser
    async fn open_url(&self, url: &str) -> Result<()>;
}

/// Everything the executor can touch on the desktop
#[derive(Clone)]
pub struct Desktop {
    pub actuator: Arc<dyn Actuator>,
    pub screen: Arc<dyn ScreenCapture>,
    pub windows: Arc<dyn WindowSystem>,
    pub audio: Arc<dyn AudioMeter>,
    pub launcher: Arc<dyn Launcher>,
}

impl Desktop {
    /// Headless desktop: recorded input, a blank screen, no windows and
    /// silence, with real process launching
    pub fn headless() -> Self {
        Self {
            actuator: Arc::new(RecordingActuator::default()),
            screen: Arc::new(StaticScreen::blank(1920, 1080)),
            windows: Arc::new(NoWindows),
            audio: Arc::new(SilentAudio),
            launcher: Arc::new(SystemLauncher),
        }
    }

    pub fn with_actuator(mut self, actuator: Arc<dyn Actuator>) -> Self {
        self.actuator = actuator;
        self
    }

    pub fn with_screen(mut self, screen: Arc<dyn ScreenCapture>) -> Self {
        self.screen = screen;
        self
    }

    pub fn with_windows(mut self, windows: Arc<dyn WindowSystem>) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioMeter>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }
}

impl std::fmt::Debug for Desktop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Desktop").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(title: &str, class: &str, exe: &str) -> WindowInfo {
        WindowInfo {
            handle: 1,
            title: title.into(),
            class_name: class.into(),
            exe_name: exe.into(),
            rect: Rect::new(0, 0, 100, 100),
        }
    }

    fn params(use_exe: bool, use_class: bool, use_title: bool) -> BindWinParams {
        BindWinParams {
            title: "notes".into(),
            exe_name: "Notepad.exe".into(),
            class_name: "Notepad".into(),
            use_exe,
            use_class,
            use_title,
        }
    }

    #[test]
    fn default_toggles_use_exe_and_class() {
        let query = WindowQuery::from_params(&params(true, true, false));
        assert_eq!(query.title, None);
        assert!(query.matches(&window("Untitled", "NOTEPAD", "notepad.exe")));
        assert!(!query.matches(&window("Untitled", "Edit", "notepad.exe")));
    }

    #[test]
    fn title_is_a_case_insensitive_substring() {
        let query = WindowQuery::from_params(&params(false, false, true));
        assert!(query.matches(&window("My NOTES - Editor", "x", "y")));
        assert!(!query.matches(&window("Calculator", "x", "y")));
    }

    #[test]
    fn all_toggles_off_falls_back_to_title() {
        let query = WindowQuery::from_params(&params(false, false, false));
        assert_eq!(query.title.as_deref(), Some("notes"));
        assert_eq!(query.exe_name, None);
    }

    #[test]
    fn exe_match_is_exact_not_substring() {
        let query = WindowQuery::from_params(&params(true, false, false));
        assert!(!query.matches(&window("t", "c", "notepad.exe.bak")));
    }

    #[test]
    fn button_names() {
        assert_eq!(MouseButton::parse("Right"), MouseButton::Right);
        assert_eq!(MouseButton::parse("middle"), MouseButton::Middle);
        assert_eq!(MouseButton::parse("whatever"), MouseButton::Left);
    }
}
