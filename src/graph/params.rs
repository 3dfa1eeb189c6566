/// Typed node parameters
///
/// `NodeParams` is the tagged union the executor dispatches on: one variant
/// per node type, built from a node's raw data map. Construction is lenient
/// the same way the editor is: numbers may arrive as strings (usually after
/// `${var}` substitution) and unparsable values fall back to the field default.

use crate::desktop::MouseButton;
use crate::graph::types::NodeType;
use crate::vision::{MatchStrategy, Rect};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Read-only view over a node's data map with an optional substitution overlay
pub struct Fields<'a> {
    raw: &'a Map<String, Value>,
    overlay: HashMap<&'a str, Value>,
}

impl<'a> Fields<'a> {
    /// View the data as authored
    pub fn new(raw: &'a Map<String, Value>) -> Self {
        Self {
            raw,
            overlay: HashMap::new(),
        }
    }

    /// View the data with `${name}` tokens expanded by `interpolate`
    ///
    /// Substitution is shallow: only top-level string values are rewritten,
    /// except `batch_vars`, whose entries are substituted one by one.
    pub fn substituted<F>(raw: &'a Map<String, Value>, interpolate: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        let mut overlay = HashMap::new();
        for (key, value) in raw {
            match value {
                Value::String(text) if text.contains("${") => {
                    overlay.insert(key.as_str(), Value::String(interpolate(text)));
                }
                Value::Array(entries) if key == "batch_vars" => {
                    let entries = entries
                        .iter()
                        .map(|entry| match entry {
                            Value::Object(obj) => Value::Object(
                                obj.iter()
                                    .map(|(k, v)| match v {
                                        Value::String(s) if s.contains("${") => {
                                            (k.clone(), Value::String(interpolate(s)))
                                        }
                                        other => (k.clone(), other.clone()),
                                    })
                                    .collect(),
                            ),
                            other => other.clone(),
                        })
                        .collect();
                    overlay.insert(key.as_str(), Value::Array(entries));
                }
                _ => {}
            }
        }
        Self { raw, overlay }
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.overlay.get(key).or_else(|| self.raw.get(key))
    }

    /// String field; scalars are stringified, null/missing yields `default`
    pub fn string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(value) => scalar_text(value).unwrap_or_else(|| default.to_string()),
            None => default.to_string(),
        }
    }

    /// Float field accepting numbers or numeric strings
    pub fn float(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(scalar_f64).unwrap_or(default)
    }

    /// Integer field, truncating floats the way the editor stores them
    pub fn int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(scalar_f64)
            .map(|f| f.trunc() as i64)
            .unwrap_or(default)
    }

    pub fn boolean(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" | "" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Object entries of a list field; non-object entries are skipped
    pub fn objects(&self, key: &str) -> Vec<&Map<String, Value>> {
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            _ => Vec::new(),
        }
    }

    /// Two-number field stored as `[a, b]`
    pub fn pair(&self, key: &str, default: (f64, f64)) -> (f64, f64) {
        match self.get(key) {
            Some(Value::Array(items)) if items.len() >= 2 => {
                match (scalar_f64(&items[0]), scalar_f64(&items[1])) {
                    (Some(a), Some(b)) => (a, b),
                    _ => default,
                }
            }
            _ => default,
        }
    }

    /// Rectangle field stored as `[x, y, w, h]`
    pub fn rect(&self, key: &str) -> Option<Rect> {
        match self.get(key) {
            Some(Value::Array(items)) if items.len() >= 4 => {
                let nums: Option<Vec<f64>> = items.iter().take(4).map(scalar_f64).collect();
                let nums = nums?;
                Some(Rect::new(
                    nums[0] as i32,
                    nums[1] as i32,
                    nums[2].max(0.0) as u32,
                    nums[3].max(0.0) as u32,
                ))
            }
            _ => None,
        }
    }
}

/// Text form of a scalar JSON value
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Comparison used by single-variable switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchParams {
    Single {
        variable: String,
        comparison: Comparison,
        value: String,
    },
    Multi {
        variables: Vec<String>,
        cases: Vec<SwitchCase>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetVarParams {
    pub batch: Vec<(String, Value)>,
    pub single: Option<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindWinParams {
    pub title: String,
    pub exe_name: String,
    pub class_name: String,
    pub use_exe: bool,
    pub use_class: bool,
    pub use_title: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MouseAction {
    Click { x: i32, y: i32, button: MouseButton, clicks: u32 },
    DoubleClick { x: i32, y: i32 },
    Move { x: i32, y: i32 },
    Drag { from: (i32, i32), to: (i32, i32) },
    Scroll { amount: i32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MouseParams {
    pub action: MouseAction,
    /// Seconds the pointer takes to travel
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyboardParams {
    Text { text: String, paste: bool, press_enter: bool },
    Hotkey { keys: Vec<String> },
}

/// What to do with the pointer once a reference image is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Click,
    DoubleClick,
    RightClick,
    None,
}

impl ClickKind {
    fn parse(value: &str) -> Self {
        match value {
            "none" => ClickKind::None,
            "double_click" => ClickKind::DoubleClick,
            "right_click" => ClickKind::RightClick,
            _ => ClickKind::Click,
        }
    }
}

/// Anchor image geometry recorded at authoring time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorSpec {
    pub rect_x: i32,
    pub rect_y: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageParams {
    pub confidence: f32,
    pub timeout: f64,
    pub strategy: MatchStrategy,
    pub anchors: Vec<AnchorSpec>,
    /// Target rectangle recorded at authoring time, relative to the anchor space
    pub target_rect: Rect,
    pub click: ClickKind,
    pub relative_click: (f64, f64),
    pub offset: (i32, i32),
    pub auto_scroll: bool,
    pub scroll_amount: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticParams {
    pub roi: Option<Rect>,
    pub duration: f64,
    pub timeout: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundMode {
    HasSound,
    IsSilent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoundParams {
    pub threshold: f32,
    pub timeout: f64,
    pub mode: SoundMode,
}

/// Per-type parameters, one variant per `NodeType`
#[derive(Debug, Clone, PartialEq)]
pub enum NodeParams {
    Start,
    End,
    Reroute,
    Wait { seconds: f64 },
    Notify { message: String, duration: f64, sound: bool },
    OpenApp { path: String, args: String },
    Cmd { command: String },
    Web { url: String },
    BindWin(BindWinParams),
    SetVar(SetVarParams),
    VarSwitch(SwitchParams),
    Sequence { steps: usize },
    Loop { infinite: bool, count: i64 },
    Mouse(MouseParams),
    Keyboard(KeyboardParams),
    Image(ImageParams),
    IfImg { confidence: f32 },
    IfStatic(StaticParams),
    IfSound(SoundParams),
}

impl NodeParams {
    /// Build the typed parameters of a node of `node_type` from `fields`
    pub fn parse(node_type: NodeType, fields: &Fields<'_>) -> Self {
        match node_type {
            NodeType::Start => NodeParams::Start,
            NodeType::End => NodeParams::End,
            NodeType::Reroute => NodeParams::Reroute,
            NodeType::Wait => NodeParams::Wait {
                seconds: fields.float("seconds", 1.0).max(0.0),
            },
            NodeType::Notify => NodeParams::Notify {
                message: fields.string("msg", "Reached notify node"),
                duration: fields.float("duration", 2.0),
                sound: fields.boolean("use_sound", false),
            },
            NodeType::OpenApp => NodeParams::OpenApp {
                path: fields.string("path", ""),
                args: fields.string("args", ""),
            },
            NodeType::Cmd => NodeParams::Cmd {
                command: fields.string("command", ""),
            },
            NodeType::Web => NodeParams::Web {
                url: fields.string("url", ""),
            },
            NodeType::BindWin => NodeParams::BindWin(BindWinParams {
                title: fields.string("title", ""),
                exe_name: fields.string("exe_name", ""),
                class_name: fields.string("class_name", ""),
                use_exe: fields.boolean("use_exe", true),
                use_class: fields.boolean("use_class", true),
                use_title: fields.boolean("use_title", false),
            }),
            NodeType::SetVar => NodeParams::SetVar(parse_set_var(fields)),
            NodeType::VarSwitch => NodeParams::VarSwitch(parse_switch(fields)),
            NodeType::Sequence => NodeParams::Sequence {
                steps: fields.int("num_steps", 3).max(0) as usize,
            },
            NodeType::Loop => NodeParams::Loop {
                infinite: fields.boolean("infinite", true),
                count: fields.int("count", 3),
            },
            NodeType::Mouse => NodeParams::Mouse(parse_mouse(fields)),
            NodeType::Keyboard => NodeParams::Keyboard(parse_keyboard(fields)),
            NodeType::Image => NodeParams::Image(parse_image(fields)),
            NodeType::IfImg => NodeParams::IfImg {
                confidence: fields.float("confidence", 0.9) as f32,
            },
            NodeType::IfStatic => NodeParams::IfStatic(StaticParams {
                roi: fields.rect("roi"),
                duration: fields.float("duration", 5.0),
                timeout: fields.float("timeout", 20.0),
                threshold: fields.float("threshold", 0.98),
            }),
            NodeType::IfSound => NodeParams::IfSound(SoundParams {
                threshold: fields.float("threshold", 0.02) as f32,
                timeout: fields.float("timeout", 10.0),
                mode: match fields.string("detect_mode", "has_sound").as_str() {
                    "has_sound" => SoundMode::HasSound,
                    _ => SoundMode::IsSilent,
                },
            }),
        }
    }
}

fn parse_set_var(fields: &Fields<'_>) -> SetVarParams {
    let batch = fields
        .objects("batch_vars")
        .into_iter()
        .filter_map(|entry| {
            let name = entry.get("name").and_then(scalar_text)?;
            if name.is_empty() {
                return None;
            }
            let value = entry.get("value").cloned().unwrap_or(Value::String(String::new()));
            Some((name, value))
        })
        .collect();

    let name = fields.string("var_name", "");
    let single = if name.is_empty() {
        None
    } else {
        let value = fields
            .get("var_value")
            .cloned()
            .unwrap_or(Value::String(String::new()));
        Some((name, value))
    };

    SetVarParams { batch, single }
}

fn parse_switch(fields: &Fields<'_>) -> SwitchParams {
    let variable = fields.string("var_name", "");
    if !variable.is_empty() {
        let comparison = match fields.string("operator", "=").as_str() {
            "=" | "==" => Comparison::Equal,
            _ => Comparison::NotEqual,
        };
        return SwitchParams::Single {
            variable,
            comparison,
            value: fields.string("var_value", ""),
        };
    }

    let variables = fields
        .string("var_list", "")
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    let cases = fields
        .objects("cases")
        .into_iter()
        .map(|case| SwitchCase {
            id: case.get("id").and_then(scalar_text).unwrap_or_else(|| "else".to_string()),
            value: case.get("value").and_then(scalar_text).unwrap_or_default(),
        })
        .collect();
    SwitchParams::Multi { variables, cases }
}

fn parse_mouse(fields: &Fields<'_>) -> MouseParams {
    let x = fields.int("x", 0) as i32;
    let y = fields.int("y", 0) as i32;
    let action = match fields.string("mouse_action", "click").as_str() {
        "drag" => MouseAction::Drag {
            from: (fields.int("start_x", 0) as i32, fields.int("start_y", 0) as i32),
            to: (fields.int("end_x", 0) as i32, fields.int("end_y", 0) as i32),
        },
        "double_click" => MouseAction::DoubleClick { x, y },
        "move" => MouseAction::Move { x, y },
        "scroll" => MouseAction::Scroll {
            amount: fields.int("amount", -500) as i32,
        },
        _ => MouseAction::Click {
            x,
            y,
            button: MouseButton::parse(&fields.string("mouse_button", "left")),
            clicks: fields.int("click_count", 1).max(1) as u32,
        },
    };
    MouseParams {
        action,
        duration: fields.float("duration", 0.5).max(0.0),
    }
}

fn parse_keyboard(fields: &Fields<'_>) -> KeyboardParams {
    if fields.string("kb_mode", "text") == "text" {
        KeyboardParams::Text {
            text: fields.string("text", ""),
            paste: fields.boolean("use_paste", false),
            press_enter: fields.boolean("press_enter", false),
        }
    } else {
        KeyboardParams::Hotkey {
            keys: fields
                .string("key_name", "enter")
                .to_lowercase()
                .split('+')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

fn parse_image(fields: &Fields<'_>) -> ImageParams {
    let anchors = fields
        .objects("anchors")
        .into_iter()
        .map(|anchor| AnchorSpec {
            rect_x: anchor.get("rect_x").and_then(scalar_f64).unwrap_or(0.0) as i32,
            rect_y: anchor.get("rect_y").and_then(scalar_f64).unwrap_or(0.0) as i32,
        })
        .collect();

    ImageParams {
        confidence: fields.float("confidence", 0.9) as f32,
        timeout: fields.float("timeout", 10.0).max(0.5),
        strategy: MatchStrategy::parse(&fields.string("match_strategy", "hybrid")),
        anchors,
        target_rect: Rect::new(
            fields.int("target_rect_x", 0) as i32,
            fields.int("target_rect_y", 0) as i32,
            fields.int("target_rect_w", 100).max(0) as u32,
            fields.int("target_rect_h", 100).max(0) as u32,
        ),
        click: ClickKind::parse(&fields.string("click_type", "click")),
        relative_click: fields.pair("relative_click_pos", (0.5, 0.5)),
        offset: (fields.int("offset_x", 0) as i32, fields.int("offset_y", 0) as i32),
        auto_scroll: fields.boolean("auto_scroll", false),
        scroll_amount: fields.int("scroll_amount", -500) as i32,
    }
}
