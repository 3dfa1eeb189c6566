/// Core graph type definitions
///
/// Defines nodes, links and the graph container exactly as they appear in a
/// persisted project file. Node data is kept as a raw JSON map so keys this
/// engine does not know about survive a load/save cycle; typed access goes
/// through `graph::params`.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Reserved port returned by a node that must not propagate
pub const STOP_PORT: &str = "__STOP__";

/// Port substituted when a node faults unexpectedly
pub const FAIL_PORT: &str = "fail";

/// Ports that mark a node as "failed" for highlighting purposes
pub const NEGATIVE_PORTS: [&str; 5] = ["timeout", "no", "exit", "else", "fail"];

/// Ports that count as success when a sequence probes a branch
pub const SUCCESS_PORTS: [&str; 5] = ["yes", "found", "out", "loop", "success"];

/// Closed set of node types understood by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    End,
    OpenApp,
    BindWin,
    Loop,
    Wait,
    Mouse,
    Keyboard,
    Notify,
    Cmd,
    Web,
    Image,
    IfImg,
    IfStatic,
    IfSound,
    SetVar,
    VarSwitch,
    Sequence,
    Reroute,
}

impl NodeType {
    /// Human-readable default title
    pub fn label(&self) -> &'static str {
        match self {
            NodeType::Start => "Start",
            NodeType::End => "End",
            NodeType::OpenApp => "Open App",
            NodeType::BindWin => "Bind Window",
            NodeType::Loop => "Loop",
            NodeType::Wait => "Wait",
            NodeType::Mouse => "Mouse",
            NodeType::Keyboard => "Keyboard",
            NodeType::Notify => "Notify",
            NodeType::Cmd => "Command",
            NodeType::Web => "Web",
            NodeType::Image => "Find Image",
            NodeType::IfImg => "Images Present",
            NodeType::IfStatic => "Stillness",
            NodeType::IfSound => "Sound",
            NodeType::SetVar => "Set Variable",
            NodeType::VarSwitch => "Switch",
            NodeType::Sequence => "Sequence",
            NodeType::Reroute => "Reroute",
        }
    }

    /// Ports every node of this type declares regardless of its data
    fn fixed_ports(&self) -> &'static [&'static str] {
        match self {
            NodeType::End => &[],
            NodeType::OpenApp => &["out", "fail"],
            NodeType::BindWin => &["success", "fail"],
            NodeType::Loop => &["loop", "exit"],
            NodeType::Image => &["found", "timeout"],
            NodeType::IfImg | NodeType::IfStatic | NodeType::IfSound => &["yes", "no"],
            NodeType::VarSwitch | NodeType::Sequence => &["else"],
            _ => &["out"],
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde names are the canonical identifiers
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&name)
    }
}

/// Decoded raster assets of one node
///
/// Populated at load time from the base64 blobs in `data`; never serialized.
#[derive(Clone, Default)]
pub struct NodeAssets {
    /// Primary reference image (`data.b64`)
    pub image: Option<Arc<DynamicImage>>,
    /// Anchor images (`data.anchors[i].b64`), index-aligned with the data list
    pub anchors: Vec<Option<Arc<DynamicImage>>>,
    /// Condition images (`data.images[i].b64`), index-aligned with the data list
    pub images: Vec<Option<Arc<DynamicImage>>>,
}

impl fmt::Debug for NodeAssets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeAssets")
            .field("image", &self.image.is_some())
            .field("anchors", &self.anchors.len())
            .field("images", &self.images.len())
            .finish()
    }
}

/// A single node of the automation graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the graph
    pub id: String,
    /// Node type, determines dispatch and declared ports
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Canvas position, carried for the editor
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Raw per-type configuration
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Pause before executing this node
    #[serde(default)]
    pub breakpoint: bool,
    #[serde(skip)]
    pub assets: NodeAssets,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            x: 0.0,
            y: 0.0,
            data: Map::new(),
            breakpoint: false,
            assets: NodeAssets::default(),
        }
    }

    /// Builder-style data setter, handy when constructing graphs in code
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Title shown in logs: the user's title if set, else the type label
    pub fn title(&self) -> String {
        self.data
            .get("_user_title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.node_type.label().to_string())
    }

    /// Output ports this node declares
    ///
    /// Sequence and switch nodes compute theirs from data; everything else
    /// uses the fixed table of its type.
    pub fn output_ports(&self) -> Vec<String> {
        match self.node_type {
            NodeType::Sequence => {
                let steps = crate::graph::params::Fields::new(&self.data).int("num_steps", 3).max(0);
                (1..=steps)
                    .map(|i| i.to_string())
                    .chain(std::iter::once("else".to_string()))
                    .collect()
            }
            NodeType::VarSwitch => {
                let fields = crate::graph::params::Fields::new(&self.data);
                if !fields.string("var_name", "").is_empty() {
                    vec!["yes".to_string(), "no".to_string()]
                } else {
                    fields
                        .objects("cases")
                        .iter()
                        .filter_map(|case| case.get("id").and_then(crate::graph::params::scalar_text))
                        .chain(std::iter::once("else".to_string()))
                        .collect()
                }
            }
            other => other.fixed_ports().iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Whether `port` is a legal runtime output of this node
    pub fn declares_port(&self, port: &str) -> bool {
        port == STOP_PORT || self.output_ports().iter().any(|p| p == port)
    }
}

/// Connection from one node's output port to another node's input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub id: String,
    pub source: String,
    #[serde(default = "default_port")]
    pub source_port: String,
    pub target: String,
}

fn default_port() -> String {
    "out".to_string()
}

impl Link {
    pub fn new(source: impl Into<String>, port: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let source_port = port.into();
        let target = target.into();
        Self {
            id: format!("{}:{}->{}", source, source_port, target),
            source,
            source_port,
            target,
        }
    }
}

/// Calibration metadata recorded by the authoring machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetadata {
    #[serde(default = "unit_scale")]
    pub dev_scale_x: f64,
    #[serde(default = "unit_scale")]
    pub dev_scale_y: f64,
    /// Editor metadata this engine does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unit_scale() -> f64 {
    1.0
}

impl Default for GraphMetadata {
    fn default() -> Self {
        Self {
            dev_scale_x: 1.0,
            dev_scale_y: 1.0,
            extra: Map::new(),
        }
    }
}

/// A complete automation graph as persisted in a project file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub breakpoints: BTreeSet<String>,
    #[serde(default)]
    pub metadata: GraphMetadata,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> &mut Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn connect(&mut self, source: &str, port: &str, target: &str) -> &mut Self {
        self.links.push(Link::new(source, port, target));
        self
    }

    /// Ids of every `start` node, in id order
    pub fn start_nodes(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.node_type == NodeType::Start)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Breakpoint set merged from the graph list and node flags
    pub fn breakpoint_set(&self) -> BTreeSet<String> {
        let mut set = self.breakpoints.clone();
        set.extend(self.nodes.values().filter(|n| n.breakpoint).map(|n| n.id.clone()));
        set
    }

    /// Ratio used to rescale template matching on this machine
    pub fn scale_ratio(&self, runtime_scale: f64) -> f64 {
        let dev = self.metadata.dev_scale_x;
        if dev > 0.1 && runtime_scale > 0.1 {
            runtime_scale / dev
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_ports_follow_step_count() {
        let node = Node::new("s", NodeType::Sequence).with("num_steps", 2);
        assert_eq!(node.output_ports(), vec!["1", "2", "else"]);
        assert!(node.declares_port(STOP_PORT));
        assert!(!node.declares_port("3"));
    }

    #[test]
    fn switch_ports_depend_on_mode() {
        let single = Node::new("a", NodeType::VarSwitch).with("var_name", "mode");
        assert_eq!(single.output_ports(), vec!["yes", "no"]);

        let multi = Node::new("b", NodeType::VarSwitch)
            .with("cases", json!([{"id": "c1", "value": "x"}, {"id": "c2", "value": "y"}]));
        assert_eq!(multi.output_ports(), vec!["c1", "c2", "else"]);
    }

    #[test]
    fn persisted_layout_round_trips() {
        let raw = json!({
            "nodes": {
                "n1": {"id": "n1", "type": "start", "x": 10, "y": 20, "data": {"_user_title": "Go"}, "breakpoint": false},
                "n2": {"id": "n2", "type": "if_img", "x": 0, "y": 0, "data": {"future_key": [1, 2]}, "breakpoint": true}
            },
            "links": [{"id": "l1", "source": "n1", "source_port": "out", "target": "n2"}],
            "breakpoints": ["n1"],
            "metadata": {"dev_scale_x": 1.25, "dev_scale_y": 1.25, "zoom": 2}
        });
        let graph: Graph = serde_json::from_value(raw).unwrap();
        assert_eq!(graph.nodes["n2"].node_type, NodeType::IfImg);
        assert_eq!(graph.nodes["n1"].title(), "Go");
        assert_eq!(graph.breakpoint_set().len(), 2);
        assert!((graph.scale_ratio(2.5) - 2.0).abs() < 1e-9);

        let back = serde_json::to_value(&graph).unwrap();
        assert_eq!(back["nodes"]["n2"]["data"]["future_key"], json!([1, 2]));
        assert_eq!(back["metadata"]["zoom"], json!(2));
    }

    #[test]
    fn display_uses_wire_names() {
        assert_eq!(NodeType::IfStatic.to_string(), "if_static");
        assert_eq!(NodeType::BindWin.to_string(), "bind_win");
    }
}
