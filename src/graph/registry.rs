/// Hot-swappable graph registry
///
/// A loaded graph is validated and compiled into a petgraph link index once,
/// then published through `ArcSwapOption`. Loading a new graph swaps the
/// pointer atomically; runs already in flight keep the `Arc` they started
/// with and never observe the swap.

use crate::graph::types::{Graph, Node, FAIL_PORT};
use anyhow::{bail, Result};
use arc_swap::ArcSwapOption;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Validated graph plus its link index
#[derive(Debug)]
pub struct CompiledGraph {
    /// The graph as loaded
    pub graph: Graph,
    /// Node weight is the node id, edge weight is the source port
    index: DiGraph<String, String>,
    node_index: HashMap<String, NodeIndex>,
}

impl CompiledGraph {
    /// Validate `graph` and build the link index
    ///
    /// Every link must name existing nodes and a port its source declares.
    /// Any node may route its `fail` port, where faults are sent.
    pub fn compile(graph: Graph) -> Result<Self> {
        let mut index = DiGraph::with_capacity(graph.nodes.len(), graph.links.len());
        let mut node_index = HashMap::with_capacity(graph.nodes.len());
        for (id, node) in &graph.nodes {
            if id != &node.id {
                bail!("Node stored under key {} has id {}", id, node.id);
            }
            node_index.insert(id.clone(), index.add_node(id.clone()));
        }

        for link in &graph.links {
            let (Some(&from), Some(&to)) = (node_index.get(&link.source), node_index.get(&link.target)) else {
                bail!(
                    "Link {} connects unknown nodes {} -> {}",
                    link.id,
                    link.source,
                    link.target
                );
            };
            let source = &graph.nodes[&link.source];
            if link.source_port != FAIL_PORT && !source.output_ports().iter().any(|p| p == &link.source_port) {
                bail!(
                    "Link {} leaves {} through undeclared port {}",
                    link.id,
                    link.source,
                    link.source_port
                );
            }
            // edge indices follow link-list order
            index.add_edge(from, to, link.source_port.clone());
        }

        tracing::debug!(
            "🧩 Compiled graph: {} nodes, {} links",
            index.node_count(),
            index.edge_count()
        );
        Ok(Self {
            graph,
            index,
            node_index,
        })
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.graph.nodes.get(id)
    }

    /// Targets of every link leaving `source` through `port`, in link-list order
    ///
    /// Duplicate links yield the target once per link.
    pub fn targets(&self, source: &str, port: &str) -> Vec<String> {
        let Some(&from) = self.node_index.get(source) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .index
            .edges(from)
            .filter(|edge| edge.weight() == port)
            .map(|edge| (edge.id().index(), edge.target()))
            .collect();
        edges.sort_unstable_by_key(|(order, _)| *order);
        edges.into_iter().map(|(_, target)| self.index[target].clone()).collect()
    }

    /// Ids of every `start` node
    pub fn start_nodes(&self) -> Vec<String> {
        self.graph.start_nodes()
    }

    /// Number of distinct nodes reachable from `starts`, the starts included
    pub fn reachable_count(&self, starts: &[String]) -> usize {
        let mut seen = HashSet::new();
        for start in starts {
            let Some(&root) = self.node_index.get(start) else {
                continue;
            };
            let mut dfs = Dfs::new(&self.index, root);
            while let Some(nx) = dfs.next(&self.index) {
                seen.insert(nx);
            }
        }
        seen.len()
    }
}

/// Lock-free holder of the currently loaded graph
#[derive(Debug, Default)]
pub struct GraphRegistry {
    current: ArcSwapOption<CompiledGraph>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and publish `graph`, replacing whatever was loaded
    pub fn load(&self, graph: Graph) -> Result<Arc<CompiledGraph>> {
        let compiled = Arc::new(CompiledGraph::compile(graph)?);
        self.current.store(Some(Arc::clone(&compiled)));
        tracing::info!(
            "🔄 Graph loaded: {} nodes, {} links, {} breakpoints",
            compiled.graph.nodes.len(),
            compiled.graph.links.len(),
            compiled.graph.breakpoint_set().len()
        );
        Ok(compiled)
    }

    /// Snapshot of the loaded graph
    pub fn current(&self) -> Option<Arc<CompiledGraph>> {
        self.current.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::{Link, NodeType};

    fn chain() -> Graph {
        let mut graph = Graph::new();
        graph
            .add_node(Node::new("s", NodeType::Start))
            .add_node(Node::new("a", NodeType::Wait))
            .add_node(Node::new("b", NodeType::Wait))
            .add_node(Node::new("orphan", NodeType::Wait));
        graph.connect("s", "out", "b").connect("s", "out", "a").connect("s", "out", "b");
        graph
    }

    #[test]
    fn targets_follow_link_order_with_duplicates() {
        let compiled = CompiledGraph::compile(chain()).unwrap();
        assert_eq!(compiled.targets("s", "out"), vec!["b", "a", "b"]);
        assert!(compiled.targets("s", "fail").is_empty());
        assert!(compiled.targets("nope", "out").is_empty());
    }

    #[test]
    fn reachability_ignores_orphans() {
        let compiled = CompiledGraph::compile(chain()).unwrap();
        assert_eq!(compiled.reachable_count(&["s".to_string()]), 3);
    }

    #[test]
    fn dangling_links_are_rejected() {
        let mut graph = chain();
        graph.links.push(Link::new("s", "out", "ghost"));
        assert!(CompiledGraph::compile(graph).is_err());
    }

    #[test]
    fn undeclared_ports_are_rejected() {
        let mut graph = chain();
        graph.connect("a", "found", "b");
        let err = CompiledGraph::compile(graph).unwrap_err();
        assert!(err.to_string().contains("undeclared port"));

        let mut graph = chain();
        graph.connect("a", "fail", "b");
        assert!(CompiledGraph::compile(graph).is_ok());
    }

    #[test]
    fn swap_keeps_old_snapshots_alive() {
        let registry = GraphRegistry::new();
        assert!(registry.current().is_none());
        let first = registry.load(chain()).unwrap();
        registry.load(Graph::new()).unwrap();
        assert_eq!(first.graph.nodes.len(), 4);
        assert_eq!(registry.current().map(|g| g.graph.nodes.len()), Some(0));
    }
}
