//! Symbol call graph used to pull structurally related chunks into a result
//! list.
//!
//! The graph is rebuilt from a project snapshot and never persisted. A new
//! build is published by swapping one `Arc`, so traversals in flight keep the
//! graph they started with.
pub mod builder;
pub mod expand;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::indexer::code_parser::SymbolKind;
use crate::store::chunk::Chunk;

pub use builder::GraphBuilder;
pub use expand::{ExpandOptions, expand};

/// `file_path:name:start_line`.
pub fn symbol_id(file_path: &str, name: &str, start_line: usize) -> String {
    format!("{file_path}:{name}:{start_line}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub symbol_id: String,
    pub name: String,
    pub file_path: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub node_count: usize,
    pub edge_count: usize,
}

/// A chunk reached from a seed by walking call edges.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphHit {
    pub chunk: Arc<Chunk>,
    /// Edges between the seed and this chunk, at least 1.
    pub graph_depth: usize,
    pub seed_chunk_id: String,
}

/// Node arena keyed by `symbol_id`, with caller and callee adjacency lists.
#[derive(Debug, Default, Clone)]
pub struct CodeGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    callees: Vec<BTreeSet<usize>>,
    callers: Vec<BTreeSet<usize>>,
    by_file: HashMap<String, Vec<usize>>,
    edge_count: usize,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its index. A node with the same `symbol_id`
    /// is kept and its index returned.
    pub fn add_node(&mut self, node: GraphNode) -> usize {
        if let Some(&idx) = self.index.get(&node.symbol_id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(node.symbol_id.clone(), idx);
        self.by_file.entry(node.file_path.clone()).or_default().push(idx);
        self.nodes.push(node);
        self.callees.push(BTreeSet::new());
        self.callers.push(BTreeSet::new());
        idx
    }

    /// Add the directed edge `caller -> callee`. Self-loops, duplicates and
    /// unknown indices are ignored; returns whether an edge was added.
    pub fn add_edge(&mut self, caller: usize, callee: usize) -> bool {
        if caller == callee || caller >= self.nodes.len() || callee >= self.nodes.len() {
            return false;
        }
        if !self.callees[caller].insert(callee) {
            return false;
        }
        self.callers[callee].insert(caller);
        self.edge_count += 1;
        true
    }

    pub fn node(&self, idx: usize) -> Option<&GraphNode> {
        self.nodes.get(idx)
    }

    pub fn node_index(&self, symbol_id: &str) -> Option<usize> {
        self.index.get(symbol_id).copied()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Indices of the nodes defined in `file_path`, in insertion order.
    pub fn nodes_in_file(&self, file_path: &str) -> &[usize] {
        self.by_file.get(file_path).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn callees(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.callees.get(idx).into_iter().flatten().copied()
    }

    pub fn callers(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.callers.get(idx).into_iter().flatten().copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The current graph of one collection, replaced wholesale on rebuild.
#[derive(Debug, Default)]
pub struct GraphHandle {
    current: RwLock<Option<Arc<CodeGraph>>>,
}

impl GraphHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<CodeGraph>> {
        self.current.read().clone()
    }

    pub fn publish(&self, graph: CodeGraph) {
        *self.current.write() = Some(Arc::new(graph));
    }

    /// Drop the published graph so the next reader rebuilds it.
    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(file: &str, name: &str, line: usize) -> GraphNode {
        GraphNode {
            symbol_id: symbol_id(file, name, line),
            name: name.to_string(),
            file_path: file.to_string(),
            kind: SymbolKind::Function,
            start_line: line,
            end_line: line + 2,
        }
    }

    #[test]
    fn test_add_node_and_edges() {
        let mut graph = CodeGraph::new();
        let a = graph.add_node(node("a.py", "login", 1));
        let b = graph.add_node(node("a.py", "hash_password", 5));
        assert_eq!(graph.add_node(node("a.py", "login", 1)), a);
        assert_eq!(graph.node_index("a.py:hash_password:5"), Some(b));

        assert!(graph.add_edge(a, b));
        assert!(!graph.add_edge(a, b));
        assert!(!graph.add_edge(a, a));
        assert!(!graph.add_edge(a, 99));

        assert_eq!(graph.callees(a).collect::<Vec<_>>(), vec![b]);
        assert_eq!(graph.callers(b).collect::<Vec<_>>(), vec![a]);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.nodes_in_file("a.py"), &[a, b]);
        assert!(graph.nodes_in_file("missing.py").is_empty());
    }

    #[test]
    fn test_handle_swaps_whole_graph() {
        let handle = GraphHandle::new();
        assert!(handle.current().is_none());
        let mut graph = CodeGraph::new();
        graph.add_node(node("a.py", "f", 1));
        handle.publish(graph);
        let first = handle.current().unwrap();
        handle.publish(CodeGraph::new());
        assert_eq!(first.node_count(), 1);
        assert!(handle.current().unwrap().is_empty());
    }

    #[test]
    fn test_clear_keeps_readers_snapshot() {
        let handle = GraphHandle::new();
        let mut graph = CodeGraph::new();
        graph.add_node(node("a.py", "f", 1));
        handle.publish(graph);
        let held = handle.current().unwrap();
        handle.clear();
        assert!(handle.current().is_none());
        assert_eq!(held.node_count(), 1);
    }
}
