//! The collected dependency graph.
//!
//! Nodes live in a petgraph arena and are shared wherever the collector
//! proves two paths reach the same subtree (fan-in). A dependency cycle
//! detected during collection becomes a back-edge onto an ancestor node;
//! traversal tolerates those by tracking visited nodes. The root is a node;
//! edges carry the dependency declaration plus the management and version
//! bookkeeping recorded while collecting.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use depot_core::artifact::Artifact;
use depot_core::dependency::Dependency;
use depot_core::repository::RemoteRepository;
use depot_core::version::{Version, VersionConstraint};

/// The shared target of one artifact coordinate.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub artifact: Artifact,
    /// Coordinates this node also answers to (relocation sources).
    pub aliases: Vec<Artifact>,
    /// Repositories the node's artifact may be resolved from.
    pub repositories: Vec<RemoteRepository>,
}

impl GraphNode {
    pub fn new(artifact: Artifact, repositories: Vec<RemoteRepository>) -> Self {
        Self {
            artifact,
            aliases: Vec::new(),
            repositories,
        }
    }
}

/// One incidence of a dependency on a node.
#[derive(Debug, Clone, Default)]
pub struct GraphEdge {
    pub dependency: Option<Dependency>,
    pub context: String,
    /// Scope before dependency management rewrote it.
    pub premanaged_scope: Option<String>,
    /// Version before dependency management rewrote it.
    pub premanaged_version: Option<String>,
    /// Coordinates the dependency passed through before relocation.
    pub relocations: Vec<Artifact>,
    pub constraint: Option<VersionConstraint>,
    pub selected_version: Option<Version>,
    pub data: BTreeMap<String, String>,
}

/// A dependency cycle detected at collection time: the path leading to the
/// cycle entry, then the cyclic segment itself.
#[derive(Debug, Clone)]
pub struct DependencyCycle {
    pub prefix: Vec<Dependency>,
    pub cycle: Vec<Dependency>,
}

impl fmt::Display for DependencyCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dep in &self.prefix {
            write!(f, "{} -> ", dep.artifact())?;
        }
        let mut first = true;
        for dep in &self.cycle {
            if !first {
                write!(f, " -> ")?;
            }
            write!(f, "{}", dep.artifact())?;
            first = false;
        }
        write!(f, " -> (cycle)")
    }
}

/// An artifact occurrence flattened out of the graph.
#[derive(Debug, Clone)]
pub struct FlattenedArtifact {
    pub node: NodeIndex,
    pub artifact: Artifact,
    pub repositories: Vec<RemoteRepository>,
}

/// The dependency graph produced by collection.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    pub root: Option<NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            root: None,
        }
    }

    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        self.graph.add_node(node)
    }

    pub fn set_root(&mut self, root: NodeIndex) {
        self.root = Some(root);
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: GraphEdge) -> EdgeIndex {
        self.graph.add_edge(from, to, edge)
    }

    pub fn node(&self, index: NodeIndex) -> &GraphNode {
        &self.graph[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut GraphNode {
        &mut self.graph[index]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Outgoing edges of a node in insertion order.
    pub fn dependencies_of(&self, index: NodeIndex) -> Vec<(NodeIndex, &GraphEdge)> {
        let mut edges: Vec<(NodeIndex, &GraphEdge)> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|e| (e.target(), e.weight()))
            .collect();
        // petgraph iterates newest-first; callers rely on declaration order.
        edges.reverse();
        edges
    }

    /// Flatten the graph into artifact occurrences, depth-first in
    /// declaration order, one entry per node, root excluded. Cycles are
    /// crossed at most once.
    pub fn flatten(&self) -> Vec<FlattenedArtifact> {
        let mut out = Vec::new();
        let root = match self.root {
            Some(root) => root,
            None => return out,
        };
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        seen.insert(root);
        self.flatten_into(root, &mut seen, &mut out);
        out
    }

    fn flatten_into(
        &self,
        index: NodeIndex,
        seen: &mut HashSet<NodeIndex>,
        out: &mut Vec<FlattenedArtifact>,
    ) {
        for (child, _edge) in self.dependencies_of(index) {
            if !seen.insert(child) {
                continue;
            }
            let node = self.node(child);
            out.push(FlattenedArtifact {
                node: child,
                artifact: node.artifact.clone(),
                repositories: node.repositories.clone(),
            });
            self.flatten_into(child, seen, out);
        }
    }

    /// Render the tree for diagnostics, marking shared and cyclic re-visits.
    pub fn print_tree(&self) -> String {
        let mut out = String::new();
        let root = match self.root {
            Some(root) => root,
            None => return out,
        };
        out.push_str(&format!("{}\n", self.node(root).artifact));
        let mut visited = HashSet::new();
        visited.insert(root);
        let children = self.dependencies_of(root);
        let count = children.len();
        for (i, (child, edge)) in children.into_iter().enumerate() {
            self.print_subtree(&mut out, child, edge, "", i == count - 1, &mut visited);
        }
        out
    }

    fn print_subtree(
        &self,
        out: &mut String,
        index: NodeIndex,
        edge: &GraphEdge,
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<NodeIndex>,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        let node = self.node(index);
        out.push_str(prefix);
        out.push_str(connector);
        out.push_str(&node.artifact.to_string());
        if let Some(dependency) = &edge.dependency {
            if !dependency.scope().is_empty() {
                out.push_str(&format!(" ({})", dependency.scope()));
            }
        }
        if let Some(premanaged) = &edge.premanaged_version {
            out.push_str(&format!(" (version managed from {premanaged})"));
        }
        if !visited.insert(index) {
            out.push_str(" (*)\n");
            return;
        }
        out.push('\n');

        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        let children = self.dependencies_of(index);
        let count = children.len();
        for (i, (child, edge)) in children.into_iter().enumerate() {
            self.print_subtree(out, child, edge, &child_prefix, i == count - 1, visited);
        }
        visited.remove(&index);
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
