//! Dependency graph between nodes (queries, tables) and reachability over it.
//!
//! The graph is described by two adjacency maps over opaque node ids:
//!
//! - `parent_map`: node → the nodes it reads from (upstream)
//! - `child_map`: node → the nodes that read from it (downstream)
//!
//! One is the exact inverse of the other. The free functions work on a bare
//! map; [`DependencyGraph`] keeps both maps together with a petgraph graph
//! for ordering and cycle checks.


use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use super::error::{GraphError, GraphResult};

/// Node id → adjacent node ids.
pub type AdjacencyMap = HashMap<String, Vec<String>>;

// =============================================================================
// Reachability
// =============================================================================

/// Every node transitively upstream of `ids`, excluding `ids` themselves.
pub fn find_upstream<I, S>(ids: I, parent_map: &AdjacencyMap) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    reachable(ids, parent_map)
}

/// Every node transitively downstream of `ids`, excluding `ids` themselves.
pub fn find_downstream<I, S>(ids: I, child_map: &AdjacencyMap) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    reachable(ids, child_map)
}

/// Breadth-first search over an adjacency map. Safe on cycles.
fn reachable<I, S>(ids: I, edges: &AdjacencyMap) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let start: HashSet<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
    let mut visited: HashSet<&str> = start.iter().map(String::as_str).collect();
    let mut queue: VecDeque<&str> = start.iter().map(String::as_str).collect();
    let mut found = BTreeSet::new();

    while let Some(id) = queue.pop_front() {
        let Some(neighbors) = edges.get(id) else {
            continue;
        };
        for neighbor in neighbors {
            if visited.insert(neighbor.as_str()) {
                found.insert(neighbor.clone());
                queue.push_back(neighbor.as_str());
            }
        }
    }

    found
}

/// Invert an adjacency map. Every node mentioned on either side gets an
/// entry; lists are sorted and free of duplicates.
pub fn invert(map: &AdjacencyMap) -> AdjacencyMap {
    let mut inverse: HashMap<String, BTreeSet<String>> = HashMap::new();
    for (node, targets) in map {
        inverse.entry(node.clone()).or_default();
        for target in targets {
            inverse
                .entry(target.clone())
                .or_default()
                .insert(node.clone());
        }
    }
    inverse
        .into_iter()
        .map(|(node, sources)| (node, sources.into_iter().collect()))
        .collect()
}

// =============================================================================
// DependencyGraph
// =============================================================================

/// A dependency graph with edges pointing from parent (upstream) to child
/// (downstream).
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_index: HashMap<String, NodeIndex>,
    parent_map: AdjacencyMap,
    child_map: AdjacencyMap,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a node → parents map.
    pub fn from_parent_map(parent_map: &AdjacencyMap) -> Self {
        let mut graph = Self::new();

        let mut nodes: Vec<&String> = parent_map.keys().collect();
        nodes.sort();
        for node in nodes {
            graph.add_node(node);
            let mut parents: Vec<&String> = parent_map[node].iter().collect();
            parents.sort();
            for parent in parents {
                graph.add_edge(parent, node);
            }
        }

        graph
    }

    /// Add a node. Returns false if it already existed.
    pub fn add_node(&mut self, id: &str) -> bool {
        if self.node_index.contains_key(id) {
            return false;
        }
        let idx = self.graph.add_node(id.to_string());
        self.node_index.insert(id.to_string(), idx);
        self.parent_map.insert(id.to_string(), Vec::new());
        self.child_map.insert(id.to_string(), Vec::new());
        true
    }

    /// Add an edge from `parent` to `child`, adding missing nodes.
    pub fn add_edge(&mut self, parent: &str, child: &str) {
        self.add_node(parent);
        self.add_node(child);

        let parents = self.parent_map.entry(child.to_string()).or_default();
        if parents.iter().any(|p| p == parent) {
            return;
        }
        parents.push(parent.to_string());
        self.child_map
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());

        let from = self.node_index[parent];
        let to = self.node_index[child];
        self.graph.add_edge(from, to, ());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(String::as_str)
    }

    pub fn parent_map(&self) -> &AdjacencyMap {
        &self.parent_map
    }

    pub fn child_map(&self) -> &AdjacencyMap {
        &self.child_map
    }

    /// Direct parents of a node.
    pub fn parents(&self, id: &str) -> &[String] {
        self.parent_map.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Direct children of a node.
    pub fn children(&self, id: &str) -> &[String] {
        self.child_map.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every node transitively upstream of `ids`.
    pub fn upstream(&self, ids: &[&str]) -> GraphResult<BTreeSet<String>> {
        self.check_known(ids)?;
        Ok(find_upstream(ids, &self.parent_map))
    }

    /// Every node transitively downstream of `ids`.
    pub fn downstream(&self, ids: &[&str]) -> GraphResult<BTreeSet<String>> {
        self.check_known(ids)?;
        Ok(find_downstream(ids, &self.child_map))
    }

    fn check_known(&self, ids: &[&str]) -> GraphResult<()> {
        match ids.iter().find(|id| !self.contains(id)) {
            Some(id) => Err(GraphError::UnknownNode(id.to_string())),
            None => Ok(()),
        }
    }

    /// Nodes ordered so every parent comes before its children.
    pub fn topological_order(&self) -> GraphResult<Vec<String>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .filter_map(|idx| self.graph.node_weight(idx).cloned())
                .collect()),
            Err(_) => Err(GraphError::CyclicDependency(self.detect_cycles())),
        }
    }

    /// Detect all cycles in the graph.
    ///
    /// Each cycle is returned as a list of the node ids involved.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| match scc.as_slice() {
                // A single node is only a cycle if it has a self-loop
                [idx] => self.graph.edges_connecting(*idx, *idx).next().is_some(),
                _ => true,
            })
            .map(|scc| {
                let mut cycle: Vec<String> = scc
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).cloned())
                    .collect();
                cycle.sort();
                cycle
            })
            .collect()
    }

    /// Validate that the graph has no cycles.
    pub fn validate_acyclic(&self) -> GraphResult<()> {
        let cycles = self.detect_cycles();
        if cycles.is_empty() {
            Ok(())
        } else {
            Err(GraphError::CyclicDependency(cycles))
        }
    }
}
