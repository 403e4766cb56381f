//! Impact radius: which nodes are affected by a set of classified changes.
//!
//! [`impact_radius`] works at node granularity: every changed node and
//! everything downstream of it. [`ImpactAnalyzer`] narrows that down with
//! column lineage, so a downstream node that never reads a changed column
//! is left out.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::change::NodeChange;
use super::column_lineage::{CllResult, ColumnDependency};
use super::dependency_graph::{find_downstream, invert, AdjacencyMap, DependencyGraph};
use super::error::GraphResult;

// =============================================================================
// Node-level impact
// =============================================================================

/// Nodes impacted by `node_changes`: every node whose change is not a pure
/// non-breaking one, plus everything downstream of those through either map.
pub fn impact_radius(
    node_changes: &HashMap<String, NodeChange>,
    parent_map: &AdjacencyMap,
    child_map: &AdjacencyMap,
) -> BTreeSet<String> {
    let changed: BTreeSet<String> = node_changes
        .iter()
        .filter(|(_, change)| change.has_impact())
        .map(|(id, _)| id.clone())
        .collect();

    let mut downstream = invert(parent_map);
    for (node, children) in child_map {
        let entry = downstream.entry(node.clone()).or_default();
        for child in children {
            if !entry.contains(child) {
                entry.push(child.clone());
            }
        }
    }

    let mut impacted = find_downstream(&changed, &downstream);
    impacted.extend(changed);
    impacted
}

// =============================================================================
// Column-level impact
// =============================================================================

/// How much of one node is impacted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeImpact {
    /// Every column (and every row) of the node is affected.
    pub all_columns: bool,
    /// Affected output columns. For fully impacted nodes with known
    /// lineage this lists all of them.
    pub columns: BTreeSet<String>,
}

/// Result of a column-level impact analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub nodes: BTreeMap<String, NodeImpact>,
}

impl ImpactReport {
    pub fn impacted_nodes(&self) -> BTreeSet<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn is_impacted(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&NodeImpact> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone)]
enum Impact {
    Full,
    Columns(BTreeSet<String>),
}

impl Impact {
    fn merge(self, other: Impact) -> Impact {
        match (self, other) {
            (Impact::Columns(mut a), Impact::Columns(b)) => {
                a.extend(b);
                Impact::Columns(a)
            }
            _ => Impact::Full,
        }
    }
}

/// Column-granular impact analysis over a dependency graph.
#[derive(Debug, Clone, Default)]
pub struct ImpactAnalyzer {
    graph: DependencyGraph,
    lineage: HashMap<String, CllResult>,
}

impl ImpactAnalyzer {
    pub fn new(graph: DependencyGraph) -> Self {
        Self {
            graph,
            lineage: HashMap::new(),
        }
    }

    /// Register the lineage of a node's current SQL.
    pub fn with_lineage(mut self, node: impl Into<String>, lineage: CllResult) -> Self {
        self.add_lineage(node, lineage);
        self
    }

    pub fn add_lineage(&mut self, node: impl Into<String>, lineage: CllResult) {
        self.lineage.insert(node.into(), lineage);
    }

    /// Propagate `changes` through the graph, parents before children.
    pub fn analyze(&self, changes: &HashMap<String, NodeChange>) -> GraphResult<ImpactReport> {
        let mut graph = self.graph.clone();
        for id in changes.keys() {
            graph.add_node(id);
        }

        let mut impacts: HashMap<String, Impact> = HashMap::new();
        for id in graph.topological_order()? {
            let mut impact = changes.get(&id).and_then(own_impact);

            for parent in graph.parents(&id) {
                let Some(upstream) = impacts.get(parent) else {
                    continue;
                };
                let inherited = self.inherited(&id, parent, upstream);
                impact = match (impact, inherited) {
                    (Some(current), Some(inherited)) => Some(current.merge(inherited)),
                    (current, inherited) => current.or(inherited),
                };
            }

            if let Some(impact) = impact {
                tracing::trace!(node = %id, full = matches!(impact, Impact::Full), "node impacted");
                impacts.insert(id, impact);
            }
        }

        let nodes = impacts
            .into_iter()
            .map(|(id, impact)| {
                let node_impact = self.report_entry(&id, impact);
                (id, node_impact)
            })
            .collect();
        Ok(ImpactReport { nodes })
    }

    /// Impact a child inherits from one impacted parent.
    fn inherited(&self, child: &str, parent: &str, upstream: &Impact) -> Option<Impact> {
        let (Impact::Columns(changed), Some(lineage)) = (upstream, self.lineage.get(child)) else {
            return Some(Impact::Full);
        };

        let reads = |dep: &ColumnDependency, column: &str| {
            same_node(&dep.node, parent) && (dep.column == column || dep.column == "*")
        };

        if changed
            .iter()
            .any(|column| lineage.m2c.iter().any(|dep| reads(dep, column)))
        {
            return Some(Impact::Full);
        }

        let mut columns = BTreeSet::new();
        for (name, entry) in lineage.c2c.iter() {
            for dep in &entry.depends_on {
                if !same_node(&dep.node, parent) {
                    continue;
                }
                if dep.column == "*" {
                    // An unexpanded star passes every changed column through.
                    columns.extend(changed.iter().cloned());
                } else if changed.contains(&dep.column) {
                    columns.insert(name.to_string());
                }
            }
        }

        (!columns.is_empty()).then_some(Impact::Columns(columns))
    }

    fn report_entry(&self, id: &str, impact: Impact) -> NodeImpact {
        match impact {
            Impact::Full => NodeImpact {
                all_columns: true,
                columns: self
                    .lineage
                    .get(id)
                    .map(|lineage| lineage.c2c.names().map(str::to_string).collect())
                    .unwrap_or_default(),
            },
            Impact::Columns(columns) => NodeImpact {
                all_columns: false,
                columns,
            },
        }
    }
}

/// Impact of a node's own change.
fn own_impact(change: &NodeChange) -> Option<Impact> {
    if !change.has_impact() {
        return None;
    }
    if change.category.affects_all_downstream() || change.columns.is_empty() {
        return Some(Impact::Full);
    }
    Some(Impact::Columns(change.columns.keys().cloned().collect()))
}

/// Do two node ids name the same node? Dotted names also match on their
/// last part (`analytics.orders` and `orders`).
fn same_node(dep_node: &str, id: &str) -> bool {
    if dep_node == id {
        return true;
    }
    let short = |name: &str| name.rsplit('.').next().unwrap_or(name).to_string();
    short(dep_node) == short(id)
}
