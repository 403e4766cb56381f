//! Analyses over lowered queries.
//!
//! - [`column_lineage`] - per output column upstream dependencies of one query
//! - [`change`] - breaking-change classification between two query versions
//! - [`dependency_graph`] - reachability over a node dependency graph
//! - [`impact`] - impacted nodes (and columns) for a set of classified changes

pub mod change;
pub mod column_lineage;
pub mod dependency_graph;
pub mod error;
pub mod impact;
pub mod stats;

pub use change::{
    classify_batch, classify_batch_with_stats, classify_change, classify_change_with_stats,
    ChangeCategory, ChangePair, ColumnChangeStatus, NodeChange,
};
pub use column_lineage::{
    compute_lineage, compute_lineage_with_stats, lineage_of_tree, CllResult, ColumnDependency,
    ColumnLineageEntry, ColumnLineageMap, TransformationType,
};
pub use dependency_graph::{find_downstream, find_upstream, invert, AdjacencyMap, DependencyGraph};
pub use error::{GraphError, GraphResult, LineageError, LineageResult};
pub use impact::{impact_radius, ImpactAnalyzer, ImpactReport, NodeImpact};
pub use stats::AnalysisStats;
