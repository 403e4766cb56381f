//! Error types for the analysis layer.
//!
//! Classification never fails (it degrades to `unknown`), so only lineage
//! extraction and graph operations have error types.

use thiserror::Error;

use crate::sql::ParseError;

/// Errors from column lineage extraction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LineageError {
    /// The SQL text could not be parsed; there is nothing to fall back on.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub type LineageResult<T> = Result<T, LineageError>;

/// Errors from dependency graph operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    /// Circular dependencies between nodes.
    #[error("Circular dependencies detected: {}", format_cycles(.0))]
    CyclicDependency(Vec<Vec<String>>),

    /// A node id that is not part of the graph.
    #[error("Unknown node: '{0}'")]
    UnknownNode(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| format!("{} → (back to start)", cycle.join(" → ")))
        .collect::<Vec<_>>()
        .join("; ")
}
