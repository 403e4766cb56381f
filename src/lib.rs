//! # sqldelta
//!
//! Column-level lineage and breaking-change analysis for SQL queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 SQL text (one query)                    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [sql: parse, traverse_scope, qualify]
//! ┌─────────────────────────────────────────────────────────┐
//! │          ScopeTree (arena of scopes, bottom-up)         │
//! └─────────────────────────────────────────────────────────┘
//!                │                           │
//!                ▼ [column_lineage]          ▼ [change]
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  CllResult (m2c + c2c)   │   │  NodeChange per version  │
//! └──────────────────────────┘   └──────────────────────────┘
//!                │                           │
//!                └─────────────┬─────────────┘
//!                              ▼ [dependency_graph, impact]
//! ┌─────────────────────────────────────────────────────────┐
//! │            Impacted nodes (and columns)                 │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod semantic;
pub mod sql;

pub use semantic::{
    classify_change, compute_lineage, impact_radius, ChangeCategory, CllResult,
    ColumnChangeStatus, NodeChange,
};
pub use sql::{Dialect, Schema};
